/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Invocation of the external tools that the pipeline treats as opaque.

use std::{
    io::{self, Read, Write},
    panic,
    path::{Path, PathBuf},
    process::{ChildStdin, Command, ExitStatus, Stdio},
    sync::atomic::AtomicBool,
    thread::{self, ScopedJoinHandle},
};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{stream, util::DebugString};

pub mod cpio;
pub mod magiskboot;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to run command: {0:?}")]
    CommandSpawn(DebugString, #[source] io::Error),
    #[error("Command failed with status: {1}: {0:?}")]
    CommandExecution(DebugString, ExitStatus),
    #[error("Failed to write to stdin of command: {0:?}")]
    CommandStdin(DebugString, #[source] io::Error),
    #[error("Failed to read stdout of command: {0:?}")]
    CommandStdout(DebugString, #[source] io::Error),
    #[error("Command did not produce expected output: {1:?}: {0:?}")]
    MissingOutput(DebugString, PathBuf),
    #[error("File I/O error: {0:?}")]
    File(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Locations of the external executables. These are resolved once at startup
/// and never change afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tools {
    pub magiskboot: PathBuf,
    pub cpio: PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            magiskboot: PathBuf::from(magiskboot::NAME),
            cpio: PathBuf::from(cpio::NAME),
        }
    }
}

fn log_output(command: &DebugString, stdout: &[u8], stderr: &[u8]) {
    for (name, data) in [("stdout", stdout), ("stderr", stderr)] {
        let data = data.trim();
        if !data.is_empty() {
            debug!("{command:?} {name}: {}", data.as_bstr());
        }
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|e| panic::resume_unwind(e))
}

/// Run a command to completion with stdin closed. Output is captured and only
/// logged. The exit status is returned as-is so that callers can decide which
/// statuses count as success.
pub fn status(command: &mut Command) -> Result<ExitStatus> {
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let desc = DebugString::new(&*command);
    trace!("Running: {desc:?}");

    let output = command
        .output()
        .map_err(|e| Error::CommandSpawn(desc.clone(), e))?;

    log_output(&desc, &output.stdout, &output.stderr);

    Ok(output.status)
}

/// Run a command to completion and fail unless it exits successfully.
pub fn run(command: &mut Command) -> Result<()> {
    let status = status(command)?;

    if !status.success() {
        return Err(Error::CommandExecution(DebugString::new(&*command), status));
    }

    Ok(())
}

/// Run a command while `input` feeds its stdin from a separate thread and its
/// stdout is copied into `output` on the calling thread. Neither side can stall
/// the other, no matter how much data flows through the pipes. stdin is closed
/// once `input` returns.
///
/// If copying stdout fails or is cancelled, the child is killed so that the
/// feeding thread cannot block forever.
pub fn run_piped(
    command: &mut Command,
    input: impl FnOnce(ChildStdin) -> io::Result<()> + Send,
    mut output: impl Write,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let desc = DebugString::new(&*command);
    trace!("Running: {desc:?}");

    let mut child = command
        .spawn()
        .map_err(|e| Error::CommandSpawn(desc.clone(), e))?;

    let (Some(stdin), Some(stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        unreachable!("Piped stdio handles are missing");
    };

    let (copied, written, stderr_data) = thread::scope(|s| {
        let writer = s.spawn(move || input(stdin));
        let stderr_reader = s.spawn(move || {
            let mut buf = vec![];
            stderr.read_to_end(&mut buf).map(|_| buf)
        });

        let copied = stream::copy(stdout, &mut output, cancel_signal);
        if copied.is_err() {
            // Nothing we can do if this fails. The child may have exited.
            let _ = child.kill();
        }

        (copied, join(writer), join(stderr_reader))
    });

    let status = child
        .wait()
        .map_err(|e| Error::CommandSpawn(desc.clone(), e))?;

    log_output(&desc, &[], stderr_data.as_deref().unwrap_or_default());

    copied.map_err(|e| Error::CommandStdout(desc.clone(), e))?;

    if !status.success() {
        return Err(Error::CommandExecution(desc, status));
    }

    written.map_err(|e| Error::CommandStdin(desc, e))?;

    Ok(())
}

/// Fail with [`Error::MissingOutput`] if `path` was not produced by `command`.
fn require_output(command: &Command, path: &Path) -> Result<()> {
    match path.try_exists() {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::MissingOutput(
            DebugString::new(&*command),
            path.to_owned(),
        )),
        Err(e) => Err(Error::File(path.to_owned(), e)),
    }
}
