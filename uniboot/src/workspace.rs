/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};

/// An ephemeral directory that owns every temporary file of a single pipeline
/// run. The directory is removed by [`Self::destroy`] or, if that was never
/// called, when the value is dropped. This includes unwinding from a panic.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    const PREFIX: &'static str = "uniboot-";

    /// Allocate a uniquely named directory inside `parent`, or inside the
    /// system temporary directory if no parent is given.
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(Self::PREFIX);

        let dir = match parent {
            Some(p) => builder.tempdir_in(p)?,
            None => builder.tempdir()?,
        };
        let path = dir.path().to_owned();

        debug!("Created workspace: {path:?}");

        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.path.join(path)
    }

    /// Recursively delete the workspace. A workspace that no longer exists on
    /// disk is not an error.
    pub fn destroy(mut self) -> io::Result<()> {
        self.remove()
    }

    fn remove(&mut self) -> io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        match dir.close() {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            r => r?,
        }

        debug!("Destroyed workspace: {:?}", self.path);

        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            warn!("Failed to destroy workspace: {:?}: {e}", self.path);
        }
    }
}
