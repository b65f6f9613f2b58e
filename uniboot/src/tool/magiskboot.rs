/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{path::Path, process::Command};

use tracing::debug;

use crate::{
    tool::{self, Error, Result, Tools},
    util::DebugString,
};

pub const NAME: &str = "magiskboot";

/// Name of the uploaded image inside the workspace.
pub const BOOT_IMAGE: &str = "boot.img";
/// Name of the repacked image inside the workspace.
pub const PATCHED_IMAGE: &str = "new-boot.img";
/// Name of the ramdisk archive that unpacking produces and repacking consumes.
pub const RAMDISK_ARCHIVE: &str = "ramdisk.cpio";

/// `magiskboot hexpatch` exits with this status when the pattern is absent.
const HEXPATCH_NOT_FOUND: i32 = 1;

fn command(tools: &Tools, dir: &Path) -> Command {
    let mut command = Command::new(&tools.magiskboot);
    command.current_dir(dir);
    command
}

/// Decompose [`BOOT_IMAGE`] inside `dir` into its component files.
pub fn unpack(tools: &Tools, dir: &Path) -> Result<()> {
    let mut command = command(tools, dir);
    command.arg("unpack").arg(BOOT_IMAGE);

    tool::run(&mut command)?;
    tool::require_output(&command, &dir.join(RAMDISK_ARCHIVE))
}

/// Reassemble the component files inside `dir` into [`PATCHED_IMAGE`], using
/// [`BOOT_IMAGE`] as the template for the header.
pub fn repack(tools: &Tools, dir: &Path) -> Result<()> {
    let mut command = command(tools, dir);
    command.arg("repack").arg(BOOT_IMAGE).arg(PATCHED_IMAGE);

    tool::run(&mut command)?;
    tool::require_output(&command, &dir.join(PATCHED_IMAGE))
}

/// Replace the first occurrence of `original` with `replacement` in `target`,
/// which is relative to `dir`. Returns whether the pattern was found. The file
/// is left untouched when it wasn't.
pub fn hexpatch(
    tools: &Tools,
    dir: &Path,
    target: &Path,
    original: &[u8],
    replacement: &[u8],
) -> Result<bool> {
    let mut command = command(tools, dir);
    command
        .arg("hexpatch")
        .arg(target)
        .arg(hex::encode(original))
        .arg(hex::encode(replacement));

    let status = tool::status(&mut command)?;

    if status.success() {
        Ok(true)
    } else if status.code() == Some(HEXPATCH_NOT_FOUND) {
        debug!("Pattern not found: {}: {target:?}", hex::encode(original));
        Ok(false)
    } else {
        Err(Error::CommandExecution(DebugString::new(&command), status))
    }
}
