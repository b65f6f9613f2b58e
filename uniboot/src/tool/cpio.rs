/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Conversion between the ramdisk archive and an on-disk directory tree.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Component, Path},
    process::Command,
    sync::atomic::AtomicBool,
};

use tracing::debug;
use walkdir::WalkDir;

use crate::{
    stream,
    tool::{self, Error, Result, Tools, magiskboot::RAMDISK_ARCHIVE},
};

pub const NAME: &str = "cpio";

/// Name of the extracted ramdisk tree inside the workspace.
pub const RAMDISK_DIR: &str = "ramdisk";

/// Extract [`RAMDISK_ARCHIVE`] inside `dir` into [`RAMDISK_DIR`]. The archive
/// is deleted afterwards since it is regenerated by [`create`].
pub fn extract(tools: &Tools, dir: &Path, cancel_signal: &AtomicBool) -> Result<()> {
    let archive_path = dir.join(RAMDISK_ARCHIVE);
    let ramdisk_dir = dir.join(RAMDISK_DIR);

    fs::create_dir(&ramdisk_dir).map_err(|e| Error::File(ramdisk_dir.clone(), e))?;

    let archive = File::open(&archive_path).map_err(|e| Error::File(archive_path.clone(), e))?;

    let mut command = Command::new(&tools.cpio);
    command.arg("-i").current_dir(&ramdisk_dir);

    tool::run_piped(
        &mut command,
        |stdin| stream::copy(archive, stdin, cancel_signal).map(|_| ()),
        io::sink(),
        cancel_signal,
    )?;

    fs::remove_file(&archive_path).map_err(|e| Error::File(archive_path, e))?;

    debug!("Extracted ramdisk: {ramdisk_dir:?}");

    Ok(())
}

/// Create [`RAMDISK_ARCHIVE`] inside `dir` from the contents of
/// [`RAMDISK_DIR`]. The path list is streamed to the archiver while its output
/// is being written out.
pub fn create(tools: &Tools, dir: &Path, cancel_signal: &AtomicBool) -> Result<()> {
    let archive_path = dir.join(RAMDISK_ARCHIVE);
    let ramdisk_dir = dir.join(RAMDISK_DIR);

    let archive =
        File::create(&archive_path).map_err(|e| Error::File(archive_path.clone(), e))?;
    let mut writer = BufWriter::new(archive);

    let mut command = Command::new(&tools.cpio);
    command.args(["-o", "-H", "newc"]).current_dir(&ramdisk_dir);

    tool::run_piped(
        &mut command,
        |stdin| write_path_list(&ramdisk_dir, BufWriter::new(stdin), cancel_signal),
        &mut writer,
        cancel_signal,
    )?;

    writer
        .flush()
        .map_err(|e| Error::File(archive_path.clone(), e))?;

    debug!("Created ramdisk archive: {archive_path:?}");

    Ok(())
}

/// Write every directory and file below `root` as a newline-terminated record
/// of the form `./<relative path>`. Entries are sorted by name within each
/// directory and parents come before their children. Symlinks are listed, but
/// not followed.
pub fn write_path_list(
    root: &Path,
    mut writer: impl Write,
    cancel_signal: &AtomicBool,
) -> io::Result<()> {
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        stream::check_cancel(cancel_signal)?;

        let entry = entry?;
        let relative_path = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?;

        let mut record = b".".to_vec();

        for component in relative_path.components() {
            let Component::Normal(name) = component else {
                unreachable!("Walked path has non-normal component: {relative_path:?}");
            };

            record.push(b'/');
            record.extend_from_slice(name.as_encoded_bytes());
        }

        if record.contains(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Path cannot be archived: {relative_path:?}"),
            ));
        }

        record.push(b'\n');
        writer.write_all(&record)?;
    }

    writer.flush()
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::atomic::AtomicBool};

    use super::*;

    #[test]
    fn path_list_order() {
        let cancel_signal = AtomicBool::new(false);
        let dir = tempfile::tempdir().unwrap();

        fs::create_dir_all(dir.path().join("system/bin")).unwrap();
        fs::create_dir_all(dir.path().join("first_stage_ramdisk")).unwrap();
        fs::write(dir.path().join("system/bin/fastbootd"), b"").unwrap();
        fs::write(dir.path().join("first_stage_ramdisk/fstab.qcom"), b"").unwrap();
        fs::write(dir.path().join("init"), b"").unwrap();

        let mut output = vec![];
        write_path_list(dir.path(), &mut output, &cancel_signal).unwrap();

        assert_eq!(
            output,
            b"./first_stage_ramdisk\n\
              ./first_stage_ramdisk/fstab.qcom\n\
              ./init\n\
              ./system\n\
              ./system/bin\n\
              ./system/bin/fastbootd\n",
        );
    }

    #[test]
    fn path_list_empty_tree() {
        let cancel_signal = AtomicBool::new(false);
        let dir = tempfile::tempdir().unwrap();

        let mut output = vec![];
        write_path_list(dir.path(), &mut output, &cancel_signal).unwrap();

        assert!(output.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn path_list_rejects_newline() {
        let cancel_signal = AtomicBool::new(false);
        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join("bad\nname"), b"").unwrap();

        let err = write_path_list(dir.path(), io::sink(), &cancel_signal).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[cfg(unix)]
    #[test]
    fn path_list_keeps_symlinks() {
        let cancel_signal = AtomicBool::new(false);
        let dir = tempfile::tempdir().unwrap();

        std::os::unix::fs::symlink("/system/bin/init", dir.path().join("init")).unwrap();

        let mut output = vec![];
        write_path_list(dir.path(), &mut output, &cancel_signal).unwrap();

        assert_eq!(output, b"./init\n");
    }
}
