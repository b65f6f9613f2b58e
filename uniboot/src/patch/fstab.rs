/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use bstr::ByteSlice;
use tracing::{debug, trace};

use crate::stream;

/// Only files with this name prefix are considered fstabs.
pub const FSTAB_PREFIX: &str = "fstab";

/// fs_mgr options that enable AVB for a mount entry. These are removed in
/// order, so an option must come before any other option that is its prefix.
pub static AVB_OPTIONS: &[&str] = &[
    ",avb_keys=/avb/q-gsi.avbpubkey:/avb/r-gsi.avbpubkey:/avb/s-gsi.avbpubkey",
    ",avb=vbmeta_system_ext",
    ",avb=vbmeta_system",
    ",avb=vbmeta_vendor",
    ",avb=vbmeta_product",
];

/// Remove every occurrence of every [`AVB_OPTIONS`] entry from `data`.
pub fn strip(data: &[u8]) -> Vec<u8> {
    AVB_OPTIONS
        .iter()
        .fold(data.to_vec(), |data, option| data.replace(option, b""))
}

/// Strip AVB options from every regular file in `dir` whose name starts with
/// [`FSTAB_PREFIX`]. Subdirectories are not searched. If `dir` does not exist,
/// nothing happens. Returns the paths of the files that were modified.
pub fn strip_dir(dir: &Path, cancel_signal: &AtomicBool) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("fstab directory does not exist: {dir:?}");
            return Ok(vec![]);
        }
        Err(e) => return Err(e),
    };

    let mut modified = vec![];

    for entry in entries {
        stream::check_cancel(cancel_signal)?;

        let entry = entry?;

        if !entry
            .file_name()
            .as_encoded_bytes()
            .starts_with(FSTAB_PREFIX.as_bytes())
            || !entry.file_type()?.is_file()
        {
            continue;
        }

        let path = entry.path();
        let data = fs::read(&path)?;
        let new_data = strip(&data);

        if new_data != data {
            fs::write(&path, &new_data)?;
            debug!("Stripped AVB options: {path:?}");
            modified.push(path);
        } else {
            trace!("No AVB options found: {path:?}");
        }
    }

    modified.sort();

    Ok(modified)
}
