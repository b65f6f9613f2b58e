/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Removal of AVB properties from device tree blobs.
//!
//! The blob is never parsed. AVB options show up as plain strings inside
//! property values (eg. `...,avb=vbmeta_system` or
//! `,avb_keys=/avb/q-gsi.avbpubkey:...`) and are overwritten with spaces in
//! place. The length of the blob and every offset in it must stay the same
//! because the structure block refers to the strings block by offset.

use std::{fs, io, path::Path};

use memchr::memmem;
use tracing::debug;

/// `avb_keys=` takes a list of key paths that runs until the end of the string.
const AVB_KEYS: &[u8] = b",avb_keys";
/// Every match starts with this, so it doubles as the search needle.
const AVB: &[u8] = b",avb";

/// Blank out every AVB option in `data`. Returns the number of blanked spans.
///
/// At a given offset, [`AVB_KEYS`] takes precedence over [`AVB`]. Its span
/// extends up to, but not including, the next NUL byte or the end of the data.
/// A bare [`AVB`] match only blanks those four bytes.
pub fn strip(data: &mut [u8]) -> usize {
    let finder = memmem::Finder::new(AVB);
    let mut offset = 0;
    let mut count = 0;

    while let Some(n) = finder.find(&data[offset..]) {
        let start = offset + n;

        let end = if data[start..].starts_with(AVB_KEYS) {
            memchr::memchr(0, &data[start..]).map_or(data.len(), |n| start + n)
        } else {
            start + AVB.len()
        };

        data[start..end].fill(b' ');
        count += 1;
        offset = end;
    }

    count
}

/// Blank out AVB options in the file at `path`. If the file does not exist,
/// [`None`] is returned. The file is only rewritten if something changed.
pub fn strip_file(path: &Path) -> io::Result<Option<usize>> {
    let mut data = match fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let count = strip(&mut data);

    if count > 0 {
        fs::write(path, &data)?;
        debug!("Blanked {count} AVB spans: {path:?}");
    }

    Ok(Some(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripped(data: &[u8]) -> (Vec<u8>, usize) {
        let mut data = data.to_vec();
        let count = strip(&mut data);
        (data, count)
    }

    #[test]
    fn avb_keys_until_nul() {
        let (data, count) = stripped(b"X,avb_keys=/a/b.key:/c/d.key\0Y");

        assert_eq!(count, 1);
        assert_eq!(data, b"X                           \0Y");
    }

    #[test]
    fn avb_keys_until_end() {
        let (data, count) = stripped(b"X,avb_keys=/a/b.key");

        assert_eq!(count, 1);
        assert_eq!(data, b"X                  ");
    }

    #[test]
    fn avb_only_blanks_marker() {
        let (data, count) = stripped(b"X,avb=foo");

        assert_eq!(count, 1);
        assert_eq!(data, b"X    =foo");
    }

    #[test]
    fn avb_inside_fs_mgr_flags() {
        let input = b"\0wait,slotselect,avb=vbmeta_system,logical,first_stage_mount\0";
        let (data, count) = stripped(input);

        assert_eq!(count, 1);
        assert_eq!(data.len(), input.len());
        assert_eq!(
            data,
            b"\0wait,slotselect    =vbmeta_system,logical,first_stage_mount\0",
        );
    }

    #[test]
    fn multiple_matches() {
        let input = b"ro,avb\0rw,avb_keys=/x\0,avb,avb\0";
        let (data, count) = stripped(input);

        assert_eq!(count, 4);
        assert_eq!(data, b"ro    \0rw            \0        \0");
    }

    #[test]
    fn longer_pattern_takes_precedence() {
        // Checking `,avb` first would leave `_keys=...` behind.
        let (data, _) = stripped(b",avb_keys=/k\0");
        assert!(!data.contains(&b'_'));
        assert!(!data.contains(&b'k'));
    }

    #[test]
    fn no_matches() {
        let input = b"\xd0\x0d\xfe\xedcompatible\0avb\0,av";
        let (data, count) = stripped(input);

        assert_eq!(count, 0);
        assert_eq!(data, input);
    }

    #[test]
    fn file_handling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dtb");

        assert_eq!(strip_file(&path).unwrap(), None);

        fs::write(&path, b"\0,avb=vbmeta\0").unwrap();
        assert_eq!(strip_file(&path).unwrap(), Some(1));
        assert_eq!(fs::read(&path).unwrap(), b"\0    =vbmeta\0");

        assert_eq!(strip_file(&path).unwrap(), Some(0));
    }
}
