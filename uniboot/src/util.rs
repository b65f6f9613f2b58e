/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fmt,
    path::{Component, Path},
};

use rand::{Rng, distributions::Alphanumeric};

/// A string that is printed verbatim by [`fmt::Debug`]. This is used for
/// storing the [`fmt::Debug`] representation of types that are not [`Send`] or
/// [`Sync`], like [`std::process::Command`], inside error types.
#[derive(Clone, PartialEq, Eq)]
pub struct DebugString(String);

impl DebugString {
    pub fn new<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Self(format!("{value:?}"))
    }
}

impl fmt::Debug for DebugString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Check that a path is relative and only consists of normal components, so
/// that joining it onto a directory cannot escape that directory.
pub fn is_contained_path(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Generate a random string of ASCII alphanumeric characters.
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contained_paths() {
        assert!(is_contained_path(Path::new("system/bin/fastbootd")));
        assert!(is_contained_path(Path::new("./dtb")));
        assert!(!is_contained_path(Path::new("")));
        assert!(!is_contained_path(Path::new("/system/bin/fastbootd")));
        assert!(!is_contained_path(Path::new("system/../../etc")));
    }

    #[test]
    fn random_alphanumeric_charset() {
        let s = random_alphanumeric(64);
        assert_eq!(s.len(), 64);
        assert!(s.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn parent_of_bare_name() {
        assert_eq!(parent_path(Path::new("uniboot.toml")), Path::new("."));
        assert_eq!(parent_path(Path::new("a/b.toml")), Path::new("a"));
    }
}
