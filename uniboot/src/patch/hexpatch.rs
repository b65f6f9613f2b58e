/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Device-specific binary fixes for the ramdisk's fastbootd.
//!
//! Each rule replaces the first occurrence of a byte pattern with another
//! pattern of the same length. Only one variant is expected to match any given
//! binary. Supporting a new device means adding a rule, not changing code.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    stream,
    tool::{self, Tools, cpio::RAMDISK_DIR, magiskboot},
    util,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Pattern lengths differ for {variant:?}: {original} != {replacement}")]
    LengthMismatch {
        variant: String,
        original: usize,
        replacement: usize,
    },
    #[error("Empty pattern for {0:?}")]
    EmptyPattern(String),
    #[error("Duplicate variant: {0:?}")]
    DuplicateVariant(String),
    #[error("Target for {0:?} is not a path inside the ramdisk: {1:?}")]
    InvalidTarget(String, PathBuf),
    #[error("Invalid built-in rule: {0:?}")]
    Builtin(&'static str, #[source] hex::FromHexError),
    #[error("Failed to apply {0:?}")]
    Tool(String, #[source] tool::Error),
    #[error("Cancelled before applying {0:?}")]
    Cancelled(String, #[source] std::io::Error),
    #[error("No variant matched any target: {0:?}")]
    NoMatch(Vec<PathBuf>),
}

impl Error {
    /// The variant that the error relates to, if any.
    pub fn variant(&self) -> Option<&str> {
        match self {
            Self::LengthMismatch { variant: v, .. }
            | Self::EmptyPattern(v)
            | Self::DuplicateVariant(v)
            | Self::InvalidTarget(v, _)
            | Self::Tool(v, _)
            | Self::Cancelled(v, _) => Some(v.as_str()),
            Self::Builtin(v, _) => Some(*v),
            Self::NoMatch(_) => None,
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Path of fastbootd relative to the root of the ramdisk.
pub const FASTBOOTD: &str = "system/bin/fastbootd";

/// (variant, original, replacement)
static BUILTIN_RULES: &[(&str, &str, &str)] = &[
    // Realme C21Y (ARM64)
    (
        "realme-c21y",
        "ff8302d1fd7b04a9fb2b00f9fa6706a9",
        "00008052c0035fd6fb2b00f9fa6706a9",
    ),
    // Realme C30 (ARM)
    (
        "realme-c30",
        "15f05cef2de9f04389b03c4800247844d0f80080d8f80000",
        "15f05cef2de9f0430020bde8f0837844d0f80080d8f80000",
    ),
    // Realme C11 2021 (ARM)
    (
        "realme-c11-2021",
        "2de9f04389b0394800247844d0f80080",
        "2de9f0430020bde8f0437844d0f80080",
    ),
];

fn default_target() -> PathBuf {
    PathBuf::from(FASTBOOTD)
}

#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HexPatchRule {
    /// Hardware variant the rule was written for.
    pub variant: String,
    /// Binary to patch, relative to the root of the ramdisk.
    #[serde(default = "default_target")]
    pub target: PathBuf,
    #[serde(with = "hex")]
    pub original: Vec<u8>,
    #[serde(with = "hex")]
    pub replacement: Vec<u8>,
}

impl fmt::Debug for HexPatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HexPatchRule")
            .field("variant", &self.variant)
            .field("target", &self.target)
            .field("original", &hex::encode(&self.original))
            .field("replacement", &hex::encode(&self.replacement))
            .finish()
    }
}

/// An ordered, validated list of [`HexPatchRule`]s. Once constructed, the
/// catalog is immutable and can be shared between any number of pipelines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HexPatchCatalog {
    rules: Vec<HexPatchRule>,
}

impl HexPatchCatalog {
    /// Validate `rules` and build a catalog from them. Patterns must be
    /// non-empty and of equal length, variant names must be unique, and
    /// targets must stay inside the ramdisk.
    pub fn new(rules: Vec<HexPatchRule>) -> Result<Self> {
        let mut variants = HashSet::new();

        for rule in &rules {
            if rule.original.is_empty() || rule.replacement.is_empty() {
                return Err(Error::EmptyPattern(rule.variant.clone()));
            } else if rule.original.len() != rule.replacement.len() {
                return Err(Error::LengthMismatch {
                    variant: rule.variant.clone(),
                    original: rule.original.len(),
                    replacement: rule.replacement.len(),
                });
            } else if !util::is_contained_path(&rule.target) {
                return Err(Error::InvalidTarget(
                    rule.variant.clone(),
                    rule.target.clone(),
                ));
            } else if !variants.insert(rule.variant.as_str()) {
                return Err(Error::DuplicateVariant(rule.variant.clone()));
            }
        }

        Ok(Self { rules })
    }

    /// The rules that ship with uniboot.
    pub fn builtin_rules() -> Result<Vec<HexPatchRule>> {
        BUILTIN_RULES
            .iter()
            .map(|&(variant, original, replacement)| {
                Ok(HexPatchRule {
                    variant: variant.to_owned(),
                    target: default_target(),
                    original: hex::decode(original).map_err(|e| Error::Builtin(variant, e))?,
                    replacement: hex::decode(replacement)
                        .map_err(|e| Error::Builtin(variant, e))?,
                })
            })
            .collect()
    }

    pub fn builtin() -> Result<Self> {
        Self::new(Self::builtin_rules()?)
    }

    pub fn rules(&self) -> &[HexPatchRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Apply every rule in `catalog`, in order, to the ramdisk tree inside
/// `workspace`. A rule whose pattern or target file is absent is skipped. If
/// `require_match` is set, it is an error for no rule to match at all. Returns
/// the variants that were applied.
pub fn apply<'a>(
    tools: &Tools,
    workspace: &Path,
    catalog: &'a HexPatchCatalog,
    require_match: bool,
    cancel_signal: &AtomicBool,
) -> Result<Vec<&'a str>> {
    let ramdisk_dir = Path::new(RAMDISK_DIR);
    let mut applied = vec![];

    for rule in catalog.rules() {
        stream::check_cancel(cancel_signal)
            .map_err(|e| Error::Cancelled(rule.variant.clone(), e))?;

        let target = ramdisk_dir.join(&rule.target);

        if !workspace.join(&target).is_file() {
            trace!("Target for {:?} does not exist: {target:?}", rule.variant);
            continue;
        }

        let found = magiskboot::hexpatch(
            tools,
            workspace,
            &target,
            &rule.original,
            &rule.replacement,
        )
        .map_err(|e| Error::Tool(rule.variant.clone(), e))?;

        if found {
            debug!("Applied {:?} to {target:?}", rule.variant);
            applied.push(rule.variant.as_str());
        }
    }

    if require_match && applied.is_empty() && !catalog.is_empty() {
        let mut targets = catalog
            .rules()
            .iter()
            .map(|r| r.target.clone())
            .collect::<Vec<_>>();
        targets.sort();
        targets.dedup();

        return Err(Error::NoMatch(targets));
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn rule(variant: &str, original: &[u8], replacement: &[u8]) -> HexPatchRule {
        HexPatchRule {
            variant: variant.to_owned(),
            target: default_target(),
            original: original.to_vec(),
            replacement: replacement.to_vec(),
        }
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = HexPatchCatalog::builtin().unwrap();

        assert_eq!(catalog.rules().len(), BUILTIN_RULES.len());
        for rule in catalog.rules() {
            assert_eq!(rule.original.len(), rule.replacement.len());
            assert_ne!(rule.original, rule.replacement);
            assert_eq!(rule.target, Path::new(FASTBOOTD));
        }
    }

    #[test]
    fn length_mismatch() {
        let err =
            HexPatchCatalog::new(vec![rule("a", b"\xaa\xbb\xcc", b"\x11\x22")]).unwrap_err();

        assert_matches!(
            err,
            Error::LengthMismatch {
                original: 3,
                replacement: 2,
                ..
            }
        );
        assert_eq!(err.variant(), Some("a"));
    }

    #[test]
    fn empty_pattern() {
        let err = HexPatchCatalog::new(vec![rule("a", b"", b"")]).unwrap_err();
        assert_matches!(err, Error::EmptyPattern(v) if v == "a");
    }

    #[test]
    fn duplicate_variant() {
        let err = HexPatchCatalog::new(vec![
            rule("a", b"\xaa", b"\x11"),
            rule("a", b"\xbb", b"\x22"),
        ])
        .unwrap_err();
        assert_matches!(err, Error::DuplicateVariant(v) if v == "a");
    }

    #[test]
    fn escaping_target() {
        let mut r = rule("a", b"\xaa", b"\x11");
        r.target = PathBuf::from("../boot.img");

        let err = HexPatchCatalog::new(vec![r]).unwrap_err();
        assert_matches!(err, Error::InvalidTarget(v, _) if v == "a");
    }

    #[test]
    fn deserialize_rule() {
        let r: HexPatchRule = toml_edit::de::from_str(
            r#"
            variant = "test"
            original = "aabbcc"
            replacement = "112233"
            "#,
        )
        .unwrap();

        assert_eq!(r, rule("test", b"\xaa\xbb\xcc", b"\x11\x22\x33"));
    }

    #[test]
    fn deserialize_rule_invalid_hex() {
        let r = toml_edit::de::from_str::<HexPatchRule>(
            r#"
            variant = "test"
            original = "aabbc"
            replacement = "112233"
            "#,
        );

        assert!(r.is_err());
    }
}
