/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Process-wide configuration. It is loaded once at startup and is immutable
//! afterwards.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cli::args::LogLevel,
    patch::hexpatch::{self, HexPatchCatalog, HexPatchRule},
    tool::{Tools, cpio, magiskboot},
    util,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config")]
    Parse(#[source] toml_edit::de::Error),
    #[error("{0} must be a relative path without `..`: {1:?}")]
    InvalidPath(&'static str, PathBuf),
    #[error("Invalid fixed output name: {0:?}")]
    InvalidOutputName(String),
    #[error("Invalid hex patch catalog")]
    Catalog(#[from] hexpatch::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_PATH: &str = "uniboot.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Directory containing all of the tools.
    pub bin_dir: Option<PathBuf>,
    /// Explicit `magiskboot` path. Takes precedence over `bin_dir`.
    pub magiskboot: Option<PathBuf>,
    /// Explicit `cpio` path. Takes precedence over `bin_dir`.
    pub cpio: Option<PathBuf>,
}

impl ToolsConfig {
    fn resolve(&self, explicit: Option<&Path>, name: &str) -> PathBuf {
        if let Some(path) = explicit {
            path.to_owned()
        } else if let Some(dir) = &self.bin_dir {
            dir.join(name)
        } else {
            // Let the OS search PATH.
            PathBuf::from(name)
        }
    }

    pub fn tools(&self) -> Tools {
        Tools {
            magiskboot: self.resolve(self.magiskboot.as_deref(), magiskboot::NAME),
            cpio: self.resolve(self.cpio.as_deref(), cpio::NAME),
        }
    }
}

/// How the file name of the patched image is chosen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputName {
    /// Base the name on the name of the uploaded file.
    #[default]
    Original,
    /// Always use the same base name.
    Fixed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Parent directory for workspaces. The system temporary directory is used
    /// if unset.
    pub work_dir: Option<PathBuf>,
    /// Directory inside the ramdisk that is searched for fstab files.
    pub fstab_dir: PathBuf,
    /// Whether to blank AVB options in the device tree blobs.
    pub strip_dtb: bool,
    /// Unpacked device tree blobs, relative to the workspace.
    pub dtb_files: Vec<PathBuf>,
    /// Fail if no hex patch rule matched.
    pub require_hexpatch_match: bool,
    pub output_name: OutputName,
    /// Largest accepted boot image, in bytes.
    pub max_upload_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            fstab_dir: PathBuf::from("first_stage_ramdisk"),
            strip_dtb: true,
            dtb_files: vec![PathBuf::from("kernel_dtb"), PathBuf::from("dtb")],
            require_hexpatch_match: false,
            output_name: OutputName::default(),
            max_upload_size: 256 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HexPatchConfig {
    /// Whether to include the rules that ship with uniboot.
    pub builtin: bool,
    /// Additional rules. These are applied after the built-in ones.
    #[serde(rename = "rule")]
    pub rules: Vec<HexPatchRule>,
}

impl Default for HexPatchConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            rules: vec![],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log_level: Option<LogLevel>,
    pub tools: ToolsConfig,
    pub pipeline: PipelineConfig,
    pub hexpatch: HexPatchConfig,
}

impl Config {
    /// Parse a config from a TOML string. Relative paths are resolved against
    /// `base_dir`, except for tool paths that consist of a bare name, which are
    /// searched for in `PATH`.
    pub fn from_toml(data: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = toml_edit::de::from_str(data).map_err(Error::Parse)?;
        config.validate()?;
        config.resolve_paths(base_dir);

        Ok(config)
    }

    /// Load a config file. Relative paths inside are resolved against the
    /// directory containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

        Self::from_toml(&data, util::parent_path(path))
    }

    /// Load the config from `path` if specified. Otherwise, load
    /// [`DEFAULT_PATH`] if it exists or fall back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        match Self::load(Path::new(DEFAULT_PATH)) {
            Err(Error::Read(_, e)) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            r => r,
        }
    }

    fn validate(&self) -> Result<()> {
        if !util::is_contained_path(&self.pipeline.fstab_dir) {
            return Err(Error::InvalidPath(
                "pipeline.fstab_dir",
                self.pipeline.fstab_dir.clone(),
            ));
        }

        for path in &self.pipeline.dtb_files {
            if !util::is_contained_path(path) {
                return Err(Error::InvalidPath("pipeline.dtb_files", path.clone()));
            }
        }

        if let OutputName::Fixed(name) = &self.pipeline.output_name {
            if name.is_empty()
                || !name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            {
                return Err(Error::InvalidOutputName(name.clone()));
            }
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        for path in [&mut self.tools.bin_dir, &mut self.pipeline.work_dir]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }

        // A bare name is looked up in PATH.
        for path in [&mut self.tools.magiskboot, &mut self.tools.cpio]
            .into_iter()
            .flatten()
        {
            if path.is_relative() && path.components().count() > 1 {
                *path = base_dir.join(&*path);
            }
        }
    }

    /// Build and validate the hex patch catalog.
    pub fn catalog(&self) -> Result<HexPatchCatalog> {
        let mut rules = if self.hexpatch.builtin {
            HexPatchCatalog::builtin_rules()?
        } else {
            vec![]
        };
        rules.extend(self.hexpatch.rules.iter().cloned());

        Ok(HexPatchCatalog::new(rules)?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("", Path::new("/etc/uniboot")).unwrap();
        assert_eq!(config, Config::default());

        let tools = config.tools.tools();
        assert_eq!(tools, Tools::default());

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog, HexPatchCatalog::builtin().unwrap());
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [tools]
            bin_dir = "bin"
            cpio = "/usr/bin/cpio"

            [pipeline]
            work_dir = "work"
            fstab_dir = "."
            strip_dtb = false
            dtb_files = ["dtb"]
            require_hexpatch_match = true
            output_name = { fixed = "uniboot" }
            max_upload_size = 1024

            [hexpatch]
            builtin = false

            [[hexpatch.rule]]
            variant = "test"
            target = "system/bin/recovery"
            original = "aabbcc"
            replacement = "112233"
            "#,
            Path::new("/etc/uniboot"),
        )
        .unwrap();

        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(
            config.tools.tools(),
            Tools {
                magiskboot: PathBuf::from("/etc/uniboot/bin/magiskboot"),
                cpio: PathBuf::from("/usr/bin/cpio"),
            },
        );
        assert_eq!(
            config.pipeline,
            PipelineConfig {
                work_dir: Some(PathBuf::from("/etc/uniboot/work")),
                fstab_dir: PathBuf::from("."),
                strip_dtb: false,
                dtb_files: vec![PathBuf::from("dtb")],
                require_hexpatch_match: true,
                output_name: OutputName::Fixed("uniboot".to_owned()),
                max_upload_size: 1024,
            },
        );

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.rules().len(), 1);
        assert_eq!(catalog.rules()[0].variant, "test");
        assert_eq!(catalog.rules()[0].original, b"\xaa\xbb\xcc");
    }

    #[test]
    fn bare_tool_name_uses_path() {
        let config = Config::from_toml(
            r#"
            [tools]
            magiskboot = "magiskboot64"
            cpio = "tools/cpio"
            "#,
            Path::new("/srv"),
        )
        .unwrap();

        let tools = config.tools.tools();
        assert_eq!(tools.magiskboot, Path::new("magiskboot64"));
        assert_eq!(tools.cpio, Path::new("/srv/tools/cpio"));
    }

    #[test]
    fn unknown_key() {
        let err =
            Config::from_toml("[pipeline]\nstrip_fstab = false\n", Path::new(".")).unwrap_err();
        assert_matches!(err, Error::Parse(_));
    }

    #[test]
    fn escaping_dtb_path() {
        let err = Config::from_toml("[pipeline]\ndtb_files = [\"../dtb\"]\n", Path::new("."))
            .unwrap_err();
        assert_matches!(err, Error::InvalidPath("pipeline.dtb_files", _));
    }

    #[test]
    fn invalid_fixed_name() {
        let err = Config::from_toml(
            "[pipeline]\noutput_name = { fixed = \"../boot\" }\n",
            Path::new("."),
        )
        .unwrap_err();
        assert_matches!(err, Error::InvalidOutputName(_));
    }

    #[test]
    fn mismatched_rule_rejected_at_load() {
        let config = Config::from_toml(
            r#"
            [[hexpatch.rule]]
            variant = "short"
            original = "aabbcc"
            replacement = "1122"
            "#,
            Path::new("."),
        )
        .unwrap();

        let err = config.catalog().unwrap_err();
        assert_matches!(
            err,
            Error::Catalog(hexpatch::Error::LengthMismatch { .. })
        );
    }

    #[test]
    fn missing_default_file() {
        let err = Config::load(Path::new("/nonexistent/uniboot.toml")).unwrap_err();
        assert_matches!(err, Error::Read(_, e) if e.kind() == io::ErrorKind::NotFound);
    }
}
