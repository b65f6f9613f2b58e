/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Sequencing of every stage that turns an uploaded boot image into a patched
//! one. Each request gets its own [`Workspace`], which is destroyed on every
//! exit path.

use std::{
    fmt, fs, io,
    path::Path,
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::{debug, debug_span, info, trace, warn};

use crate::{
    config::{self, Config, OutputName, PipelineConfig},
    patch::{
        dtb, fstab,
        hexpatch::{self, HexPatchCatalog},
    },
    stream,
    tool::{
        self, Tools,
        cpio::{self, RAMDISK_DIR},
        magiskboot::{self, BOOT_IMAGE, PATCHED_IMAGE},
    },
    util,
    workspace::Workspace,
};

/// Message returned to clients for every failure that is not their fault.
pub const GENERIC_ERROR_MESSAGE: &str = "Unknown error occurred";

/// Fallback base name for the patched image.
const DEFAULT_BASE_NAME: &str = "boot";
/// Length of the random suffix in the patched image's file name.
const SUFFIX_LEN: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Workspace,
    Unpack,
    RamdiskExtract,
    HexPatch,
    FstabStrip,
    DtbStrip,
    RamdiskCreate,
    Repack,
    Artifact,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Unpack => "unpack",
            Self::RamdiskExtract => "ramdisk-extract",
            Self::HexPatch => "hexpatch",
            Self::FstabStrip => "fstab-strip",
            Self::DtbStrip => "dtb-strip",
            Self::RamdiskCreate => "ramdisk-create",
            Self::Repack => "repack",
            Self::Artifact => "artifact",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single pipeline run. Failures are not a state. They end the
/// run immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    Unpacked,
    RamdiskExtracted,
    HexPatched,
    AvbStripped,
    RamdiskRepacked,
    Repacked,
    Done,
}

/// Broad classification of a [`Error`], used for mapping onto a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ClientInput,
    ToolInvocation,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    ClientInput(String),
    #[error("Stage {0} failed")]
    Tool(Stage, #[source] tool::Error),
    #[error("Stage {} failed", Stage::HexPatch)]
    HexPatch(#[source] hexpatch::Error),
    #[error("Stage {0} failed")]
    Io(Stage, #[source] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        fn tool_kind(e: &tool::Error) -> ErrorKind {
            match e {
                tool::Error::File(_, _) => ErrorKind::Io,
                _ => ErrorKind::ToolInvocation,
            }
        }

        match self {
            Self::ClientInput(_) => ErrorKind::ClientInput,
            Self::Tool(_, e) | Self::HexPatch(hexpatch::Error::Tool(_, e)) => tool_kind(e),
            Self::HexPatch(hexpatch::Error::Cancelled(_, _)) | Self::Io(_, _) => ErrorKind::Io,
            Self::HexPatch(_) => ErrorKind::ToolInvocation,
        }
    }

    /// The stage that failed. Client input errors happen before any stage.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ClientInput(_) => None,
            Self::Tool(s, _) | Self::Io(s, _) => Some(*s),
            Self::HexPatch(_) => Some(Stage::HexPatch),
        }
    }

    /// The hex patch variant that was being applied, if any.
    pub fn variant(&self) -> Option<&str> {
        match self {
            Self::HexPatch(e) => e.variant(),
            _ => None,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::ClientInput => 400,
            ErrorKind::ToolInvocation | ErrorKind::Io => 500,
        }
    }

    /// Message that is safe to show to the client. Internal details are only
    /// ever logged.
    pub fn public_message(&self) -> &str {
        match self {
            Self::ClientInput(msg) => msg,
            _ => GENERIC_ERROR_MESSAGE,
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// A boot image submitted for patching.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Upload {
    /// Name of the file on the client side. Only used for naming the result.
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

/// A patched boot image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Run `f` as `stage`, unless cancellation was requested.
fn stage<T>(
    stage: Stage,
    cancel_signal: &AtomicBool,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    stream::check_cancel(cancel_signal).map_err(|e| Error::Io(stage, e))?;

    let _span = debug_span!("stage", name = stage.as_str()).entered();
    trace!("Starting stage");

    f()
}

/// Reduce a client-supplied file name to something that is safe to embed in
/// the output file name.
fn base_name(file_name: Option<&str>) -> String {
    let name = file_name
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .and_then(|n| n.split('.').next())
        .unwrap_or_default();

    if name.is_empty() {
        return DEFAULT_BASE_NAME.to_owned();
    }

    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The patching pipeline. An instance only holds immutable configuration, so it
/// can serve any number of requests concurrently.
#[derive(Clone, Debug)]
pub struct Pipeline {
    tools: Tools,
    catalog: HexPatchCatalog,
    options: PipelineConfig,
}

impl Pipeline {
    pub fn new(tools: Tools, catalog: HexPatchCatalog, options: PipelineConfig) -> Self {
        Self {
            tools,
            catalog,
            options,
        }
    }

    pub fn from_config(config: &Config) -> std::result::Result<Self, config::Error> {
        Ok(Self::new(
            config.tools.tools(),
            config.catalog()?,
            config.pipeline.clone(),
        ))
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    pub fn catalog(&self) -> &HexPatchCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &PipelineConfig {
        &self.options
    }

    /// Reject uploads that can never be patched.
    pub fn validate(&self, upload: &Upload) -> Result<()> {
        if upload.data.is_empty() {
            return Err(Error::ClientInput("No boot image was uploaded".to_owned()));
        } else if upload.data.len() as u64 > self.options.max_upload_size {
            return Err(Error::ClientInput(format!(
                "Boot image exceeds {} bytes",
                self.options.max_upload_size,
            )));
        }

        Ok(())
    }

    /// Generate `<base>_patched_<suffix>.img`, where the base is derived from
    /// the upload's file name or the configured fixed name.
    pub fn output_file_name(&self, upload_name: Option<&str>) -> String {
        let base = match &self.options.output_name {
            OutputName::Original => base_name(upload_name),
            OutputName::Fixed(name) => name.clone(),
        };

        format!(
            "{base}_patched_{}.img",
            util::random_alphanumeric(SUFFIX_LEN),
        )
    }

    /// Patch a single boot image. The workspace is destroyed before this
    /// returns, whether or not patching succeeded.
    pub fn run(&self, upload: &Upload, cancel_signal: &AtomicBool) -> Result<Artifact> {
        let _span = debug_span!("request", name = upload.file_name.as_deref()).entered();

        self.validate(upload)?;

        let workspace = Workspace::create(self.options.work_dir.as_deref())
            .map_err(|e| Error::Io(Stage::Workspace, e))?;
        let workspace_path = workspace.path().to_owned();

        let result = self.execute(workspace.path(), upload, cancel_signal);

        let data = match (result, workspace.destroy()) {
            (Ok(data), Ok(())) => data,
            (Ok(_), Err(e)) => return Err(Error::Io(Stage::Workspace, e)),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!("Failed to destroy workspace: {workspace_path:?}: {cleanup_err}");
                return Err(e);
            }
        };

        let artifact = Artifact {
            file_name: self.output_file_name(upload.file_name.as_deref()),
            data,
        };

        info!(
            "Patched {:?} into {:?} ({} bytes)",
            upload.file_name.as_deref().unwrap_or_default(),
            artifact.file_name,
            artifact.data.len(),
        );

        Ok(artifact)
    }

    fn execute(&self, dir: &Path, upload: &Upload, cancel_signal: &AtomicBool) -> Result<Vec<u8>> {
        stage(Stage::Workspace, cancel_signal, || {
            fs::write(dir.join(BOOT_IMAGE), &upload.data)
                .map_err(|e| Error::Io(Stage::Workspace, e))
        })?;

        let mut state = State::Init;

        while state != State::Repacked {
            state = self.advance(state, dir, cancel_signal)?;
            trace!("Pipeline state: {state:?}");
        }

        let data = stage(Stage::Artifact, cancel_signal, || {
            fs::read(dir.join(PATCHED_IMAGE)).map_err(|e| Error::Io(Stage::Artifact, e))
        })?;
        trace!("Pipeline state: {:?}", State::Done);

        Ok(data)
    }

    /// Perform the transition out of `state`. Terminal states do not advance.
    fn advance(&self, state: State, dir: &Path, cancel_signal: &AtomicBool) -> Result<State> {
        let tools = &self.tools;

        let next = match state {
            State::Init => {
                stage(Stage::Unpack, cancel_signal, || {
                    magiskboot::unpack(tools, dir).map_err(|e| Error::Tool(Stage::Unpack, e))
                })?;
                State::Unpacked
            }
            State::Unpacked => {
                stage(Stage::RamdiskExtract, cancel_signal, || {
                    cpio::extract(tools, dir, cancel_signal)
                        .map_err(|e| Error::Tool(Stage::RamdiskExtract, e))
                })?;
                State::RamdiskExtracted
            }
            State::RamdiskExtracted => {
                stage(Stage::HexPatch, cancel_signal, || self.hexpatch(dir, cancel_signal))?;
                State::HexPatched
            }
            State::HexPatched => {
                stage(Stage::FstabStrip, cancel_signal, || {
                    self.strip_fstab(dir, cancel_signal)
                })?;
                stage(Stage::DtbStrip, cancel_signal, || self.strip_dtb(dir))?;
                State::AvbStripped
            }
            State::AvbStripped => {
                stage(Stage::RamdiskCreate, cancel_signal, || {
                    cpio::create(tools, dir, cancel_signal)
                        .map_err(|e| Error::Tool(Stage::RamdiskCreate, e))
                })?;
                State::RamdiskRepacked
            }
            State::RamdiskRepacked => {
                stage(Stage::Repack, cancel_signal, || {
                    magiskboot::repack(tools, dir).map_err(|e| Error::Tool(Stage::Repack, e))
                })?;
                State::Repacked
            }
            State::Repacked | State::Done => state,
        };

        Ok(next)
    }

    fn hexpatch(&self, dir: &Path, cancel_signal: &AtomicBool) -> Result<()> {
        let applied = hexpatch::apply(
            &self.tools,
            dir,
            &self.catalog,
            self.options.require_hexpatch_match,
            cancel_signal,
        )
        .map_err(Error::HexPatch)?;

        if applied.is_empty() {
            debug!("No hex patch variant matched");
        } else {
            debug!("Applied hex patch variants: {applied:?}");
        }

        Ok(())
    }

    fn strip_fstab(&self, dir: &Path, cancel_signal: &AtomicBool) -> Result<()> {
        let fstab_dir = dir.join(RAMDISK_DIR).join(&self.options.fstab_dir);

        let modified = fstab::strip_dir(&fstab_dir, cancel_signal)
            .map_err(|e| Error::Io(Stage::FstabStrip, e))?;

        debug!("Stripped AVB options from {} fstab files", modified.len());

        Ok(())
    }

    fn strip_dtb(&self, dir: &Path) -> Result<()> {
        if !self.options.strip_dtb {
            trace!("DTB stripping is disabled");
            return Ok(());
        }

        for name in &self.options.dtb_files {
            let path = dir.join(name);

            match dtb::strip_file(&path).map_err(|e| Error::Io(Stage::DtbStrip, e))? {
                Some(count) => debug!("Blanked {count} AVB spans in {name:?}"),
                None => trace!("DTB does not exist: {name:?}"),
            }
        }

        Ok(())
    }
}
