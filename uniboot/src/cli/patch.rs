/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, debug_span};

use crate::{
    cli::{status, warning},
    config::Config,
    pipeline::{self, Pipeline, Upload},
    stream,
};

fn patch_file(
    pipeline: &Pipeline,
    input: &Path,
    output_dir: &Path,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    let file =
        File::open(input).with_context(|| format!("Failed to open for reading: {input:?}"))?;
    let data = stream::read_limited(file, pipeline.options().max_upload_size, cancel_signal)
        .with_context(|| format!("Failed to read boot image: {input:?}"))?;

    let upload = Upload {
        file_name: input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        data,
    };

    let artifact = pipeline
        .run(&upload, cancel_signal)
        .with_context(|| format!("Failed to patch boot image: {input:?}"))?;

    let output = output_dir.join(&artifact.file_name);
    fs::write(&output, &artifact.data)
        .with_context(|| format!("Failed to write patched image: {output:?}"))?;

    Ok(output)
}

pub fn patch_main(cli: &PatchCli, config: &Config, cancel_signal: &AtomicBool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).context("Failed to set up pipeline")?;

    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create directory: {:?}", cli.output_dir))?;

    status!("Patching {} boot images", cli.inputs.len());

    let results = cli
        .inputs
        .par_iter()
        .map(|input| {
            let _span = debug_span!("input", path = ?input).entered();

            patch_file(&pipeline, input, &cli.output_dir, cancel_signal)
        })
        .collect::<Vec<_>>();

    let mut failed = 0;

    for (input, result) in cli.inputs.iter().zip(results) {
        match result {
            Ok(output) => status!("Patched {input:?} -> {output:?}"),
            Err(e) => {
                let reason = e
                    .downcast_ref::<pipeline::Error>()
                    .map_or_else(|| e.to_string(), |pe| pe.public_message().to_owned());

                warning!("Failed to patch {input:?}: {reason}");
                debug!("{e:?}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("Failed to patch {failed} of {} boot images", cli.inputs.len());
    }

    Ok(())
}

/// Strip AVB enforcement from boot images and apply fastbootd fixes.
#[derive(Debug, Parser)]
pub struct PatchCli {
    /// Path to input boot image.
    ///
    /// Can be specified multiple times. All images are patched concurrently.
    #[arg(
        short,
        long = "input",
        value_name = "FILE",
        value_parser,
        required = true
    )]
    pub inputs: Vec<PathBuf>,

    /// Directory to write patched boot images to.
    #[arg(short, long, value_name = "DIR", value_parser, default_value = ".")]
    pub output_dir: PathBuf,
}
