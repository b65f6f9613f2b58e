/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    cli::status,
    patch::{dtb, fstab},
};

fn write_output(cli: &StripFileCli, data: &[u8], changed: bool) -> Result<()> {
    let path = match &cli.output {
        Some(p) => p,
        // Leave the input untouched if there is nothing to do.
        None if !changed => return Ok(()),
        None => &cli.input,
    };

    fs::write(path, data).with_context(|| format!("Failed to write data: {path:?}"))
}

pub fn strip_main(cli: &StripCli) -> Result<()> {
    match &cli.command {
        StripCommand::Dtb(c) => {
            let mut data =
                fs::read(&c.input).with_context(|| format!("Failed to read DTB: {:?}", c.input))?;
            let count = dtb::strip(&mut data);

            write_output(c, &data, count > 0)?;

            status!("Blanked {count} AVB spans");
        }
        StripCommand::Fstab(c) => {
            let data = fs::read(&c.input)
                .with_context(|| format!("Failed to read fstab: {:?}", c.input))?;
            let new_data = fstab::strip(&data);
            let removed = data.len() - new_data.len();

            write_output(c, &new_data, removed > 0)?;

            status!("Removed {removed} bytes of AVB options");
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
struct StripFileCli {
    /// Path to input file.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Path to output file.
    ///
    /// If unset, the input file is modified in place.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum StripCommand {
    /// Blank out AVB options in a device tree blob.
    Dtb(StripFileCli),
    /// Remove AVB options from an fstab file.
    Fstab(StripFileCli),
}

/// Run a single AVB stripper on a local file.
#[derive(Debug, Parser)]
pub struct StripCli {
    #[command(subcommand)]
    command: StripCommand,
}
