/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{Level, debug};

use crate::{
    cli::{catalog, completion, patch, strip},
    config::Config,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Level and message only.
    #[default]
    Short,
    /// Timestamp, level, spans, and message.
    Medium,
    /// Everything, including the source location and thread name.
    Long,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Patch(patch::PatchCli),
    Catalog(catalog::CatalogCli),
    Strip(strip::StripCli),
    Completion(completion::CompletionCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file.
    ///
    /// If unset, uniboot.toml in the current directory is used if it exists.
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        value_parser,
        env = "UNIBOOT_CONFIG"
    )]
    pub config: Option<PathBuf>,

    /// Lowest log message severity to output.
    ///
    /// Overrides the log_level option in the config file.
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Output format for log messages.
    #[arg(long, global = true, value_name = "FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

/// Set up the global tracing subscriber. Log messages are written to stderr so
/// that they never mix with command output.
pub fn init_logging(level: LogLevel, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::from(level));

    match format {
        LogFormat::Short => builder.without_time().with_target(false).compact().init(),
        LogFormat::Medium => builder.with_target(false).init(),
        LogFormat::Long => builder
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .init(),
    }
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    init_logging(
        cli.log_level.or(config.log_level).unwrap_or_default(),
        cli.log_format,
    );
    logging_initialized.store(true, Ordering::SeqCst);

    debug!("Loaded configuration: {config:?}");

    match cli.command {
        Command::Patch(c) => patch::patch_main(&c, &config, cancel_signal),
        Command::Catalog(c) => catalog::catalog_main(&c, &config),
        Command::Strip(c) => strip::strip_main(&c),
        Command::Completion(c) => completion::completion_main(&c),
    }
}
