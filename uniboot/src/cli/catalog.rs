/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use crate::{config::Config, patch::hexpatch::HexPatchRule};

#[derive(Serialize)]
struct RuleList<'a> {
    rule: &'a [HexPatchRule],
}

pub fn catalog_main(cli: &CatalogCli, config: &Config) -> Result<()> {
    let catalog = config
        .catalog()
        .context("Failed to load hex patch catalog")?;

    if cli.toml {
        let data = toml_edit::ser::to_string_pretty(&RuleList {
            rule: catalog.rules(),
        })
        .context("Failed to serialize hex patch catalog")?;

        print!("{data}");
    } else if catalog.is_empty() {
        println!("No hex patch rules are enabled");
    } else {
        for rule in catalog.rules() {
            println!("{}", rule.variant);
            println!("  Target:      {:?}", rule.target);
            println!("  Original:    {}", hex::encode(&rule.original));
            println!("  Replacement: {}", hex::encode(&rule.replacement));
        }
    }

    Ok(())
}

/// List the enabled hex patch rules in the order they are applied.
#[derive(Debug, Parser)]
pub struct CatalogCli {
    /// Print rules as TOML suitable for the config file.
    #[arg(long)]
    pub toml: bool,
}
