/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! uniboot takes a boot image, strips its AVB enforcement markers, applies
//! the device-specific fastbootd fixes, and hands back the repacked image.
//!
//! The image and archive formats are never parsed here. Decomposition and
//! recomposition are delegated to `magiskboot` and `cpio`, and the patching
//! stages only operate on the files those tools leave in the workspace.

pub mod cli;
pub mod config;
pub mod patch;
pub mod pipeline;
pub mod stream;
pub mod tool;
pub mod util;
pub mod workspace;
