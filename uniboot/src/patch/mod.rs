/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod dtb;
pub mod fstab;
pub mod hexpatch;
