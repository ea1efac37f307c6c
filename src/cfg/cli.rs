// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Resolves a configuration path. Absolute paths pass through; relative
/// paths are tried against the working directory first and then beside the
/// server binary, since embedded deployments often launch from `/` with the
/// config shipped next to the executable.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    if p.is_absolute() {
        return p
            .canonicalize()
            .with_context(|| format!("missing config file {rel:?}"));
    }

    let cwd = std::env::current_dir().context("cannot get current working dir")?;
    let candidate = cwd.join(p);
    if candidate.is_file() {
        return candidate
            .canonicalize()
            .with_context(|| format!("failed to canonicalize {candidate:?}"));
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let candidate = dir.join(p);
        if candidate.is_file() {
            return candidate
                .canonicalize()
                .with_context(|| format!("failed to canonicalize {candidate:?}"));
        }
    }

    bail!(
        "config file {rel:?} not found under {} or beside the binary",
        cwd.display()
    )
}
