// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::{Path, PathBuf};

/// The kiosk's data directory, created if needed.
pub fn data_dir() -> PathBuf {
    let dir = base_dir(|key| std::env::var(key).ok()).join("kiosk");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// `config.json` inside `dir`, if one is there.
pub fn default_config(dir: &Path) -> Option<PathBuf> {
    let path = dir.join("config.json");
    path.is_file().then_some(path)
}

fn base_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    // XDG data dir, then ~/.local/share
    if let Some(xdg) = lookup("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Some(home) = lookup("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from("/var/lib")
}
