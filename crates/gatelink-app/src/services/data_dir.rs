// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution.

use std::path::PathBuf;

use gatelink_core::error::Result;

const APP_DIR: &str = "gatelink";

/// Return the application data directory, creating it if needed.
///
/// On mobile the host app passes its sandboxed documents directory to
/// `AppServices::init_in` instead.
pub fn data_dir() -> Result<PathBuf> {
    let dir = resolve(
        std::env::var("XDG_DATA_HOME").ok(),
        std::env::var("HOME").ok(),
    );
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn resolve(xdg_data_home: Option<String>, home: Option<String>) -> PathBuf {
    let base = match (xdg_data_home, home) {
        (Some(xdg), _) if !xdg.is_empty() => PathBuf::from(xdg),
        (_, Some(home)) if !home.is_empty() => PathBuf::from(home).join(".local").join("share"),
        _ => std::env::temp_dir(),
    };
    base.join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_wins() {
        let dir = resolve(Some("/data".into()), Some("/home/u".into()));
        assert_eq!(dir, PathBuf::from("/data/gatelink"));
    }

    #[test]
    fn home_fallback() {
        let dir = resolve(None, Some("/home/u".into()));
        assert_eq!(dir, PathBuf::from("/home/u/.local/share/gatelink"));
    }

    #[test]
    fn empty_xdg_is_ignored() {
        let dir = resolve(Some(String::new()), Some("/home/u".into()));
        assert_eq!(dir, PathBuf::from("/home/u/.local/share/gatelink"));
    }

    #[test]
    fn last_resort_is_temp() {
        assert_eq!(resolve(None, None), std::env::temp_dir().join("gatelink"));
    }
}
