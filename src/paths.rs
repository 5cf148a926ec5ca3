//! Centralized path definitions for the bridge's config files.
//!
//! No other module should hard-code these names. Functions take the config
//! directory as `&Path` so the server binary and the CLI resolve the same files.

use std::path::{Path, PathBuf};

// ── Application identity ─────────────────────────────────────────

pub const APP_ID: &str = "design-bridge";

// ── Leaf filenames ───────────────────────────────────────────────

pub const SETTINGS_FILE: &str = "settings.json";
/// Written by the server on startup so the CLI can find the HTTP surface.
pub const PORT_FILE: &str = ".design-bridge-port";

// ── Config-dir functions ─────────────────────────────────────────

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE)
}

pub fn port_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(PORT_FILE)
}

/// `<platform config dir>/design-bridge`.
pub fn default_config_dir() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var("APPDATA")
            .map_or_else(|_| PathBuf::from("C:\\Users\\Default\\AppData\\Roaming"), PathBuf::from)
    } else if cfg!(target_os = "macos") {
        home_dir().join("Library/Application Support")
    } else {
        std::env::var("XDG_CONFIG_HOME").map_or_else(|_| home_dir().join(".config"), PathBuf::from)
    };
    base.join(APP_ID)
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
}
