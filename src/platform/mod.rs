// marksync platform paths
// Resolves where the config file and the local session cache live on each OS.

use std::path::PathBuf;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as os;
#[cfg(target_os = "macos")]
use macos as os;
#[cfg(target_os = "windows")]
use windows as os;

/// Directory name used under the per-user config and data roots.
pub const APP_DIR: &str = "marksync";

/// File name of the session cache inside the data directory.
pub const SESSION_DB_FILE: &str = "session.db";

/// Returns the directory holding `config.json`.
///
/// - **Linux**: `$XDG_CONFIG_HOME/marksync` or `~/.config/marksync`
/// - **macOS**: `~/Library/Application Support/marksync`
/// - **Windows**: `%APPDATA%/marksync`
pub fn get_config_dir() -> PathBuf {
    os::get_config_dir()
}

/// Returns the directory holding the session cache.
///
/// - **Linux**: `$XDG_DATA_HOME/marksync` or `~/.local/share/marksync`
/// - **macOS**: `~/Library/Application Support/marksync`
/// - **Windows**: `%LOCALAPPDATA%/marksync`
pub fn get_data_dir() -> PathBuf {
    os::get_data_dir()
}
