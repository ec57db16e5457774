// Config roams with the profile (%APPDATA%); the session cache stays local (%LOCALAPPDATA%).

use std::env;
use std::path::PathBuf;

use super::APP_DIR;

fn known_folder(var: &str, fallback: &str) -> PathBuf {
    PathBuf::from(env::var(var).unwrap_or_else(|_| String::from(fallback))).join(APP_DIR)
}

pub fn get_config_dir() -> PathBuf {
    known_folder("APPDATA", "C:\\Users\\Default\\AppData\\Roaming")
}

pub fn get_data_dir() -> PathBuf {
    known_folder("LOCALAPPDATA", "C:\\Users\\Default\\AppData\\Local")
}
