// Both config and data live under ~/Library/Application Support.

use std::env;
use std::path::PathBuf;

use super::APP_DIR;

fn support_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
        .join("Library")
        .join("Application Support")
        .join(APP_DIR)
}

pub fn get_config_dir() -> PathBuf {
    support_dir()
}

pub fn get_data_dir() -> PathBuf {
    support_dir()
}
