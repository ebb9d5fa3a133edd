//! Configuration module
//!
//! Handles chamber settings, thermal cycling presets and default paths

mod settings;

pub use settings::{AppConfig, ChamberConfig, ConfigError, LoggingConfig, ProgramConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "climatectl", "climatectl")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the default configuration file
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the program lock file for a chamber
pub fn lock_file(chamber: &str) -> PathBuf {
    let name = format!("{}.lock", sanitize(chamber));
    data_dir()
        .map(|d| d.join("locks").join(&name))
        .unwrap_or_else(|| std::env::temp_dir().join("climatectl").join(name))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
