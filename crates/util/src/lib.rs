//! Process setup shared by the order board binaries: `.env` loading and
//! [`AppConfig`] resolution.

pub mod config;

use std::path::PathBuf;

pub use config::{AppConfig, ConfigError, Environment, DEFAULT_BIND_ADDR};

/// Loads `.env` from the working directory or one of its parents.
///
/// Returns the file that was applied, if any. Variables already present in
/// the process environment win over the file.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
