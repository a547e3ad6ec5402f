// src/config.rs

//! Configuration loading utilities.
//!
//! The pipeline reads `config.toml` from the storage directory. Credentials
//! may come from the environment instead of the file; they are opaque
//! strings and are never logged.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Environment variable consulted when `[flickr] api_key` is absent.
pub const FLICKR_API_KEY_ENV: &str = "FLICKR_API_KEY";

/// Load configuration from the storage directory, applying environment
/// credential overrides.
///
/// Falls back to defaults if the file is missing or unreadable.
pub fn load_config(storage_dir: &Path) -> Config {
    let path = storage_dir.join("config.toml");
    let mut config = Config::load_or_default(&path);
    apply_env_overrides(&mut config);
    config
}

/// Load configuration and fail on validation errors.
pub fn load_validated(storage_dir: &Path) -> Result<Config> {
    let config = load_config(storage_dir);
    config.validate()?;
    Ok(config)
}

/// Fill credentials from the environment when the file omits them.
fn apply_env_overrides(config: &mut Config) {
    if config.flickr.api_key.is_none() {
        if let Ok(key) = std::env::var(FLICKR_API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.flickr.api_key = Some(key);
            }
        }
    }
}
