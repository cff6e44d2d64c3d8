// src/config.rs

//! Configuration loading utilities.
//!
//! The TOML file provides the bulk of the settings; credentials and the
//! index endpoint may also come from the environment so they stay out of
//! checked-in files.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Environment variables that override file settings.
pub const ENV_CLIENT_ID: &str = "MIRROR_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "MIRROR_CLIENT_SECRET";
pub const ENV_USERNAME: &str = "MIRROR_USERNAME";
pub const ENV_PASSWORD: &str = "MIRROR_PASSWORD";
pub const ENV_INDEX_URL: &str = "MIRROR_INDEX_URL";

/// Load configuration from a TOML file, then apply environment overrides.
///
/// A missing file falls back to defaults. Logs nothing, since it runs before
/// the logger is set up.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        Config::default()
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply overrides from a key lookup (the process environment in practice).
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup(ENV_CLIENT_ID) {
        config.upstream.client_id = v;
    }
    if let Some(v) = lookup(ENV_CLIENT_SECRET) {
        config.upstream.client_secret = v;
    }
    if let Some(v) = lookup(ENV_USERNAME) {
        config.upstream.username = Some(v);
    }
    if let Some(v) = lookup(ENV_PASSWORD) {
        config.upstream.password = Some(v);
    }
    if let Some(v) = lookup(ENV_INDEX_URL) {
        config.index.url = v;
    }
}
