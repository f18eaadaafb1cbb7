use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::pipeline::HEAD_MARKER;

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| GatewayError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.auth.shared_secret.is_empty() {
        return Err(GatewayError::Config(
            "auth.shared_secret must not be empty".to_string(),
        ));
    }

    if cfg.upstream.parse::<http::uri::Authority>().is_err() {
        return Err(GatewayError::Config(format!(
            "Invalid upstream authority: {}",
            cfg.upstream
        )));
    }

    // A cap smaller than the marker could never match it
    if cfg.injection.max_buffer_bytes < HEAD_MARKER.len() {
        return Err(GatewayError::Config(format!(
            "injection.max_buffer_bytes must be at least {}",
            HEAD_MARKER.len()
        )));
    }

    Ok(())
}
