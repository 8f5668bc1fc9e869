use crate::config::types::Config;
use crate::config::validation::{sanitize, validate};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Out-of-range tunables are corrected to their defaults before validation;
/// only structural problems (bad URLs, bad patterns, bad proxy entries) fail.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use linksweep::config::load_config;
///
/// let config = load_config(Path::new("linksweep.toml")).unwrap();
/// println!("Batch size: {}", config.scan.batch_size);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    sanitize(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is used to detect if the configuration has changed between scans.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
