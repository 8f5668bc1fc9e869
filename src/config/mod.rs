//! Configuration module for Linksweep
//!
//! This module handles loading, parsing, sanitizing and validating the TOML
//! configuration file.
//!
//! # Example
//!
//! ```no_run
//! use linksweep::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("linksweep.toml")).unwrap();
//! println!("Scanning {} in batches of {}", config.site.site_url, config.scan.batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, HttpConfig, ProxyConfig, ProxyServerConfig, RegionRule, ScanConfig, ScanMethod,
    ScheduleConfig, SiteConfig, Soft404Config, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
