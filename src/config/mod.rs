//! Configuration module for Ink-Lantern
//!
//! This module handles loading, parsing, and validating the TOML engine configuration.
//!
//! # Example
//!
//! ```no_run
//! use ink_lantern::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("lantern.toml")).unwrap();
//! println!("Pool capacity: {}", config.pool.capacity);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ChallengeConfig, Config, CrawlerConfig, FetchConfig, PoolConfig, RobotsConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
