//! Sharecast server configuration.
//!
//! TOML-based configuration with full validation. Every section uses serde
//! defaults, so a partial (or empty) config file works out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sharecast_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("signaling on port {}", config.signaling.port);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    CodecConfig, EngineConfig, HttpConfig, LoggingConfig, MediaConfig, ShareConfig,
    SignalingConfig,
};
pub use toml_loader::{create_default_config, default_config_path, load_default, load_from_path};

use sharecast_common::ConfigError;

/// Load config from the platform default path and validate it.
///
/// Creates a commented default file if none exists yet.
pub fn load_config() -> Result<ShareConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}
