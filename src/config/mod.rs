//! Configuration management for the coordinator server list.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
mod connection;
mod updater;

pub use connection::*;
pub use updater::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::Result;

/// Main configuration container for the server list components.
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RosterConfig {
    /// Background dissemination engine parameters
    pub updater: UpdaterConfig,
    /// gRPC connection parameters for update RPCs
    pub connection: ConnectionConfig,
}

impl RosterConfig {
    /// Creates a new configuration with hierarchical override support.
    ///
    /// Configuration sources are merged in the following order (later
    /// sources override earlier ones):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable
    /// 3. Environment variables with `ROSTER__` prefix (highest priority)
    ///
    /// # Example
    /// ```ignore
    /// std::env::set_var("ROSTER__UPDATER__CONCURRENT_RPCS", "8");
    /// let cfg = RosterConfig::new()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-component configuration rules.
    pub fn validate(&self) -> Result<()> {
        self.updater.validate()?;
        self.connection.validate()?;
        Ok(())
    }
}
