//! Configuration of the wet scavenging process
//!
//! # Examples
//!
//! ```rust
//! use mamx_core::validation::IntervalPolicy;
//! use mamx_wetscav::config::WetScavConfig;
//!
//! let config = WetScavConfig::from_toml_str(
//!     r#"
//!     check_field_intervals = true
//!     interval_policy = "Fail"
//!     "#,
//! )
//! .unwrap();
//! assert!(config.check_field_intervals);
//! assert_eq!(config.interval_policy, IntervalPolicy::Fail);
//! // Unspecified sections fall back to MAM4
//! assert_eq!(config.modal.modes.len(), 4);
//! ```

use mamx_core::config::ModalConfig;
use mamx_core::errors::MamResult;
use mamx_core::validation::IntervalPolicy;
use mamx_core::FloatValue;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of [`crate::process::WetScavenging`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WetScavConfig {
    /// Modes, species and gases
    pub modal: ModalConfig,
    /// Check inputs before and outputs after every step
    pub check_field_intervals: bool,
    pub interval_policy: IntervalPolicy,
    /// Height of the surface above the geoid [m]
    pub surface_height: FloatValue,
}

impl Default for WetScavConfig {
    fn default() -> Self {
        Self {
            modal: ModalConfig::mam4(),
            check_field_intervals: false,
            interval_policy: IntervalPolicy::Warn,
            surface_height: 0.0,
        }
    }
}

impl WetScavConfig {
    /// Parse and validate a configuration from a TOML document.
    pub fn from_toml_str(contents: &str) -> MamResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.modal.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> MamResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
