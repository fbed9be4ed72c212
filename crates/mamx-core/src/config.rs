//! Modal aerosol configuration
//!
//! A [`ModalConfig`] describes which aerosol modes exist, which chemical species each mode
//! carries and which aerosol-related gases are tracked.
//! It is the single source of truth for the species-presence pattern:
//! the tracer catalog, the scratch buffer layout and the wet/dry bindings are all derived
//! from the same value.
//!
//! # Examples
//!
//! ```rust
//! use mamx_core::config::ModalConfig;
//!
//! let config = ModalConfig::from_toml_str(
//!     r#"
//!     species = ["so4", "bc"]
//!     gases = ["SO2"]
//!
//!     [[modes]]
//!     name = "accumulation"
//!     species = ["so4", "bc"]
//!
//!     [[modes]]
//!     name = "aitken"
//!     species = ["so4"]
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.modes.len(), 2);
//! ```

use crate::errors::{MamError, MamResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single lognormal aerosol mode and the species populated within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDefinition {
    /// Human readable mode name (e.g. "accumulation")
    pub name: String,
    /// Names of the species present in this mode.
    ///
    /// Every entry must appear in [`ModalConfig::species`].
    /// Species missing from this list are absent for the lifetime of a run.
    pub species: Vec<String>,
}

impl ModeDefinition {
    pub fn new(name: &str, species: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            species: species.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Mode/species/gas configuration of a modal aerosol scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalConfig {
    /// The species table.
    ///
    /// The position of a species in this table is its species index.
    pub species: Vec<String>,
    /// Modes, in mode-index order.
    pub modes: Vec<ModeDefinition>,
    /// Aerosol-related gases, in gas-index order.
    pub gases: Vec<String>,
}

impl ModalConfig {
    /// The four-mode MAM4 configuration
    ///
    /// Modes: accumulation, aitken, coarse and primary carbon.
    pub fn mam4() -> Self {
        Self {
            species: ["so4", "pom", "soa", "bc", "dst", "ncl", "mom"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            modes: vec![
                ModeDefinition::new(
                    "accumulation",
                    &["so4", "pom", "soa", "bc", "dst", "ncl", "mom"],
                ),
                ModeDefinition::new("aitken", &["so4", "soa", "ncl", "mom"]),
                ModeDefinition::new("coarse", &["dst", "ncl", "so4", "bc", "pom", "soa", "mom"]),
                ModeDefinition::new("primary_carbon", &["pom", "bc", "mom"]),
            ],
            gases: ["O3", "H2O2", "H2SO4", "SO2", "DMS", "SOAG"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Parse and validate a configuration from a TOML document.
    pub fn from_toml_str(contents: &str) -> MamResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is internally consistent.
    pub fn validate(&self) -> MamResult<()> {
        if self.modes.is_empty() {
            return Err(MamError::Configuration(
                "At least one aerosol mode is required".to_string(),
            ));
        }

        let mut table = HashSet::new();
        for name in &self.species {
            if name.is_empty() {
                return Err(MamError::Configuration(
                    "Species names must not be empty".to_string(),
                ));
            }
            if !table.insert(name.as_str()) {
                return Err(MamError::Configuration(format!(
                    "Species '{}' appears more than once in the species table",
                    name
                )));
            }
        }

        for mode in &self.modes {
            let mut seen = HashSet::new();
            for name in &mode.species {
                if !table.contains(name.as_str()) {
                    return Err(MamError::Configuration(format!(
                        "Mode '{}' lists species '{}' which is not in the species table {:?}",
                        mode.name, name, self.species
                    )));
                }
                if !seen.insert(name.as_str()) {
                    return Err(MamError::Configuration(format!(
                        "Mode '{}' lists species '{}' more than once",
                        mode.name, name
                    )));
                }
            }
        }

        let mut gases = HashSet::new();
        for gas in &self.gases {
            if gas.is_empty() {
                return Err(MamError::Configuration(
                    "Gas names must not be empty".to_string(),
                ));
            }
            if !gases.insert(gas.as_str()) {
                return Err(MamError::Configuration(format!(
                    "Gas '{}' appears more than once",
                    gas
                )));
            }
        }

        Ok(())
    }
}

impl Default for ModalConfig {
    fn default() -> Self {
        Self::mam4()
    }
}
