//! Modal tracer catalog
//!
//! The catalog answers "which tracers exist and what are they called" for a [`ModalConfig`].
//! A modal tracer is identified by its mode, its constituent (the mode's number concentration
//! or the mass of one species) and its phase (interstitial or cloud-borne).
//! Gases are identified separately by their position in the gas table.
//!
//! Every other part of the coupling layer derives its structure from the catalog,
//! so the species-presence pattern only has to be stated once.

use crate::config::ModalConfig;
use crate::errors::{MamError, MamResult};
use indexmap::IndexSet;
use std::collections::HashSet;
use std::fmt;

/// Whether an aerosol tracer lives outside or inside cloud droplets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Interstitial,
    CloudBorne,
}

impl Phase {
    /// Single character tag used when building field names
    pub fn tag(&self) -> char {
        match self {
            Phase::Interstitial => 'a',
            Phase::CloudBorne => 'c',
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Interstitial => write!(f, "interstitial"),
            Phase::CloudBorne => write!(f, "cloud-borne"),
        }
    }
}

/// What quantity a modal tracer carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constituent {
    /// Number concentration of the mode
    Number,
    /// Mass of the species with the given index in the species table
    Mass(usize),
}

/// Identity of a single modal aerosol tracer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModalTracer {
    pub mode: usize,
    pub constituent: Constituent,
    pub phase: Phase,
}

impl ModalTracer {
    pub fn number(mode: usize, phase: Phase) -> Self {
        Self {
            mode,
            constituent: Constituent::Number,
            phase,
        }
    }

    pub fn mass(mode: usize, species: usize, phase: Phase) -> Self {
        Self {
            mode,
            constituent: Constituent::Mass(species),
            phase,
        }
    }
}

/// Any tracer known to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tracer {
    Modal(ModalTracer),
    /// Gas with the given index in the gas table
    Gas(usize),
}

impl From<ModalTracer> for Tracer {
    fn from(value: ModalTracer) -> Self {
        Tracer::Modal(value)
    }
}

/// Immutable description of the tracers of a modal aerosol scheme.
///
/// The catalog is deterministic: iterating it twice yields the same tracers in the same order.
/// It is typically shared between components using an `Arc`.
#[derive(Debug, Clone)]
pub struct TracerCatalog {
    config: ModalConfig,
    /// `presence[mode][species]`
    presence: Vec<Vec<bool>>,
    /// Advected tracers in constituent order
    constituents: IndexSet<Tracer>,
}

impl TracerCatalog {
    /// Build a catalog from a configuration.
    ///
    /// The configuration is validated first, then the generated tracer names are checked
    /// for collisions (e.g. a gas named like a modal tracer).
    pub fn new(config: ModalConfig) -> MamResult<Self> {
        config.validate()?;
        let catalog = Self::from_validated(config);

        let mut names = HashSet::new();
        for tracer in catalog.tracers() {
            let name = catalog.name(tracer);
            if !names.insert(name.clone()) {
                return Err(MamError::Configuration(format!(
                    "Tracer name '{}' is generated more than once",
                    name
                )));
            }
        }

        Ok(catalog)
    }

    /// The standard four-mode catalog
    pub fn mam4() -> Self {
        Self::from_validated(ModalConfig::mam4())
    }

    fn from_validated(config: ModalConfig) -> Self {
        let presence = config
            .modes
            .iter()
            .map(|mode| {
                config
                    .species
                    .iter()
                    .map(|name| mode.species.contains(name))
                    .collect()
            })
            .collect();
        let mut catalog = Self {
            config,
            presence,
            constituents: IndexSet::new(),
        };
        catalog.constituents = catalog
            .modal_tracers(Phase::Interstitial)
            .map(Tracer::Modal)
            .chain((0..catalog.num_gases()).map(Tracer::Gas))
            .collect();
        catalog
    }

    pub fn config(&self) -> &ModalConfig {
        &self.config
    }

    pub fn num_modes(&self) -> usize {
        self.config.modes.len()
    }

    pub fn num_species(&self) -> usize {
        self.config.species.len()
    }

    pub fn num_gases(&self) -> usize {
        self.config.gases.len()
    }

    /// Whether `species` is populated within `mode`.
    ///
    /// Indices outside the configured tables are never present.
    pub fn present(&self, mode: usize, species: usize) -> bool {
        self.presence
            .get(mode)
            .and_then(|row| row.get(species))
            .copied()
            .unwrap_or(false)
    }

    /// Global indices of the species populated in `mode`, ascending
    pub fn species_in_mode(&self, mode: usize) -> impl Iterator<Item = usize> + '_ {
        let row = self.presence.get(mode).map(|r| r.as_slice()).unwrap_or(&[]);
        row.iter()
            .enumerate()
            .filter_map(|(species, present)| present.then_some(species))
    }

    /// Number of species populated in `mode`
    pub fn num_species_in_mode(&self, mode: usize) -> usize {
        self.species_in_mode(mode).count()
    }

    /// Number of populated (mode, species) pairs
    pub fn num_present(&self) -> usize {
        (0..self.num_modes())
            .map(|mode| self.num_species_in_mode(mode))
            .sum()
    }

    /// Modal tracers of a single phase.
    ///
    /// For each mode in order: the number tracer, then each present species in ascending order.
    pub fn modal_tracers(&self, phase: Phase) -> impl Iterator<Item = ModalTracer> + '_ {
        (0..self.num_modes()).flat_map(move |mode| {
            std::iter::once(ModalTracer::number(mode, phase)).chain(
                self.species_in_mode(mode)
                    .map(move |species| ModalTracer::mass(mode, species, phase)),
            )
        })
    }

    /// Every tracer: interstitial, then cloud-borne, then gases
    pub fn tracers(&self) -> impl Iterator<Item = Tracer> + '_ {
        self.modal_tracers(Phase::Interstitial)
            .chain(self.modal_tracers(Phase::CloudBorne))
            .map(Tracer::Modal)
            .chain((0..self.num_gases()).map(Tracer::Gas))
    }

    /// The advected tracers: interstitial modal tracers, then gases.
    ///
    /// The position of a tracer in this sequence is its constituent index,
    /// used to lay out deposition-flux arrays.
    pub fn advected_tracers(&self) -> impl Iterator<Item = Tracer> + '_ {
        self.constituents.iter().copied()
    }

    pub fn num_advected(&self) -> usize {
        self.constituents.len()
    }

    /// Constituent index of an advected tracer
    pub fn constituent_index(&self, tracer: Tracer) -> Option<usize> {
        self.constituents.get_index_of(&tracer)
    }

    pub fn mode_name(&self, mode: usize) -> Option<&str> {
        self.config.modes.get(mode).map(|m| m.name.as_str())
    }

    pub fn species_name(&self, species: usize) -> Option<&str> {
        self.config.species.get(species).map(|s| s.as_str())
    }

    pub fn gas_name(&self, gas: usize) -> Option<&str> {
        self.config.gases.get(gas).map(|s| s.as_str())
    }

    /// Field name of a modal tracer.
    ///
    /// Numbers are `num_a{m}`/`num_c{m}`, masses `{species}_a{m}`/`{species}_c{m}`,
    /// with `m` the one-based mode number.
    pub fn modal_name(&self, tracer: ModalTracer) -> String {
        let prefix = match tracer.constituent {
            Constituent::Number => "num",
            Constituent::Mass(species) => self.species_name(species).unwrap_or("unknown"),
        };
        format!("{}_{}{}", prefix, tracer.phase.tag(), tracer.mode + 1)
    }

    /// Field name of any tracer
    pub fn name(&self, tracer: Tracer) -> String {
        match tracer {
            Tracer::Modal(modal) => self.modal_name(modal),
            Tracer::Gas(gas) => self.gas_name(gas).unwrap_or("unknown").to_string(),
        }
    }

    /// Field name of the tendency of a tracer.
    ///
    /// Only interstitial and gas tracers have tendencies.
    pub fn tendency_name(&self, tracer: Tracer) -> Option<String> {
        match tracer {
            Tracer::Modal(ModalTracer {
                phase: Phase::CloudBorne,
                ..
            }) => None,
            _ => Some(format!("ptend_{}", self.name(tracer))),
        }
    }

    /// Whether the tracer is part of this catalog
    pub fn contains(&self, tracer: Tracer) -> bool {
        match tracer {
            Tracer::Modal(modal) => {
                modal.mode < self.num_modes()
                    && match modal.constituent {
                        Constituent::Number => true,
                        Constituent::Mass(species) => self.present(modal.mode, species),
                    }
            }
            Tracer::Gas(gas) => gas < self.num_gases(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModeDefinition;

    fn single_mode() -> TracerCatalog {
        TracerCatalog::new(ModalConfig {
            species: vec!["so4".to_string(), "bc".to_string(), "dst".to_string()],
            modes: vec![ModeDefinition::new("accumulation", &["so4", "bc"])],
            gases: vec!["SO2".to_string()],
        })
        .unwrap()
    }

    #[test]
    fn test_presence() {
        let catalog = single_mode();
        assert!(catalog.present(0, 0));
        assert!(catalog.present(0, 1));
        assert!(!catalog.present(0, 2));
        // Out of range
        assert!(!catalog.present(1, 0));
        assert!(!catalog.present(0, 10));
    }

    #[test]
    fn test_species_in_mode_ascending() {
        let catalog = TracerCatalog::mam4();
        // The coarse mode lists its species out of table order
        let coarse: Vec<usize> = catalog.species_in_mode(2).collect();
        assert_eq!(coarse, vec![0, 1, 2, 3, 4, 5, 6]);
        let aitken: Vec<usize> = catalog.species_in_mode(1).collect();
        assert_eq!(aitken, vec![0, 2, 5, 6]);
        let primary: Vec<&str> = catalog
            .species_in_mode(3)
            .map(|s| catalog.species_name(s).unwrap())
            .collect();
        assert_eq!(primary, vec!["pom", "bc", "mom"]);
    }

    #[test]
    fn test_names() {
        let catalog = single_mode();
        let names: Vec<String> = catalog.tracers().map(|t| catalog.name(t)).collect();
        assert_eq!(
            names,
            vec!["num_a1", "so4_a1", "bc_a1", "num_c1", "so4_c1", "bc_c1", "SO2"]
        );
    }

    #[test]
    fn test_tendency_names() {
        let catalog = single_mode();
        assert_eq!(
            catalog.tendency_name(ModalTracer::mass(0, 1, Phase::Interstitial).into()),
            Some("ptend_bc_a1".to_string())
        );
        assert_eq!(
            catalog.tendency_name(Tracer::Gas(0)),
            Some("ptend_SO2".to_string())
        );
        assert_eq!(
            catalog.tendency_name(ModalTracer::number(0, Phase::CloudBorne).into()),
            None
        );
    }

    #[test]
    fn test_advected_tracers() {
        let catalog = single_mode();
        let advected: Vec<Tracer> = catalog.advected_tracers().collect();
        assert_eq!(advected.len(), catalog.num_advected());
        assert_eq!(advected.len(), 4);
        assert_eq!(catalog.constituent_index(Tracer::Gas(0)), Some(3));
        assert_eq!(
            catalog.constituent_index(ModalTracer::number(0, Phase::CloudBorne).into()),
            None
        );
    }

    #[test]
    fn test_constituent_index_follows_advected_order() {
        let catalog = TracerCatalog::mam4();
        for (index, tracer) in catalog.advected_tracers().enumerate() {
            assert_eq!(catalog.constituent_index(tracer), Some(index));
        }
        assert_eq!(
            catalog.num_advected(),
            catalog.num_modes() + catalog.num_present() + catalog.num_gases()
        );
        // Absent species have no constituent index
        let absent = (0..catalog.num_species())
            .find(|&s| !catalog.present(1, s))
            .unwrap();
        assert_eq!(
            catalog.constituent_index(ModalTracer::mass(1, absent, Phase::Interstitial).into()),
            None
        );
        assert_eq!(catalog.constituent_index(Tracer::Gas(catalog.num_gases())), None);
    }

    #[test]
    fn test_mam4_counts() {
        let catalog = TracerCatalog::mam4();
        assert_eq!(catalog.num_present(), 7 + 4 + 7 + 3);
        assert_eq!(catalog.num_advected(), 4 + 21 + 6);
        assert_eq!(catalog.tracers().count(), 2 * (4 + 21) + 6);
        let rebuilt = TracerCatalog::new(ModalConfig::mam4()).unwrap();
        assert!(rebuilt.tracers().eq(catalog.tracers()));
    }

    #[test]
    fn test_iteration_is_deterministic() {
        let catalog = TracerCatalog::mam4();
        let first: Vec<Tracer> = catalog.tracers().collect();
        let second: Vec<Tracer> = catalog.tracers().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_name_collision_rejected() {
        let result = TracerCatalog::new(ModalConfig {
            species: vec!["so4".to_string()],
            modes: vec![ModeDefinition::new("accumulation", &["so4"])],
            gases: vec!["so4_a1".to_string()],
        });
        assert!(matches!(result, Err(MamError::Configuration(_))));
    }

    #[test]
    fn test_contains() {
        let catalog = single_mode();
        assert!(catalog.contains(ModalTracer::mass(0, 0, Phase::CloudBorne).into()));
        assert!(!catalog.contains(ModalTracer::mass(0, 2, Phase::Interstitial).into()));
        assert!(!catalog.contains(Tracer::Gas(1)));
    }
}
