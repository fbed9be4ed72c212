//! Optional bounds checks on registry fields
//!
//! An [`IntervalCheck`] compares every value of a set of fields against a physically
//! plausible `[min, max]` range.
//! It is never run implicitly by the conversion stages; processes opt in before and/or
//! after their run.

use crate::catalog::{Constituent, Tracer, TracerCatalog};
use crate::errors::{MamError, MamResult};
use crate::registry::FieldRegistry;
use crate::state::names;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Inclusive range of acceptable values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldBounds {
    pub min: f64,
    pub max: f64,
}

impl FieldBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// NaN is never within bounds
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Bounds applied to fields without a more specific range
pub const DEFAULT_BOUNDS: FieldBounds = FieldBounds::new(-1e10, 1e10);
/// Bounds for number mixing ratios [1/kg]
pub const NUMBER_BOUNDS: FieldBounds = FieldBounds::new(0.0, 1e13);
/// Bounds for mass mixing ratios [kg/kg]
pub const MASS_BOUNDS: FieldBounds = FieldBounds::new(-1e-10, 1.0);

/// Plausible range of a field.
///
/// Tracers are recognised through the catalog; the atmospheric fields have their own ranges.
pub fn physical_bounds(name: &str, catalog: &TracerCatalog) -> FieldBounds {
    if let Some(tracer) = catalog.tracers().find(|t| catalog.name(*t) == name) {
        return match tracer {
            Tracer::Modal(modal) => match modal.constituent {
                Constituent::Number => NUMBER_BOUNDS,
                Constituent::Mass(_) => MASS_BOUNDS,
            },
            Tracer::Gas(_) => MASS_BOUNDS,
        };
    }

    match name {
        names::T_MID => FieldBounds::new(100.0, 500.0),
        names::QV => FieldBounds::new(1e-13, 0.2),
        names::QC | names::QI => FieldBounds::new(0.0, 0.1),
        names::NC => FieldBounds::new(0.0, 1e11),
        names::NI => FieldBounds::new(0.0, 1e10),
        names::P_MID | names::P_INT => FieldBounds::new(0.0, 1.2e5),
        names::PSEUDO_DENSITY => FieldBounds::new(0.0, 1e5),
        names::OMEGA => FieldBounds::new(-1e3, 1e3),
        names::CLDFRAC_TOT | "cldt" | "cldn" | "dp_frac" | "sh_frac" => FieldBounds::new(0.0, 1.0),
        names::PBL_HEIGHT => FieldBounds::new(0.0, 2e4),
        names::PHIS => FieldBounds::new(-1e4, 1e6),
        _ => DEFAULT_BOUNDS,
    }
}

/// What to do when a value is out of bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntervalPolicy {
    /// Log each violation and carry on
    #[default]
    Warn,
    /// Fail on the first violation
    Fail,
}

/// A single out-of-bounds value
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalViolation {
    pub field: String,
    pub column: usize,
    pub index: usize,
    pub value: f64,
    pub bounds: FieldBounds,
}

impl From<IntervalViolation> for MamError {
    fn from(value: IntervalViolation) -> Self {
        MamError::OutOfBounds {
            field: value.field,
            column: value.column,
            index: value.index,
            value: value.value,
            min: value.bounds.min,
            max: value.bounds.max,
        }
    }
}

/// Bounds check over a fixed set of fields
#[derive(Debug, Clone)]
pub struct IntervalCheck {
    bounds: IndexMap<String, FieldBounds>,
    policy: IntervalPolicy,
}

impl IntervalCheck {
    pub fn new(policy: IntervalPolicy) -> Self {
        Self {
            bounds: IndexMap::new(),
            policy,
        }
    }

    /// Check `fields` using [`physical_bounds`]
    pub fn for_fields<'n>(
        fields: impl IntoIterator<Item = &'n str>,
        catalog: &TracerCatalog,
        policy: IntervalPolicy,
    ) -> Self {
        let bounds = fields
            .into_iter()
            .map(|name| (name.to_string(), physical_bounds(name, catalog)))
            .collect();
        Self { bounds, policy }
    }

    /// Add or override the bounds of a field
    pub fn with_bounds(mut self, field: &str, bounds: FieldBounds) -> Self {
        self.bounds.insert(field.to_string(), bounds);
        self
    }

    pub fn policy(&self) -> IntervalPolicy {
        self.policy
    }

    pub fn bounds(&self, field: &str) -> Option<FieldBounds> {
        self.bounds.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Check every value of every field.
    ///
    /// With [`IntervalPolicy::Warn`] all violations are logged and returned.
    /// With [`IntervalPolicy::Fail`] the first violation is returned as an error.
    /// Fields that are not registered are an error regardless of the policy.
    pub fn check(&self, registry: &FieldRegistry) -> MamResult<Vec<IntervalViolation>> {
        let mut violations = Vec::new();
        for (name, bounds) in &self.bounds {
            let field = registry.field(name)?;
            for ((column, index), value) in field.data.indexed_iter() {
                if bounds.contains(*value) {
                    continue;
                }
                let violation = IntervalViolation {
                    field: name.clone(),
                    column,
                    index,
                    value: *value,
                    bounds: *bounds,
                };
                match self.policy {
                    IntervalPolicy::Fail => return Err(violation.into()),
                    IntervalPolicy::Warn => {
                        warn!(
                            field = %name,
                            column,
                            index,
                            value,
                            min = bounds.min,
                            max = bounds.max,
                            "Value outside of physical bounds"
                        );
                        violations.push(violation);
                    }
                }
            }
        }
        Ok(violations)
    }
}
