//! Contract between the coupling layer and a wet deposition kernel
//!
//! A kernel is called once per column with read-only views of the dry state and returns
//! everything it computed as a [`KernelOutput`].
//! The invocation stage is responsible for writing the output to the registry and for
//! applying the tendencies, so a kernel never mutates shared state.

use crate::state::{ConvectiveDiagnostics, ModalOptics, WetDeposition};
use mamx_core::catalog::{Tracer, TracerCatalog};
use mamx_core::fields::{AerosolFields, TendencyFields};
use mamx_core::state::DryAtmosphereColumn;
use mamx_core::FloatValue;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::fmt::Debug;
use thiserror::Error;

/// Errors a kernel can report for a column
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("Iteration did not converge at level {level}")]
    NonConvergence { level: usize },
    #[error("{0}")]
    Invalid(String),
}

/// Read-only inputs of a single column
#[derive(Debug)]
pub struct KernelInput<'a> {
    pub column: usize,
    /// Timestep [s]
    pub dt: FloatValue,
    pub levels: usize,
    pub catalog: &'a TracerCatalog,
    pub atmosphere: DryAtmosphereColumn<'a>,
    /// Dry-basis tracers
    pub aerosols: AerosolFields<ArrayView1<'a, f64>>,
    pub diagnostics: ConvectiveDiagnostics<ArrayView1<'a, f64>>,
    /// Current optical properties, `(modes, levels)`
    pub optics: ModalOptics<ArrayView2<'a, f64>>,
}

/// Everything a kernel computes for a single column
#[derive(Debug, Clone, PartialEq)]
pub struct KernelOutput {
    /// Rate of change of the interstitial and gas tracers [per s]
    pub tendencies: TendencyFields<Array1<f64>>,
    /// Updated optical properties, `(modes, levels)`
    pub optics: ModalOptics<Array2<f64>>,
    /// Deposition fluxes indexed by constituent index
    pub deposition: WetDeposition<Array1<f64>>,
}

impl KernelOutput {
    /// Zero tendencies and fluxes with unchanged optical properties
    pub fn unchanged(input: &KernelInput<'_>) -> Self {
        let levels = input.levels;
        let constituents = input.catalog.num_advected();
        Self {
            tendencies: TendencyFields::from_catalog(input.catalog, |_| Array1::zeros(levels)),
            optics: input.optics.map_ref(|v| v.to_owned()),
            deposition: WetDeposition {
                interstitial: Array1::zeros(constituents),
                cloud_water: Array1::zeros(constituents),
            },
        }
    }

    /// Tendency of a single tracer, if it has one
    pub fn tendency_mut(&mut self, tracer: Tracer) -> Option<&mut Array1<f64>> {
        self.tendencies
            .iter_mut()
            .find(|(t, _)| *t == tracer)
            .map(|(_, v)| v)
    }

    /// Check the output against the catalog and the column size
    pub fn validate(&self, catalog: &TracerCatalog, levels: usize) -> Result<(), String> {
        if !self.tendencies.matches(catalog) {
            return Err("tendencies do not follow the species-presence pattern".to_string());
        }
        if let Some((tracer, values)) = self.tendencies.iter().find(|(_, v)| v.len() != levels) {
            return Err(format!(
                "tendency of '{}' has {} levels, expected {}",
                catalog.name(tracer),
                values.len(),
                levels
            ));
        }
        let modal = (catalog.num_modes(), levels);
        if let Some(values) = self.optics.iter().find(|v| v.dim() != modal) {
            return Err(format!(
                "optical property has shape {:?}, expected {:?}",
                values.dim(),
                modal
            ));
        }
        let constituents = catalog.num_advected();
        for values in [&self.deposition.interstitial, &self.deposition.cloud_water] {
            if values.len() != constituents {
                return Err(format!(
                    "deposition flux has {} constituents, expected {}",
                    values.len(),
                    constituents
                ));
            }
        }
        Ok(())
    }
}

/// A column-local wet deposition scheme.
///
/// Columns are processed in parallel, so implementations must be `Send + Sync`.
pub trait WetDepositionKernel: Send + Sync + Debug {
    /// Number of scratch values needed per column
    fn work_len(&self, _levels: usize) -> usize {
        0
    }

    /// Compute the tendencies, optical properties and deposition fluxes of a column.
    ///
    /// `work` holds exactly [`WetDepositionKernel::work_len`] values and is not shared with
    /// any other column. Its contents are undefined on entry.
    fn scavenge(
        &self,
        input: &KernelInput<'_>,
        work: &mut [f64],
    ) -> Result<KernelOutput, KernelError>;
}

/// Kernel that removes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullKernel;

impl WetDepositionKernel for NullKernel {
    fn scavenge(
        &self,
        input: &KernelInput<'_>,
        _work: &mut [f64],
    ) -> Result<KernelOutput, KernelError> {
        Ok(KernelOutput::unchanged(input))
    }
}
