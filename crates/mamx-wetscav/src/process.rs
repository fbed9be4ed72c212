//! The wet scavenging process
//!
//! Each step runs three stages over every column:
//! conversion of the wet state to the dry basis, the kernel call with the tendency update,
//! and conversion of the tracers back to the wet basis.

use crate::config::WetScavConfig;
use crate::invocation::{invoke, Invocation, InvocationViews};
use crate::kernel::WetDepositionKernel;
use crate::state::{bind_wetscav, wetscav_requirements, WetScavBinding};
use mamx_core::buffer::{BufferManager, ELEMENT_SIZE};
use mamx_core::catalog::TracerCatalog;
use mamx_core::coupling::ModalCoupling;
use mamx_core::errors::{MamError, MamResult};
use mamx_core::probe::{NoProbe, StageProbe};
use mamx_core::process::AtmosphereProcess;
use mamx_core::registry::{FieldRegistry, FieldRequirement, GridDimensions, RequirementType};
use mamx_core::validation::IntervalCheck;
use std::sync::Arc;
use tracing::debug;

pub const PROCESS_NAME: &str = "mam4_wetscav";

/// Bounds checks run before and after a step
#[derive(Debug, Clone)]
struct IntervalChecks {
    inputs: IntervalCheck,
    outputs: IntervalCheck,
}

/// Wet removal of modal aerosols by a [`WetDepositionKernel`]
#[derive(Debug)]
pub struct WetScavenging<K> {
    config: WetScavConfig,
    kernel: K,
    coupling: ModalCoupling,
    binding: Option<WetScavBinding>,
    work: Vec<f64>,
    checks: Option<IntervalChecks>,
}

impl<K: WetDepositionKernel> WetScavenging<K> {
    pub fn from_config(config: WetScavConfig, grid: GridDimensions, kernel: K) -> MamResult<Self> {
        let catalog = TracerCatalog::new(config.modal.clone())?;
        let coupling = ModalCoupling::new(Arc::new(catalog), grid)
            .with_surface_height(config.surface_height);
        Ok(Self {
            config,
            kernel,
            coupling,
            binding: None,
            work: Vec::new(),
            checks: None,
        })
    }

    /// MAM4 with the default configuration
    pub fn mam4(grid: GridDimensions, kernel: K) -> MamResult<Self> {
        Self::from_config(WetScavConfig::default(), grid, kernel)
    }

    pub fn config(&self) -> &WetScavConfig {
        &self.config
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn catalog(&self) -> &TracerCatalog {
        self.coupling.catalog()
    }

    pub fn coupling(&self) -> &ModalCoupling {
        &self.coupling
    }

    pub fn grid(&self) -> GridDimensions {
        self.coupling.grid()
    }

    /// Number of kernel work values reserved for all columns.
    ///
    /// The work area is allocated by [`AtmosphereProcess::init_buffers`] and is not part of
    /// [`AtmosphereProcess::requested_buffer_bytes`].
    pub fn work_len(&self) -> usize {
        self.kernel.work_len(self.grid().levels) * self.grid().columns
    }

    /// Advance by one step, reporting the phases of every column to `probe`
    pub fn run_with<P: StageProbe>(
        &mut self,
        registry: &mut FieldRegistry,
        dt: f64,
        probe: &P,
    ) -> MamResult<()> {
        let binding = self.binding.as_ref().ok_or_else(|| {
            MamError::Configuration(format!("Process '{}' was not initialized", PROCESS_NAME))
        })?;

        if let Some(checks) = &self.checks {
            checks.inputs.check(registry)?;
        }

        self.coupling.pre_process_with(registry, probe)?;

        let grid = self.coupling.grid();
        let mut ctx = self.coupling.context(registry)?;
        let views = InvocationViews::from_context(&mut ctx, binding)?;
        let invocation = Invocation {
            kernel: &self.kernel,
            catalog: ctx.catalog,
            dt,
        };
        invoke(
            invocation,
            views,
            grid.columns,
            grid.levels,
            &mut self.work,
            probe,
        )?;

        self.coupling.post_process_with(registry, probe)?;

        if let Some(checks) = &self.checks {
            checks.outputs.check(registry)?;
        }
        Ok(())
    }

    fn interval_checks(&self) -> IntervalChecks {
        let names = |types: &[RequirementType]| -> Vec<String> {
            self.definitions()
                .into_iter()
                .filter(|d| types.contains(&d.requirement_type))
                .map(|d| d.name)
                .collect()
        };
        let catalog = self.catalog();
        let policy = self.config.interval_policy;
        let inputs = names(&[RequirementType::Required, RequirementType::Updated]);
        let outputs = names(&[RequirementType::Updated, RequirementType::Computed]);
        IntervalChecks {
            inputs: IntervalCheck::for_fields(inputs.iter().map(|s| s.as_str()), catalog, policy),
            outputs: IntervalCheck::for_fields(outputs.iter().map(|s| s.as_str()), catalog, policy),
        }
    }
}

impl<K: WetDepositionKernel> AtmosphereProcess for WetScavenging<K> {
    fn name(&self) -> &str {
        PROCESS_NAME
    }

    fn definitions(&self) -> Vec<FieldRequirement> {
        let mut definitions = self.coupling.definitions();
        definitions.extend(wetscav_requirements(self.catalog()));
        definitions
    }

    fn requested_buffer_bytes(&self) -> usize {
        self.coupling.requested_buffer_bytes()
    }

    fn init_buffers(&mut self, manager: BufferManager) -> MamResult<()> {
        self.coupling.init_buffers(manager)?;
        self.work = vec![0.0; self.work_len()];
        debug!(
            scratch_bytes = self.coupling.requested_buffer_bytes(),
            work_bytes = self.work.len() * ELEMENT_SIZE,
            "Initialized wet scavenging buffers"
        );
        Ok(())
    }

    fn initialize(&mut self, registry: &FieldRegistry) -> MamResult<()> {
        self.coupling.bind(registry)?;
        let binding = bind_wetscav(self.catalog(), registry)?;
        self.checks = if self.config.check_field_intervals {
            Some(self.interval_checks())
        } else {
            None
        };
        self.binding = Some(binding);
        debug!(
            process = PROCESS_NAME,
            check_field_intervals = self.config.check_field_intervals,
            "Initialized"
        );
        Ok(())
    }

    fn run(&mut self, registry: &mut FieldRegistry, dt: f64) -> MamResult<()> {
        self.run_with(registry, dt, &NoProbe)
    }
}
