//! Shared pre/post-process machinery of modal aerosol processes
//!
//! [`ModalCoupling`] owns the scratch buffer and the state bindings of a process.
//! A process composes it with its own physics: `pre_process` before, `post_process` after.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use mamx_core::buffer::BufferManager;
//! use mamx_core::catalog::TracerCatalog;
//! use mamx_core::coupling::ModalCoupling;
//! use mamx_core::registry::{FieldRegistry, GridDimensions};
//!
//! let grid = GridDimensions::new(2, 4);
//! let mut coupling = ModalCoupling::new(Arc::new(TracerCatalog::mam4()), grid);
//!
//! let mut registry = FieldRegistry::new(grid);
//! registry.register_all(&coupling.definitions()).unwrap();
//! coupling
//!     .init_buffers(BufferManager::with_bytes(coupling.requested_buffer_bytes()))
//!     .unwrap();
//! coupling.bind(&registry).unwrap();
//! ```

use crate::buffer::{BufferManager, ScratchBuffer, ScratchLayout, ScratchViews};
use crate::catalog::TracerCatalog;
use crate::errors::{MamError, MamResult};
use crate::postprocess::{self, PostProcessViews};
use crate::preprocess::{self, PreProcessViews};
use crate::probe::{NoProbe, StageProbe};
use crate::registry::{FieldRegistry, FieldRequirement, FieldSet, GridDimensions};
use crate::state::{
    atmosphere_requirements, bind_aerosols, bind_atmosphere, tracer_requirements,
    AerosolBinding, AtmosphereBinding,
};
use crate::FloatValue;
use std::sync::Arc;
use tracing::debug;

/// Scratch storage and bindings shared by modal processes
#[derive(Debug)]
pub struct ModalCoupling {
    catalog: Arc<TracerCatalog>,
    grid: GridDimensions,
    layout: ScratchLayout,
    z_surf: FloatValue,
    scratch: Option<ScratchBuffer>,
    atmosphere: Option<AtmosphereBinding>,
    aerosols: Option<AerosolBinding>,
}

/// Borrows of the registry and scratch buffer for the duration of one stage
pub struct StageContext<'a> {
    pub catalog: &'a TracerCatalog,
    pub grid: GridDimensions,
    pub z_surf: FloatValue,
    pub fields: FieldSet<'a>,
    pub scratch: ScratchViews<'a>,
    pub atmosphere: &'a AtmosphereBinding,
    pub aerosols: &'a AerosolBinding,
}

impl ModalCoupling {
    pub fn new(catalog: Arc<TracerCatalog>, grid: GridDimensions) -> Self {
        let layout = ScratchLayout::new(&catalog, grid);
        Self {
            catalog,
            grid,
            layout,
            z_surf: 0.0,
            scratch: None,
            atmosphere: None,
            aerosols: None,
        }
    }

    /// Height of the surface above the geoid [m]
    pub fn with_surface_height(mut self, z_surf: FloatValue) -> Self {
        self.z_surf = z_surf;
        self
    }

    pub fn catalog(&self) -> &Arc<TracerCatalog> {
        &self.catalog
    }

    pub fn grid(&self) -> GridDimensions {
        self.grid
    }

    pub fn layout(&self) -> &ScratchLayout {
        &self.layout
    }

    pub fn surface_height(&self) -> FloatValue {
        self.z_surf
    }

    pub fn atmosphere_definitions(&self) -> Vec<FieldRequirement> {
        atmosphere_requirements()
    }

    pub fn tracer_definitions(&self) -> Vec<FieldRequirement> {
        tracer_requirements(&self.catalog)
    }

    /// Every field the coupling reads or writes
    pub fn definitions(&self) -> Vec<FieldRequirement> {
        let mut definitions = self.atmosphere_definitions();
        definitions.extend(self.tracer_definitions());
        definitions
    }

    pub fn requested_buffer_bytes(&self) -> usize {
        self.layout.required_bytes()
    }

    pub fn init_buffers(&mut self, manager: BufferManager) -> MamResult<()> {
        self.scratch = Some(ScratchBuffer::bind(self.layout.clone(), manager)?);
        Ok(())
    }

    /// Resolve the atmospheric and aerosol state against the registry
    pub fn bind(&mut self, registry: &FieldRegistry) -> MamResult<()> {
        if registry.grid() != self.grid {
            return Err(MamError::Configuration(format!(
                "Registry grid {:?} does not match the process grid {:?}",
                registry.grid(),
                self.grid
            )));
        }
        let atmosphere = bind_atmosphere(registry, &self.layout)?;
        let aerosols = bind_aerosols(&self.catalog, registry, &self.layout)?;
        debug!(
            columns = self.grid.columns,
            levels = self.grid.levels,
            tracers = aerosols.wet.len(),
            "Bound modal coupling"
        );
        self.atmosphere = Some(atmosphere);
        self.aerosols = Some(aerosols);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.scratch.is_some() && self.atmosphere.is_some() && self.aerosols.is_some()
    }

    /// Borrow everything a stage needs
    pub fn context<'a>(&'a mut self, registry: &'a mut FieldRegistry) -> MamResult<StageContext<'a>> {
        let not_ready = || {
            MamError::Configuration(
                "Modal coupling used before its buffers were initialized and bound".to_string(),
            )
        };
        let scratch = self.scratch.as_mut().ok_or_else(not_ready)?;
        let atmosphere = self.atmosphere.as_ref().ok_or_else(not_ready)?;
        let aerosols = self.aerosols.as_ref().ok_or_else(not_ready)?;
        Ok(StageContext {
            catalog: &self.catalog,
            grid: self.grid,
            z_surf: self.z_surf,
            fields: registry.field_set(),
            scratch: scratch.views_mut(),
            atmosphere,
            aerosols,
        })
    }

    /// Convert the wet state to the dry basis and compute the column geometry
    pub fn pre_process(&mut self, registry: &mut FieldRegistry) -> MamResult<()> {
        self.pre_process_with(registry, &NoProbe)
    }

    pub fn pre_process_with<P: StageProbe>(
        &mut self,
        registry: &mut FieldRegistry,
        probe: &P,
    ) -> MamResult<()> {
        let mut ctx = self.context(registry)?;
        let views = PreProcessViews {
            wet_atmosphere: ctx.atmosphere.wet_views(&mut ctx.fields)?,
            dry_atmosphere: ctx
                .atmosphere
                .dry_views_mut(&mut ctx.fields, &mut ctx.scratch)?,
            wet_aerosols: ctx.aerosols.wet_views(&mut ctx.fields)?,
            dry_aerosols: ctx.aerosols.dry_views_mut(&mut ctx.scratch)?,
        };
        preprocess::pre_process(views, ctx.grid.columns, ctx.z_surf, probe);
        Ok(())
    }

    /// Convert the dry tracers back to the wet basis in the registry
    pub fn post_process(&mut self, registry: &mut FieldRegistry) -> MamResult<()> {
        self.post_process_with(registry, &NoProbe)
    }

    pub fn post_process_with<P: StageProbe>(
        &mut self,
        registry: &mut FieldRegistry,
        probe: &P,
    ) -> MamResult<()> {
        let mut ctx = self.context(registry)?;
        let views = PostProcessViews {
            qv_dry: ctx.scratch.shared(ctx.atmosphere.dry.qv)?,
            dry_aerosols: ctx.aerosols.dry_views(&mut ctx.scratch)?,
            wet_aerosols: ctx.aerosols.wet_views_mut(&mut ctx.fields)?,
        };
        postprocess::post_process(views, ctx.grid.columns, probe);
        Ok(())
    }

    /// Read-only view of the scratch buffer, e.g. to inspect the dry state
    pub fn scratch(&self) -> Option<&ScratchBuffer> {
        self.scratch.as_ref()
    }
}
