//! Wet/dry state adapter
//!
//! Exposes the model's wet-basis state (owned by the [`FieldRegistry`](crate::registry::FieldRegistry))
//! and the process's dry-basis state (owned by the [`ScratchBuffer`](crate::buffer::ScratchBuffer))
//! as structured aggregates.
//!
//! The adapter only resolves and borrows storage, it never converts values.
//! Conversion is done by the [`preprocess`](crate::preprocess) and
//! [`postprocess`](crate::postprocess) stages.

mod atmosphere;
mod binding;

pub use atmosphere::{
    DryAtmosphere, DryAtmosphereColumn, DryAtmosphereColumnMut, DryAtmosphereView,
    DryAtmosphereViewMut, WetAtmosphere, WetAtmosphereColumn, WetAtmosphereView,
};
pub use binding::{
    atmosphere_requirements, bind_aerosols, bind_atmosphere, bind_tendencies, names,
    tendency_requirements, tracer_requirements, tracer_unit, AerosolBinding, AtmosphereBinding,
};
