//! Core of the modal aerosol coupling layer
//!
//! This crate moves a climate model's atmospheric state between the moist (wet) basis used
//! by the rest of the model and the dry-air basis required by column-local aerosol physics.
//!
//! The building blocks, from the leaves up:
//!
//! * [`catalog`]: which modal tracers and gases exist and what they are called
//! * [`buffer`]: sizing and partitioning of the single scratch block of a process
//! * [`state`]: binding of the wet (registry) and dry (scratch) state aggregates
//! * [`preprocess`]: wet to dry conversion and column geometry
//! * [`postprocess`]: dry to wet conversion of the tracers
//!
//! [`coupling::ModalCoupling`] composes them for use by a concrete
//! [`process::AtmosphereProcess`].

pub mod buffer;
pub mod catalog;
pub mod config;
pub mod coupling;
pub mod errors;
pub mod fields;
pub mod physics;
pub mod postprocess;
pub mod preprocess;
pub mod probe;
pub mod process;
pub mod registry;
pub mod state;
pub mod validation;

pub type FloatValue = f64;
