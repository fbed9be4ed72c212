//! Modal aerosol coupling for column physics
//!
//! Re-exports the coupling layer and the wet scavenging process,
//! together with the types needed to drive a process from a host model.

pub use mamx_core;
pub use mamx_wetscav;

pub use mamx_core::errors::{MamError, MamResult};
pub use mamx_core::process::{setup_process, AtmosphereProcess};
pub use mamx_core::registry::{FieldRegistry, GridDimensions};
pub use mamx_wetscav::kernel::{NullKernel, WetDepositionKernel};
pub use mamx_wetscav::process::WetScavenging;
