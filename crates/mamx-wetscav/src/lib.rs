//! Wet scavenging of modal aerosols
//!
//! [`process::WetScavenging`] composes the modal coupling of `mamx-core` with a column-local
//! [`kernel::WetDepositionKernel`]. The kernel itself is supplied by the caller;
//! [`kernel::NullKernel`] removes nothing and is useful for testing the surrounding machinery.
//!
//! # Examples
//!
//! ```rust
//! use mamx_core::process::{setup_process, AtmosphereProcess};
//! use mamx_core::registry::{FieldRegistry, GridDimensions};
//! use mamx_wetscav::kernel::NullKernel;
//! use mamx_wetscav::process::WetScavenging;
//!
//! let grid = GridDimensions::new(4, 10);
//! let mut registry = FieldRegistry::new(grid);
//! let mut process = WetScavenging::mam4(grid, NullKernel).unwrap();
//! setup_process(&mut process, &mut registry).unwrap();
//!
//! // Populate the registry, then step
//! process.run(&mut registry, 1800.0).unwrap();
//! ```

pub mod config;
pub mod invocation;
pub mod kernel;
pub mod process;
pub mod state;
