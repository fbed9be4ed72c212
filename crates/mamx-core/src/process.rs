//! Host lifecycle of an atmospheric process
//!
//! A host drives every process through the same sequence:
//! declare the fields it needs, hand it a scratch buffer, let it bind to the registry,
//! then call `run` once per timestep.

use crate::buffer::BufferManager;
use crate::errors::MamResult;
use crate::registry::{FieldRegistry, FieldRequirement, RequirementType};
use std::fmt::Debug;
use tracing::debug;

/// An atmospheric process coupled to the field registry
pub trait AtmosphereProcess: Debug {
    fn name(&self) -> &str;

    /// Fields the process reads, updates or computes
    fn definitions(&self) -> Vec<FieldRequirement>;

    /// Fields of a given requirement type
    fn definitions_of(&self, requirement_type: RequirementType) -> Vec<FieldRequirement> {
        self.definitions()
            .into_iter()
            .filter(|d| d.requirement_type == requirement_type)
            .collect()
    }

    /// Size in bytes of the scratch block the process needs
    fn requested_buffer_bytes(&self) -> usize;

    /// Take ownership of the scratch block
    fn init_buffers(&mut self, manager: BufferManager) -> MamResult<()>;

    /// Resolve and validate every field the process uses
    fn initialize(&mut self, registry: &FieldRegistry) -> MamResult<()>;

    /// Advance the process by one timestep of `dt` seconds
    fn run(&mut self, registry: &mut FieldRegistry, dt: f64) -> MamResult<()>;
}

/// Register, allocate and initialize a process.
///
/// Any failure leaves the process unusable; there is no partial initialization.
pub fn setup_process<P: AtmosphereProcess + ?Sized>(
    process: &mut P,
    registry: &mut FieldRegistry,
) -> MamResult<()> {
    let definitions = process.definitions();
    registry.register_all(&definitions)?;

    let bytes = process.requested_buffer_bytes();
    debug!(process = process.name(), bytes, "Allocating scratch buffer");
    process.init_buffers(BufferManager::with_bytes(bytes))?;
    process.initialize(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MamError;
    use crate::registry::{FieldShape, GridDimensions};

    #[derive(Debug, Default)]
    struct Counter {
        buffer_bytes: usize,
        initialized: bool,
        steps: usize,
    }

    impl AtmosphereProcess for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn definitions(&self) -> Vec<FieldRequirement> {
            vec![
                FieldRequirement::required("T_mid", "K", FieldShape::Midpoint),
                FieldRequirement::computed("count", "1", FieldShape::Column),
            ]
        }

        fn requested_buffer_bytes(&self) -> usize {
            64
        }

        fn init_buffers(&mut self, manager: BufferManager) -> MamResult<()> {
            self.buffer_bytes = manager.allocated_bytes();
            Ok(())
        }

        fn initialize(&mut self, registry: &FieldRegistry) -> MamResult<()> {
            registry.lookup("count", FieldShape::Column)?;
            self.initialized = true;
            Ok(())
        }

        fn run(&mut self, registry: &mut FieldRegistry, _dt: f64) -> MamResult<()> {
            if !self.initialized {
                return Err(MamError::Configuration("not initialized".to_string()));
            }
            self.steps += 1;
            let handle = registry.handle("count")?;
            registry.values_mut(handle)?.fill(self.steps as f64);
            Ok(())
        }
    }

    #[test]
    fn test_setup_process() {
        let mut registry = FieldRegistry::new(GridDimensions::new(2, 3));
        let mut process = Counter::default();
        setup_process(&mut process, &mut registry).unwrap();
        assert_eq!(process.buffer_bytes, 64);
        assert!(registry.contains("T_mid"));

        process.run(&mut registry, 1.0).unwrap();
        process.run(&mut registry, 1.0).unwrap();
        assert_eq!(registry.field("count").unwrap().data[[1, 0]], 2.0);
    }

    #[test]
    fn test_definitions_of() {
        let process = Counter::default();
        let computed = process.definitions_of(RequirementType::Computed);
        assert_eq!(computed.len(), 1);
        assert_eq!(computed[0].name, "count");
    }

    #[test]
    fn test_setup_fails_on_conflicting_registration() {
        let mut registry = FieldRegistry::new(GridDimensions::new(2, 3));
        registry
            .register(&FieldRequirement::required("T_mid", "degC", FieldShape::Midpoint))
            .unwrap();
        let mut process = Counter::default();
        let err = setup_process(&mut process, &mut registry).unwrap_err();
        assert!(matches!(err, MamError::UnitMismatch { .. }));
        assert!(!process.initialized);
    }
}
