//! Observation of per-column phases
//!
//! A column's work unit is split into ordered phases.
//! A [`StageProbe`] is notified when each phase starts and ends,
//! which makes the ordering observable (for example in tests) without affecting it.

use std::fmt;

/// A phase of a column's work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Wet to dry conversion of the atmosphere and tracers
    DryConversion,
    /// Layer thickness, heights and updraft velocity
    Geometry,
    /// Call into the physics kernel
    Kernel,
    /// Application of the kernel tendencies to the dry state
    TendencyUpdate,
    /// Dry to wet conversion of the tracers
    WetConversion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::DryConversion => "dry conversion",
            Stage::Geometry => "geometry",
            Stage::Kernel => "kernel",
            Stage::TendencyUpdate => "tendency update",
            Stage::WetConversion => "wet conversion",
        };
        write!(f, "{}", name)
    }
}

/// Hooks called around every phase of every column.
///
/// Probes are shared between the parallel work units, so they must be `Sync`.
pub trait StageProbe: Sync {
    fn enter(&self, _stage: Stage, _column: usize) {}
    fn exit(&self, _stage: Stage, _column: usize) {}

    /// Run `f` between [`StageProbe::enter`] and [`StageProbe::exit`]
    fn observe<T>(&self, stage: Stage, column: usize, f: impl FnOnce() -> T) -> T
    where
        Self: Sized,
    {
        self.enter(stage, column);
        let result = f();
        self.exit(stage, column);
        result
    }
}

/// Probe that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl StageProbe for NoProbe {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Stage, usize, bool)>>,
    }

    impl StageProbe for Recorder {
        fn enter(&self, stage: Stage, column: usize) {
            self.events.lock().unwrap().push((stage, column, true));
        }
        fn exit(&self, stage: Stage, column: usize) {
            self.events.lock().unwrap().push((stage, column, false));
        }
    }

    #[test]
    fn test_observe_brackets_the_closure() {
        let recorder = Recorder::default();
        let value = recorder.observe(Stage::Geometry, 3, || {
            assert_eq!(recorder.events.lock().unwrap().len(), 1);
            42
        });
        assert_eq!(value, 42);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![(Stage::Geometry, 3, true), (Stage::Geometry, 3, false)]
        );
    }

    #[test]
    fn test_no_probe() {
        assert_eq!(NoProbe.observe(Stage::Kernel, 0, || 1), 1);
    }
}
