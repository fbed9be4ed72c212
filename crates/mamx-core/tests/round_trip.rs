//! Wet -> dry -> wet round trips through the coupling layer

use approx::assert_relative_eq;
use is_close::is_close;
use mamx_core::buffer::{BufferManager, ScratchField, ScratchLayout};
use mamx_core::catalog::{ModalTracer, Phase, Tracer, TracerCatalog};
use mamx_core::config::{ModalConfig, ModeDefinition};
use mamx_core::coupling::ModalCoupling;
use mamx_core::errors::MamError;
use mamx_core::registry::{FieldRegistry, GridDimensions};
use mamx_core::state::names;
use ndarray::Array2;
use std::sync::Arc;

fn setup(catalog: TracerCatalog, grid: GridDimensions) -> (ModalCoupling, FieldRegistry) {
    let mut coupling = ModalCoupling::new(Arc::new(catalog), grid);
    let mut registry = FieldRegistry::new(grid);
    registry.register_all(&coupling.definitions()).unwrap();
    coupling
        .init_buffers(BufferManager::with_bytes(coupling.requested_buffer_bytes()))
        .unwrap();
    coupling.bind(&registry).unwrap();
    (coupling, registry)
}

fn fill(registry: &mut FieldRegistry, catalog: &TracerCatalog) -> Vec<(String, Array2<f64>)> {
    let grid = registry.grid();
    let shape = (grid.columns, grid.levels);
    registry
        .insert(
            names::QV,
            Array2::from_shape_fn(shape, |(i, k)| 0.0005 + 0.003 * ((i * 7 + k * 3) % 5) as f64),
        )
        .unwrap();
    registry
        .insert(names::T_MID, Array2::from_elem(shape, 250.0))
        .unwrap();
    registry
        .insert(names::P_MID, Array2::from_elem(shape, 50000.0))
        .unwrap();
    registry
        .insert(names::PSEUDO_DENSITY, Array2::from_elem(shape, 800.0))
        .unwrap();

    let mut inputs = Vec::new();
    for (i, tracer) in catalog.tracers().enumerate() {
        let name = catalog.name(tracer);
        let scale = match tracer {
            Tracer::Modal(ModalTracer {
                constituent: mamx_core::catalog::Constituent::Number,
                ..
            }) => 1e8,
            _ => 1e-9,
        };
        let values = Array2::from_shape_fn(shape, |(c, k)| scale * (1.0 + (i + c + k) as f64));
        registry.insert(&name, values.clone()).unwrap();
        inputs.push((name, values));
    }
    inputs
}

#[test]
fn test_mam4_round_trip() {
    let catalog = TracerCatalog::mam4();
    let grid = GridDimensions::new(5, 12);
    let (mut coupling, mut registry) = setup(catalog.clone(), grid);
    let inputs = fill(&mut registry, &catalog);

    coupling.pre_process(&mut registry).unwrap();
    coupling.post_process(&mut registry).unwrap();

    for (name, expected) in inputs {
        let actual = &registry.field(&name).unwrap().data;
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!(is_close!(*a, *e), "{}: {} != {}", name, a, e);
        }
    }
}

#[test]
fn test_repeated_round_trips_are_stable() {
    let catalog = TracerCatalog::mam4();
    let grid = GridDimensions::new(2, 4);
    let (mut coupling, mut registry) = setup(catalog.clone(), grid);
    let inputs = fill(&mut registry, &catalog);

    for _ in 0..10 {
        coupling.pre_process(&mut registry).unwrap();
        coupling.post_process(&mut registry).unwrap();
    }

    for (name, expected) in inputs {
        let actual = &registry.field(&name).unwrap().data;
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *e, max_relative = 1e-13);
        }
    }
}

#[test]
fn test_absent_species_is_never_touched() {
    // Species 2 (dst) is absent from mode 0
    let catalog = TracerCatalog::new(ModalConfig {
        species: vec!["so4".to_string(), "bc".to_string(), "dst".to_string()],
        modes: vec![
            ModeDefinition::new("accumulation", &["so4", "bc"]),
            ModeDefinition::new("coarse", &["dst", "so4"]),
        ],
        gases: vec!["SO2".to_string()],
    })
    .unwrap();
    let grid = GridDimensions::new(2, 3);

    let absent = Tracer::Modal(ModalTracer::mass(0, 2, Phase::Interstitial));
    assert!(!catalog.tracers().any(|t| t == absent));
    assert!(!ScratchLayout::new(&catalog, grid).contains(ScratchField::Tracer(absent)));

    let (mut coupling, mut registry) = setup(catalog.clone(), grid);
    assert!(!registry.contains("dst_a1"));
    assert!(!registry.contains("dst_c1"));
    assert!(registry.contains("dst_a2"));

    fill(&mut registry, &catalog);
    coupling.pre_process(&mut registry).unwrap();
    coupling.post_process(&mut registry).unwrap();
    assert!(!registry.contains("dst_a1"));
}

#[test]
fn test_registering_absent_species_fails_binding() {
    let catalog = TracerCatalog::new(ModalConfig {
        species: vec!["so4".to_string(), "dst".to_string()],
        modes: vec![ModeDefinition::new("accumulation", &["so4"])],
        gases: vec![],
    })
    .unwrap();
    let grid = GridDimensions::new(1, 2);
    let mut coupling = ModalCoupling::new(Arc::new(catalog), grid);
    let mut registry = FieldRegistry::new(grid);
    registry.register_all(&coupling.definitions()).unwrap();
    registry
        .register(&mamx_core::registry::FieldRequirement::updated(
            "dst_c1",
            "kg/kg",
            mamx_core::registry::FieldShape::Midpoint,
        ))
        .unwrap();
    coupling
        .init_buffers(BufferManager::with_bytes(coupling.requested_buffer_bytes()))
        .unwrap();
    let err = coupling.bind(&registry).unwrap_err();
    assert!(matches!(err, MamError::Configuration(_)));
}

#[test]
fn test_sizing_is_exact_for_several_configurations() {
    let configs = [
        ModalConfig::mam4(),
        ModalConfig {
            species: vec!["so4".to_string()],
            modes: vec![ModeDefinition::new("accumulation", &["so4"])],
            gases: vec!["SO2".to_string()],
        },
        ModalConfig {
            species: vec!["so4".to_string(), "bc".to_string()],
            modes: vec![
                ModeDefinition::new("a", &["bc"]),
                ModeDefinition::new("b", &[]),
                ModeDefinition::new("c", &["so4", "bc"]),
            ],
            gases: vec![],
        },
    ];
    for config in configs {
        let catalog = TracerCatalog::new(config).unwrap();
        for grid in [GridDimensions::new(1, 1), GridDimensions::new(7, 33)] {
            let required = ScratchLayout::required_bytes_for(&catalog, grid);
            let mut coupling = ModalCoupling::new(Arc::new(catalog.clone()), grid);
            assert_eq!(coupling.requested_buffer_bytes(), required);
            // Exactly the required size binds
            coupling
                .init_buffers(BufferManager::with_bytes(required))
                .unwrap();
            // One element short does not
            let err = coupling
                .init_buffers(BufferManager::with_bytes(required - 8))
                .unwrap_err();
            assert!(matches!(
                err,
                MamError::Allocation { required: r, supplied } if r == required && supplied == required - 8
            ));
        }
    }
}
