//! Kernel invocation stage
//!
//! For every column the kernel is called once with read-only views of the dry state.
//! Its output is checked and written to the registry, then the interstitial species
//! tendencies are applied to the dry state. The tendency update of a column only starts
//! after the kernel call of that column has returned.

use crate::kernel::{KernelInput, KernelOutput, WetDepositionKernel};
use crate::state::{ConvectiveDiagnostics, ModalOptics, WetDeposition, WetScavBinding};
use mamx_core::buffer::ELEMENT_SIZE;
use mamx_core::catalog::{Constituent, TracerCatalog};
use mamx_core::coupling::StageContext;
use mamx_core::errors::{MamError, MamResult};
use mamx_core::fields::{next_column, AerosolFields, IntoColumns, TendencyFields};
use mamx_core::probe::{Stage, StageProbe};
use mamx_core::state::{DryAtmosphereColumn, DryAtmosphereView};
use mamx_core::FloatValue;
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, ArrayViewMut3};
use rayon::prelude::*;
use tracing::{debug_span, trace};

/// Everything the invocation stage reads and writes
pub struct InvocationViews<'a> {
    pub atmosphere: DryAtmosphereView<'a>,
    pub aerosols: AerosolFields<ArrayViewMut2<'a, f64>>,
    pub diagnostics: ConvectiveDiagnostics<ArrayView2<'a, f64>>,
    /// `(columns, modes, levels)`
    pub optics: ModalOptics<ArrayViewMut3<'a, f64>>,
    pub tendencies: TendencyFields<ArrayViewMut2<'a, f64>>,
    pub deposition: WetDeposition<ArrayViewMut2<'a, f64>>,
}

/// The invocation views of a single column
pub struct InvocationColumn<'a> {
    pub atmosphere: DryAtmosphereColumn<'a>,
    pub aerosols: AerosolFields<ArrayViewMut1<'a, f64>>,
    pub diagnostics: ConvectiveDiagnostics<ArrayView1<'a, f64>>,
    pub optics: ModalOptics<ArrayViewMut2<'a, f64>>,
    pub tendencies: TendencyFields<ArrayViewMut1<'a, f64>>,
    pub deposition: WetDeposition<ArrayViewMut1<'a, f64>>,
}

impl<'a> IntoColumns for InvocationViews<'a> {
    type Column = InvocationColumn<'a>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut atmosphere = self.atmosphere.into_columns(ncol).into_iter();
        let mut aerosols = self.aerosols.into_columns(ncol).into_iter();
        let mut diagnostics = self.diagnostics.into_columns(ncol).into_iter();
        let mut optics = self.optics.into_columns(ncol).into_iter();
        let mut tendencies = self.tendencies.into_columns(ncol).into_iter();
        let mut deposition = self.deposition.into_columns(ncol).into_iter();
        (0..ncol)
            .map_while(|_| {
                Some(InvocationColumn {
                    atmosphere: next_column(&mut atmosphere).ok()?,
                    aerosols: next_column(&mut aerosols).ok()?,
                    diagnostics: next_column(&mut diagnostics).ok()?,
                    optics: next_column(&mut optics).ok()?,
                    tendencies: next_column(&mut tendencies).ok()?,
                    deposition: next_column(&mut deposition).ok()?,
                })
            })
            .collect()
    }
}

impl<'a> InvocationViews<'a> {
    /// Borrow the invocation views out of a stage context
    pub fn from_context(ctx: &mut StageContext<'a>, binding: &WetScavBinding) -> MamResult<Self> {
        let grid = ctx.grid;
        let modes = ctx.catalog.num_modes();
        let fields = &mut ctx.fields;

        let atmosphere = ctx.atmosphere.dry_views(fields, &mut ctx.scratch)?;
        let aerosols = ctx.aerosols.dry_views_mut(&mut ctx.scratch)?;
        let diagnostics = binding.diagnostics.try_map_ref(|h| fields.read(*h))?;
        let optics = binding
            .optics
            .try_map_ref(|h| fields.write(*h))?
            .try_map(|v| {
                v.into_shape_with_order((grid.columns, modes, grid.levels))
                    .map_err(|e| MamError::ShapeMismatch {
                        field: "optical properties".to_string(),
                        expected: format!("({}, {}, {})", grid.columns, modes, grid.levels),
                        actual: e.to_string(),
                    })
            })?;
        let tendencies = binding.tendencies.try_map_ref(|h| fields.write(*h))?;
        let deposition = binding.deposition.try_map_ref(|h| fields.write(*h))?;

        Ok(Self {
            atmosphere,
            aerosols,
            diagnostics,
            optics,
            tendencies,
            deposition,
        })
    }
}

/// Settings shared by every column of a single invocation
#[derive(Debug)]
pub struct Invocation<'k, K: ?Sized> {
    pub kernel: &'k K,
    pub catalog: &'k TracerCatalog,
    pub dt: FloatValue,
}

impl<K: ?Sized> Clone for Invocation<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ?Sized> Copy for Invocation<'_, K> {}

/// Run the kernel over every column.
///
/// `work` is split into column-exclusive slices of `kernel.work_len(levels)` values.
/// The kernel work area is owned by the caller and sits outside the scratch budget
/// requested from the [`BufferManager`](mamx_core::buffer::BufferManager);
/// only the dry state lives in the scratch buffer.
/// The first failing column fails the stage.
pub fn invoke<K: WetDepositionKernel + ?Sized, P: StageProbe>(
    invocation: Invocation<'_, K>,
    views: InvocationViews<'_>,
    ncol: usize,
    levels: usize,
    work: &mut [f64],
    probe: &P,
) -> MamResult<()> {
    let _span = debug_span!("kernel_invocation", ncol, levels).entered();

    let work_len = invocation.kernel.work_len(levels);
    let required = work_len * ncol;
    if work.len() < required {
        return Err(MamError::Allocation {
            required: required * ELEMENT_SIZE,
            supplied: work.len() * ELEMENT_SIZE,
        });
    }
    let slices: Vec<&mut [f64]> = if work_len == 0 {
        (0..ncol).map(|_| Default::default()).collect()
    } else {
        work[..required].chunks_mut(work_len).collect()
    };

    views
        .into_columns(ncol)
        .into_par_iter()
        .zip(slices)
        .enumerate()
        .try_for_each(|(icol, (column, work))| {
            invoke_column(invocation, icol, column, work, probe)
        })
}

/// Process a single column: kernel call, then tendency update
pub fn invoke_column<K: WetDepositionKernel + ?Sized, P: StageProbe>(
    invocation: Invocation<'_, K>,
    icol: usize,
    column: InvocationColumn<'_>,
    work: &mut [f64],
    probe: &P,
) -> MamResult<()> {
    let Invocation {
        kernel,
        catalog,
        dt,
    } = invocation;
    let InvocationColumn {
        atmosphere,
        mut aerosols,
        diagnostics,
        mut optics,
        mut tendencies,
        mut deposition,
    } = column;
    let levels = atmosphere.t_mid.len();

    let output = probe.observe(Stage::Kernel, icol, || -> MamResult<KernelOutput> {
        trace!(column = icol, "Calling wet deposition kernel");
        let input = KernelInput {
            column: icol,
            dt,
            levels,
            catalog,
            atmosphere: atmosphere.map(|v| v.reborrow(), |v| v.reborrow()),
            aerosols: aerosols.map_ref(|v| v.view()),
            diagnostics: diagnostics.map(|v| v.reborrow()),
            optics: optics.map_ref(|v| v.view()),
        };
        let output = kernel
            .scavenge(&input, work)
            .map_err(|e| MamError::KernelFailure {
                column: icol,
                reason: e.to_string(),
            })?;
        output
            .validate(catalog, levels)
            .map_err(|reason| MamError::KernelFailure {
                column: icol,
                reason,
            })?;
        Ok(output)
    })?;

    for (dst, src) in optics.iter_mut().zip(output.optics.iter()) {
        dst.assign(src);
    }
    for ((_, dst), (_, src)) in tendencies.iter_mut().zip(output.tendencies.iter()) {
        dst.assign(src);
    }
    deposition.interstitial.assign(&output.deposition.interstitial);
    deposition.cloud_water.assign(&output.deposition.cloud_water);

    probe.observe(Stage::TendencyUpdate, icol, || {
        for (tracer, q) in aerosols.interstitial.iter_mut() {
            if !matches!(tracer.constituent, Constituent::Mass(_)) {
                continue;
            }
            if let Some(tendency) = output.tendencies.interstitial.get(tracer) {
                q.scaled_add(dt, tendency);
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelError, NullKernel};
    use approx::assert_relative_eq;
    use mamx_core::catalog::{ModalTracer, Phase, Tracer};
    use mamx_core::config::{ModalConfig, ModeDefinition};
    use mamx_core::probe::NoProbe;
    use mamx_core::state::DryAtmosphere;
    use ndarray::{Array2, Array3};

    fn catalog() -> TracerCatalog {
        TracerCatalog::new(ModalConfig {
            species: vec!["so4".to_string(), "bc".to_string()],
            modes: vec![
                ModeDefinition::new("accumulation", &["so4", "bc"]),
                ModeDefinition::new("aitken", &["so4"]),
            ],
            gases: vec!["SO2".to_string()],
        })
        .unwrap()
    }

    struct Storage {
        atmosphere: DryAtmosphere<Array2<f64>, Array2<f64>>,
        aerosols: AerosolFields<Array2<f64>>,
        diagnostics: ConvectiveDiagnostics<Array2<f64>>,
        optics: ModalOptics<Array3<f64>>,
        tendencies: TendencyFields<Array2<f64>>,
        deposition: WetDeposition<Array2<f64>>,
    }

    impl Storage {
        fn new(catalog: &TracerCatalog, ncol: usize, nlev: usize) -> Self {
            let mid = || Array2::from_elem((ncol, nlev), 1.0);
            let constituents = || Array2::zeros((ncol, catalog.num_advected()));
            Self {
                atmosphere: DryAtmosphere {
                    t_mid: mid(),
                    p_mid: mid(),
                    p_int: Array2::zeros((ncol, nlev + 1)),
                    p_del: mid(),
                    cldfrac: mid(),
                    pblh: Array2::zeros((ncol, 1)),
                    phis: Array2::zeros((ncol, 1)),
                    qv: mid(),
                    qc: mid(),
                    nc: mid(),
                    qi: mid(),
                    ni: mid(),
                    z_mid: mid(),
                    dz: mid(),
                    z_iface: Array2::zeros((ncol, nlev + 1)),
                    w_updraft: mid(),
                },
                aerosols: AerosolFields::from_catalog(catalog, |_| {
                    Array2::from_elem((ncol, nlev), 1e-9)
                }),
                diagnostics: ConvectiveDiagnostics::names().map(|_| mid()),
                optics: ModalOptics::names()
                    .map(|_| Array3::from_elem((ncol, catalog.num_modes(), nlev), 1e-7)),
                tendencies: TendencyFields::from_catalog(catalog, |_| Array2::zeros((ncol, nlev))),
                deposition: WetDeposition {
                    interstitial: constituents(),
                    cloud_water: constituents(),
                },
            }
        }

        fn views(&mut self) -> InvocationViews<'_> {
            let atmosphere = DryAtmosphere {
                t_mid: self.atmosphere.t_mid.view(),
                p_mid: self.atmosphere.p_mid.view(),
                p_int: self.atmosphere.p_int.view(),
                p_del: self.atmosphere.p_del.view(),
                cldfrac: self.atmosphere.cldfrac.view(),
                pblh: self.atmosphere.pblh.view(),
                phis: self.atmosphere.phis.view(),
                qv: self.atmosphere.qv.view(),
                qc: self.atmosphere.qc.view(),
                nc: self.atmosphere.nc.view(),
                qi: self.atmosphere.qi.view(),
                ni: self.atmosphere.ni.view(),
                z_mid: self.atmosphere.z_mid.view(),
                dz: self.atmosphere.dz.view(),
                z_iface: self.atmosphere.z_iface.view(),
                w_updraft: self.atmosphere.w_updraft.view(),
            };
            InvocationViews {
                atmosphere,
                aerosols: self
                    .aerosols
                    .try_map_mut(|a| Ok::<_, ()>(a.view_mut()))
                    .unwrap(),
                diagnostics: self
                    .diagnostics
                    .try_map_ref(|a| Ok::<_, ()>(a.view()))
                    .unwrap(),
                optics: self
                    .optics
                    .try_map_mut(|a| Ok::<_, ()>(a.view_mut()))
                    .unwrap(),
                tendencies: self
                    .tendencies
                    .try_map_mut(|a| Ok::<_, ()>(a.view_mut()))
                    .unwrap(),
                deposition: self
                    .deposition
                    .try_map_mut(|a| Ok::<_, ()>(a.view_mut()))
                    .unwrap(),
            }
        }
    }

    /// Removes a fixed fraction of every tracer per second
    #[derive(Debug)]
    struct Decay {
        rate: f64,
    }

    impl WetDepositionKernel for Decay {
        fn work_len(&self, levels: usize) -> usize {
            2 * levels
        }

        fn scavenge(
            &self,
            input: &KernelInput<'_>,
            work: &mut [f64],
        ) -> Result<KernelOutput, KernelError> {
            assert_eq!(work.len(), 2 * input.levels);
            work.fill(input.column as f64);

            let mut output = KernelOutput::unchanged(input);
            for (tracer, tendency) in output.tendencies.iter_mut() {
                if let Some(q) = input.aerosols.get(tracer) {
                    tendency.assign(&(q * -self.rate));
                }
            }
            output.optics.wetdens.fill(1000.0);
            output.deposition.interstitial.fill(input.column as f64);
            Ok(output)
        }
    }

    #[derive(Debug)]
    struct FailsInColumn(usize);

    impl WetDepositionKernel for FailsInColumn {
        fn scavenge(
            &self,
            input: &KernelInput<'_>,
            _work: &mut [f64],
        ) -> Result<KernelOutput, KernelError> {
            if input.column == self.0 {
                return Err(KernelError::NonConvergence { level: 1 });
            }
            Ok(KernelOutput::unchanged(input))
        }
    }

    #[derive(Debug)]
    struct WrongLevels;

    impl WetDepositionKernel for WrongLevels {
        fn scavenge(
            &self,
            input: &KernelInput<'_>,
            _work: &mut [f64],
        ) -> Result<KernelOutput, KernelError> {
            let mut output = KernelOutput::unchanged(input);
            output.deposition.cloud_water = ndarray::Array1::zeros(1);
            Ok(output)
        }
    }

    fn run<K: WetDepositionKernel>(
        kernel: &K,
        catalog: &TracerCatalog,
        storage: &mut Storage,
        work: &mut [f64],
    ) -> MamResult<()> {
        let (ncol, nlev) = storage.atmosphere.t_mid.dim();
        let invocation = Invocation {
            kernel,
            catalog,
            dt: 10.0,
        };
        invoke(invocation, storage.views(), ncol, nlev, work, &NoProbe)
    }

    #[test]
    fn test_tendencies_applied_to_species_mass_only() {
        let catalog = catalog();
        let (ncol, nlev) = (3, 4);
        let mut storage = Storage::new(&catalog, ncol, nlev);
        let mut work = vec![-1.0; ncol * 2 * nlev];

        run(&Decay { rate: 0.01 }, &catalog, &mut storage, &mut work).unwrap();

        let so4 = Tracer::Modal(ModalTracer::mass(0, 0, Phase::Interstitial));
        let num = Tracer::Modal(ModalTracer::number(0, Phase::Interstitial));
        let so4_c = Tracer::Modal(ModalTracer::mass(0, 0, Phase::CloudBorne));
        let gas = Tracer::Gas(0);

        // q + dt * (-rate * q)
        let expected = 1e-9 * (1.0 - 10.0 * 0.01);
        assert!(storage
            .aerosols
            .get(so4)
            .unwrap()
            .iter()
            .all(|v| (v - expected).abs() < 1e-20));
        for untouched in [num, so4_c, gas] {
            assert!(storage
                .aerosols
                .get(untouched)
                .unwrap()
                .iter()
                .all(|v| *v == 1e-9));
        }

        // Tendencies of numbers and gases are stored but not applied
        let tendency = |t: Tracer| {
            storage
                .tendencies
                .iter()
                .find(|(tracer, _)| *tracer == t)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_relative_eq!(tendency(num)[[0, 0]], -1e-11);
        assert_relative_eq!(tendency(gas)[[2, 3]], -1e-11);

        assert!(storage.optics.wetdens.iter().all(|v| *v == 1000.0));
        assert!(storage.optics.qaerwat.iter().all(|v| *v == 1e-7));
        for icol in 0..ncol {
            assert!(storage
                .deposition
                .interstitial
                .row(icol)
                .iter()
                .all(|v| *v == icol as f64));
        }

        // Each column wrote only to its own slice of the work memory
        for (icol, chunk) in work.chunks(2 * nlev).enumerate() {
            assert!(chunk.iter().all(|v| *v == icol as f64));
        }
    }

    #[test]
    fn test_null_kernel_leaves_state_unchanged() {
        let catalog = catalog();
        let mut storage = Storage::new(&catalog, 2, 3);
        run(&NullKernel, &catalog, &mut storage, &mut []).unwrap();

        assert!(storage
            .aerosols
            .iter()
            .all(|(_, v)| v.iter().all(|x| *x == 1e-9)));
        assert!(storage
            .tendencies
            .iter()
            .all(|(_, v)| v.iter().all(|x| *x == 0.0)));
        assert!(storage.optics.dgnumwet.iter().all(|v| *v == 1e-7));
    }

    #[test]
    fn test_kernel_error_is_propagated() {
        let catalog = catalog();
        let mut storage = Storage::new(&catalog, 4, 2);
        let err = run(&FailsInColumn(2), &catalog, &mut storage, &mut []).unwrap_err();
        match err {
            MamError::KernelFailure { column, reason } => {
                assert_eq!(column, 2);
                assert!(reason.contains("level 1"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_invalid_output_is_a_kernel_failure() {
        let catalog = catalog();
        let mut storage = Storage::new(&catalog, 1, 2);
        let err = run(&WrongLevels, &catalog, &mut storage, &mut []).unwrap_err();
        assert!(matches!(err, MamError::KernelFailure { column: 0, .. }));
    }

    #[test]
    fn test_insufficient_work_memory() {
        let catalog = catalog();
        let mut storage = Storage::new(&catalog, 2, 3);
        let mut work = vec![0.0; 5];
        let err = run(&Decay { rate: 0.0 }, &catalog, &mut storage, &mut work).unwrap_err();
        assert!(matches!(
            err,
            MamError::Allocation {
                required: 96,
                supplied: 40
            }
        ));
    }
}
