//! Column pre-process stage
//!
//! Converts the wet state to the dry basis and derives the column geometry from it.
//! Columns are processed in parallel. Within a column the geometry phase only starts
//! once every dry mixing ratio of that column has been written.

use crate::fields::{next_column, AerosolFields, IntoColumns};
use crate::physics::{
    air_density, dry_air_fraction, interface_heights, layer_thickness, midpoint_heights,
    vertical_velocity,
};
use crate::probe::{Stage, StageProbe};
use crate::state::{DryAtmosphere, WetAtmosphere};
use crate::FloatValue;
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};
use rayon::prelude::*;
use tracing::debug_span;

/// Everything the pre-process stage reads and writes
pub struct PreProcessViews<'a> {
    pub wet_atmosphere: WetAtmosphere<ArrayView2<'a, f64>>,
    pub dry_atmosphere: DryAtmosphere<ArrayView2<'a, f64>, ArrayViewMut2<'a, f64>>,
    pub wet_aerosols: AerosolFields<ArrayView2<'a, f64>>,
    pub dry_aerosols: AerosolFields<ArrayViewMut2<'a, f64>>,
}

/// The pre-process views of a single column
pub struct PreProcessColumn<'a> {
    pub wet_atmosphere: WetAtmosphere<ArrayView1<'a, f64>>,
    pub dry_atmosphere: DryAtmosphere<ArrayView1<'a, f64>, ArrayViewMut1<'a, f64>>,
    pub wet_aerosols: AerosolFields<ArrayView1<'a, f64>>,
    pub dry_aerosols: AerosolFields<ArrayViewMut1<'a, f64>>,
}

impl<'a> IntoColumns for PreProcessViews<'a> {
    type Column = PreProcessColumn<'a>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut wet_atmosphere = self.wet_atmosphere.into_columns(ncol).into_iter();
        let mut dry_atmosphere = self.dry_atmosphere.into_columns(ncol).into_iter();
        let mut wet_aerosols = self.wet_aerosols.into_columns(ncol).into_iter();
        let mut dry_aerosols = self.dry_aerosols.into_columns(ncol).into_iter();
        (0..ncol)
            .map_while(|_| {
                Some(PreProcessColumn {
                    wet_atmosphere: next_column(&mut wet_atmosphere).ok()?,
                    dry_atmosphere: next_column(&mut dry_atmosphere).ok()?,
                    wet_aerosols: next_column(&mut wet_aerosols).ok()?,
                    dry_aerosols: next_column(&mut dry_aerosols).ok()?,
                })
            })
            .collect()
    }
}

/// Run the pre-process stage over every column.
///
/// Returns once every column has been processed.
pub fn pre_process<P: StageProbe>(
    views: PreProcessViews<'_>,
    ncol: usize,
    z_surf: FloatValue,
    probe: &P,
) {
    let _span = debug_span!("pre_process", ncol).entered();
    views
        .into_columns(ncol)
        .into_par_iter()
        .enumerate()
        .for_each(|(icol, column)| process_column(icol, column, z_surf, probe));
}

/// Process a single column: dry conversion, then geometry
pub fn process_column<P: StageProbe>(
    icol: usize,
    column: PreProcessColumn<'_>,
    z_surf: FloatValue,
    probe: &P,
) {
    let PreProcessColumn {
        wet_atmosphere: wet,
        dry_atmosphere: mut dry,
        wet_aerosols,
        mut dry_aerosols,
    } = column;

    probe.observe(Stage::DryConversion, icol, || {
        convert_atmosphere(&wet, &mut dry);
        convert_aerosols(wet.qv.view(), &wet_aerosols, &mut dry_aerosols);
    });

    // Geometry depends on the dry water vapour of every level
    probe.observe(Stage::Geometry, icol, || {
        compute_geometry(&wet, &mut dry, z_surf);
    });
}

fn convert_atmosphere(
    wet: &WetAtmosphere<ArrayView1<'_, f64>>,
    dry: &mut DryAtmosphere<ArrayView1<'_, f64>, ArrayViewMut1<'_, f64>>,
) {
    for k in 0..wet.qv.len() {
        let fraction = dry_air_fraction(wet.qv[k]);
        dry.qv[k] = wet.qv[k] / fraction;
        dry.qc[k] = wet.qc[k] / fraction;
        dry.nc[k] = wet.nc[k] / fraction;
        dry.qi[k] = wet.qi[k] / fraction;
        dry.ni[k] = wet.ni[k] / fraction;
    }
}

fn convert_aerosols(
    qv_wet: ArrayView1<'_, f64>,
    wet: &AerosolFields<ArrayView1<'_, f64>>,
    dry: &mut AerosolFields<ArrayViewMut1<'_, f64>>,
) {
    for ((_, wet), (_, dry)) in wet.iter().zip(dry.iter_mut()) {
        for k in 0..qv_wet.len() {
            dry[k] = wet[k] / dry_air_fraction(qv_wet[k]);
        }
    }
}

fn compute_geometry(
    wet: &WetAtmosphere<ArrayView1<'_, f64>>,
    dry: &mut DryAtmosphere<ArrayView1<'_, f64>, ArrayViewMut1<'_, f64>>,
    z_surf: FloatValue,
) {
    let nlev = dry.qv.len();
    for k in 0..nlev {
        dry.dz[k] = layer_thickness(dry.p_del[k], dry.t_mid[k], dry.p_mid[k], dry.qv[k]);
    }
    interface_heights(dry.dz.view(), z_surf, dry.z_iface.view_mut());
    midpoint_heights(dry.z_iface.view(), dry.z_mid.view_mut());
    for k in 0..nlev {
        let density = air_density(dry.p_del[k], dry.dz[k]);
        dry.w_updraft[k] = vertical_velocity(wet.omega[k], density);
    }
}
