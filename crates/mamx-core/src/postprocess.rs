//! Column post-process stage
//!
//! Converts the dry-basis tracers back to the wet basis and writes them to the registry.

use crate::fields::{next_column, AerosolFields, IntoColumns};
use crate::physics::wet_from_dry;
use crate::probe::{Stage, StageProbe};
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};
use rayon::prelude::*;
use tracing::debug_span;

/// Everything the post-process stage reads and writes
pub struct PostProcessViews<'a> {
    /// Dry-basis water vapour mixing ratio
    pub qv_dry: ArrayView2<'a, f64>,
    pub dry_aerosols: AerosolFields<ArrayView2<'a, f64>>,
    pub wet_aerosols: AerosolFields<ArrayViewMut2<'a, f64>>,
}

pub struct PostProcessColumn<'a> {
    pub qv_dry: ArrayView1<'a, f64>,
    pub dry_aerosols: AerosolFields<ArrayView1<'a, f64>>,
    pub wet_aerosols: AerosolFields<ArrayViewMut1<'a, f64>>,
}

impl<'a> IntoColumns for PostProcessViews<'a> {
    type Column = PostProcessColumn<'a>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut qv_dry = self.qv_dry.into_columns(ncol).into_iter();
        let mut dry_aerosols = self.dry_aerosols.into_columns(ncol).into_iter();
        let mut wet_aerosols = self.wet_aerosols.into_columns(ncol).into_iter();
        (0..ncol)
            .map_while(|_| {
                Some(PostProcessColumn {
                    qv_dry: next_column(&mut qv_dry).ok()?,
                    dry_aerosols: next_column(&mut dry_aerosols).ok()?,
                    wet_aerosols: next_column(&mut wet_aerosols).ok()?,
                })
            })
            .collect()
    }
}

/// Run the post-process stage over every column
pub fn post_process<P: StageProbe>(views: PostProcessViews<'_>, ncol: usize, probe: &P) {
    let _span = debug_span!("post_process", ncol).entered();
    views
        .into_columns(ncol)
        .into_par_iter()
        .enumerate()
        .for_each(|(icol, column)| {
            probe.observe(Stage::WetConversion, icol, || process_column(column))
        });
}

/// Convert every tracer of a single column to the wet basis
pub fn process_column(column: PostProcessColumn<'_>) {
    let PostProcessColumn {
        qv_dry,
        dry_aerosols,
        mut wet_aerosols,
    } = column;
    for ((_, dry), (_, wet)) in dry_aerosols.iter().zip(wet_aerosols.iter_mut()) {
        for k in 0..qv_dry.len() {
            wet[k] = wet_from_dry(dry[k], qv_dry[k]);
        }
    }
}
