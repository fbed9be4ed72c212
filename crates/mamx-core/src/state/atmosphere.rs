//! Wet and dry atmospheric state aggregates
//!
//! Both aggregates are generic over their payload so the same struct describes
//! registry handles, whole-grid views and single-column views.

use crate::fields::{next_column, IntoColumns};
use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};

/// Moist-basis quantities that are converted to the dry basis
#[derive(Debug, Clone, PartialEq)]
pub struct WetAtmosphere<T> {
    /// Specific humidity [kg/kg]
    pub qv: T,
    /// Cloud liquid mass mixing ratio [kg/kg]
    pub qc: T,
    /// Cloud liquid number mixing ratio [1/kg]
    pub nc: T,
    /// Cloud ice mass mixing ratio [kg/kg]
    pub qi: T,
    /// Cloud ice number mixing ratio [1/kg]
    pub ni: T,
    /// Vertical pressure velocity [Pa/s]
    pub omega: T,
}

impl<T> WetAtmosphere<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> WetAtmosphere<U> {
        WetAtmosphere {
            qv: f(self.qv),
            qc: f(self.qc),
            nc: f(self.nc),
            qi: f(self.qi),
            ni: f(self.ni),
            omega: f(self.omega),
        }
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<WetAtmosphere<U>, E> {
        Ok(WetAtmosphere {
            qv: f(&self.qv)?,
            qc: f(&self.qc)?,
            nc: f(&self.nc)?,
            qi: f(&self.qi)?,
            ni: f(&self.ni)?,
            omega: f(&self.omega)?,
        })
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<WetAtmosphere<U>, E> {
        Ok(WetAtmosphere {
            qv: f(&mut self.qv)?,
            qc: f(&mut self.qc)?,
            nc: f(&mut self.nc)?,
            qi: f(&mut self.qi)?,
            ni: f(&mut self.ni)?,
            omega: f(&mut self.omega)?,
        })
    }
}

impl<T: IntoColumns> IntoColumns for WetAtmosphere<T> {
    type Column = WetAtmosphere<T::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(|v| v.into_columns(ncol).into_iter());
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column).ok())
            .collect()
    }
}

/// Dry-basis atmosphere.
///
/// `R` is the payload of the fields passed through from the registry,
/// `W` the payload of the fields converted or derived into scratch storage.
/// Derived quantities (heights, layer thickness, updraft velocity) only exist here.
#[derive(Debug, Clone, PartialEq)]
pub struct DryAtmosphere<R, W> {
    /// Temperature [K]
    pub t_mid: R,
    /// Mid-point pressure [Pa]
    pub p_mid: R,
    /// Interface pressure [Pa]
    pub p_int: R,
    /// Pressure thickness of each layer [Pa]
    pub p_del: R,
    /// Total cloud fraction [1]
    pub cldfrac: R,
    /// Planetary boundary layer height [m]
    pub pblh: R,
    /// Surface geopotential [m2/s2]
    pub phis: R,

    pub qv: W,
    pub qc: W,
    pub nc: W,
    pub qi: W,
    pub ni: W,
    /// Geopotential height of mid-points above the surface [m]
    pub z_mid: W,
    /// Layer thickness [m]
    pub dz: W,
    /// Geopotential height of interfaces [m]
    pub z_iface: W,
    /// Updraft velocity [m/s]
    pub w_updraft: W,
}

impl<R, W> DryAtmosphere<R, W> {
    pub fn map<R2, W2>(
        self,
        mut read: impl FnMut(R) -> R2,
        mut write: impl FnMut(W) -> W2,
    ) -> DryAtmosphere<R2, W2> {
        DryAtmosphere {
            t_mid: read(self.t_mid),
            p_mid: read(self.p_mid),
            p_int: read(self.p_int),
            p_del: read(self.p_del),
            cldfrac: read(self.cldfrac),
            pblh: read(self.pblh),
            phis: read(self.phis),
            qv: write(self.qv),
            qc: write(self.qc),
            nc: write(self.nc),
            qi: write(self.qi),
            ni: write(self.ni),
            z_mid: write(self.z_mid),
            dz: write(self.dz),
            z_iface: write(self.z_iface),
            w_updraft: write(self.w_updraft),
        }
    }

    pub fn try_map_ref<'s, R2, W2, E>(
        &'s self,
        mut read: impl FnMut(&'s R) -> Result<R2, E>,
        mut write: impl FnMut(&'s W) -> Result<W2, E>,
    ) -> Result<DryAtmosphere<R2, W2>, E> {
        Ok(DryAtmosphere {
            t_mid: read(&self.t_mid)?,
            p_mid: read(&self.p_mid)?,
            p_int: read(&self.p_int)?,
            p_del: read(&self.p_del)?,
            cldfrac: read(&self.cldfrac)?,
            pblh: read(&self.pblh)?,
            phis: read(&self.phis)?,
            qv: write(&self.qv)?,
            qc: write(&self.qc)?,
            nc: write(&self.nc)?,
            qi: write(&self.qi)?,
            ni: write(&self.ni)?,
            z_mid: write(&self.z_mid)?,
            dz: write(&self.dz)?,
            z_iface: write(&self.z_iface)?,
            w_updraft: write(&self.w_updraft)?,
        })
    }

    pub fn try_map_mut<'s, R2, W2, E>(
        &'s mut self,
        mut read: impl FnMut(&'s mut R) -> Result<R2, E>,
        mut write: impl FnMut(&'s mut W) -> Result<W2, E>,
    ) -> Result<DryAtmosphere<R2, W2>, E> {
        Ok(DryAtmosphere {
            t_mid: read(&mut self.t_mid)?,
            p_mid: read(&mut self.p_mid)?,
            p_int: read(&mut self.p_int)?,
            p_del: read(&mut self.p_del)?,
            cldfrac: read(&mut self.cldfrac)?,
            pblh: read(&mut self.pblh)?,
            phis: read(&mut self.phis)?,
            qv: write(&mut self.qv)?,
            qc: write(&mut self.qc)?,
            nc: write(&mut self.nc)?,
            qi: write(&mut self.qi)?,
            ni: write(&mut self.ni)?,
            z_mid: write(&mut self.z_mid)?,
            dz: write(&mut self.dz)?,
            z_iface: write(&mut self.z_iface)?,
            w_updraft: write(&mut self.w_updraft)?,
        })
    }
}

impl<R: IntoColumns, W: IntoColumns> IntoColumns for DryAtmosphere<R, W> {
    type Column = DryAtmosphere<R::Column, W::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(
            |v| v.into_columns(ncol).into_iter(),
            |v| v.into_columns(ncol).into_iter(),
        );
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column, next_column).ok())
            .collect()
    }
}

/// Wet atmosphere over every column
pub type WetAtmosphereView<'a> = WetAtmosphere<ArrayView2<'a, f64>>;
/// Wet atmosphere of a single column
pub type WetAtmosphereColumn<'a> = WetAtmosphere<ArrayView1<'a, f64>>;

/// Dry atmosphere over every column, with writable scratch fields
pub type DryAtmosphereViewMut<'a> = DryAtmosphere<ArrayView2<'a, f64>, ArrayViewMut2<'a, f64>>;
/// Read-only dry atmosphere over every column
pub type DryAtmosphereView<'a> = DryAtmosphere<ArrayView2<'a, f64>, ArrayView2<'a, f64>>;
/// Dry atmosphere of a single column, with writable scratch fields
pub type DryAtmosphereColumnMut<'a> =
    DryAtmosphere<ArrayView1<'a, f64>, ArrayViewMut1<'a, f64>>;
/// Read-only dry atmosphere of a single column
pub type DryAtmosphereColumn<'a> = DryAtmosphere<ArrayView1<'a, f64>, ArrayView1<'a, f64>>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_wet_into_columns() {
        let storage = WetAtmosphere {
            qv: Array2::from_shape_fn((3, 2), |(i, _)| i as f64),
            qc: Array2::zeros((3, 2)),
            nc: Array2::zeros((3, 2)),
            qi: Array2::zeros((3, 2)),
            ni: Array2::zeros((3, 2)),
            omega: Array2::zeros((3, 2)),
        };
        let views = storage
            .try_map_ref(|a| Ok::<_, ()>(a.view()))
            .unwrap();
        let columns = views.into_columns(3);
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2].qv[0], 2.0);
        assert_eq!(columns[1].qv.len(), 2);
    }

    #[test]
    fn test_dry_into_columns_writes_own_column() {
        let read = Array2::<f64>::zeros((2, 3));
        let mut scratch: Vec<Array2<f64>> = (0..9).map(|_| Array2::zeros((2, 3))).collect();
        let mut iter = scratch.iter_mut();
        let mut next = || iter.next().map(|a| a.view_mut()).ok_or(());
        let dry = DryAtmosphere {
            t_mid: read.view(),
            p_mid: read.view(),
            p_int: read.view(),
            p_del: read.view(),
            cldfrac: read.view(),
            pblh: read.view(),
            phis: read.view(),
            qv: next().unwrap(),
            qc: next().unwrap(),
            nc: next().unwrap(),
            qi: next().unwrap(),
            ni: next().unwrap(),
            z_mid: next().unwrap(),
            dz: next().unwrap(),
            z_iface: next().unwrap(),
            w_updraft: next().unwrap(),
        };
        for (icol, mut column) in dry.into_columns(2).into_iter().enumerate() {
            column.dz.fill(icol as f64 + 1.0);
        }
        let dz = &scratch[6];
        assert!(dz.row(0).iter().all(|v| *v == 1.0));
        assert!(dz.row(1).iter().all(|v| *v == 2.0));
    }
}
