//! Thermodynamic relations used by the wet/dry conversion and the column geometry
//!
//! All functions are pointwise except [`interface_heights`] and [`midpoint_heights`],
//! which operate on a single column.
//! Level 0 is the model top; the last interface is the surface.

use crate::FloatValue;
use ndarray::{ArrayView1, ArrayViewMut1};

/// Gravitational acceleration [m/s2]
pub const GRAVITY: FloatValue = 9.80616;
/// Gas constant of dry air [J/K/kg]
pub const R_DRY_AIR: FloatValue = 287.042;
/// Molecular weight of water [g/mol]
pub const MW_WATER: FloatValue = 18.016;
/// Molecular weight of dry air [g/mol]
pub const MW_DRY_AIR: FloatValue = 28.966;
/// Ratio of the molecular weights of water and dry air
pub const EPSILON: FloatValue = MW_WATER / MW_DRY_AIR;

/// Fraction of moist air that is dry air, `1 - qv_wet`.
///
/// Equivalently `1 / (1 + qv_dry)`.
pub fn dry_air_fraction(qv_wet: FloatValue) -> FloatValue {
    1.0 - qv_wet
}

/// Convert a moist-basis mixing ratio to the dry basis
pub fn dry_from_wet(wet: FloatValue, qv_wet: FloatValue) -> FloatValue {
    wet / dry_air_fraction(qv_wet)
}

/// Convert a dry-basis mixing ratio to the moist basis
pub fn wet_from_dry(dry: FloatValue, qv_dry: FloatValue) -> FloatValue {
    dry / (1.0 + qv_dry)
}

/// Virtual temperature from temperature and the dry-basis water vapour mixing ratio
pub fn virtual_temperature(temperature: FloatValue, qv_dry: FloatValue) -> FloatValue {
    temperature * (qv_dry + EPSILON) / (EPSILON * (1.0 + qv_dry))
}

/// Hydrostatic layer thickness [m]
///
/// `dz = (Rd / g) * pseudo_density * Tv / p_mid`
pub fn layer_thickness(
    pseudo_density: FloatValue,
    temperature: FloatValue,
    p_mid: FloatValue,
    qv_dry: FloatValue,
) -> FloatValue {
    (R_DRY_AIR / GRAVITY) * pseudo_density * virtual_temperature(temperature, qv_dry) / p_mid
}

/// Air density of a layer [kg/m3]
pub fn air_density(pseudo_density: FloatValue, dz: FloatValue) -> FloatValue {
    pseudo_density / (dz * GRAVITY)
}

/// Vertical velocity [m/s] from the vertical pressure velocity [Pa/s]
pub fn vertical_velocity(omega: FloatValue, density: FloatValue) -> FloatValue {
    -omega / (density * GRAVITY)
}

/// Interface heights from layer thicknesses.
///
/// Accumulated from the surface upwards, starting at `z_surf`.
/// `z_iface` has one more element than `dz`.
pub fn interface_heights(
    dz: ArrayView1<FloatValue>,
    z_surf: FloatValue,
    mut z_iface: ArrayViewMut1<FloatValue>,
) {
    let nlev = dz.len();
    z_iface[nlev] = z_surf;
    for k in (0..nlev).rev() {
        z_iface[k] = z_iface[k + 1] + dz[k];
    }
}

/// Mid-point heights as the average of the bounding interfaces
pub fn midpoint_heights(z_iface: ArrayView1<FloatValue>, mut z_mid: ArrayViewMut1<FloatValue>) {
    for k in 0..z_mid.len() {
        z_mid[k] = 0.5 * (z_iface[k] + z_iface[k + 1]);
    }
}
