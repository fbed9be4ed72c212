//! Resolution of registry fields and scratch regions
//!
//! Binding happens once, during initialization: names are resolved to handles and shapes
//! are validated.
//! Each timestep then materializes views from the bindings without any further lookups.

use super::atmosphere::{DryAtmosphere, DryAtmosphereView, DryAtmosphereViewMut, WetAtmosphere};
use crate::buffer::{DryAtmosphereField, ScratchField, ScratchLayout, ScratchViews};
use crate::catalog::{Constituent, ModalTracer, Phase, Tracer, TracerCatalog};
use crate::errors::{MamError, MamResult};
use crate::fields::{AerosolFields, TendencyFields};
use crate::registry::{FieldHandle, FieldRegistry, FieldRequirement, FieldSet, FieldShape};
use ndarray::{ArrayView2, ArrayViewMut2};
use tracing::debug;

/// Names, units and shapes of the registry fields backing the atmospheric state
pub mod names {
    pub const QV: &str = "qv";
    pub const QC: &str = "qc";
    pub const NC: &str = "nc";
    pub const QI: &str = "qi";
    pub const NI: &str = "ni";
    pub const OMEGA: &str = "omega";
    pub const T_MID: &str = "T_mid";
    pub const P_MID: &str = "p_mid";
    pub const P_INT: &str = "p_int";
    pub const PSEUDO_DENSITY: &str = "pseudo_density";
    pub const CLDFRAC_TOT: &str = "cldfrac_tot";
    pub const PBL_HEIGHT: &str = "pbl_height";
    pub const PHIS: &str = "phis";
}

/// Registry requirements of the atmospheric state, all read-only
pub fn atmosphere_requirements() -> Vec<FieldRequirement> {
    use names::*;
    vec![
        FieldRequirement::required(QV, "kg/kg", FieldShape::Midpoint),
        FieldRequirement::required(QC, "kg/kg", FieldShape::Midpoint),
        FieldRequirement::required(NC, "1/kg", FieldShape::Midpoint),
        FieldRequirement::required(QI, "kg/kg", FieldShape::Midpoint),
        FieldRequirement::required(NI, "1/kg", FieldShape::Midpoint),
        FieldRequirement::required(OMEGA, "Pa/s", FieldShape::Midpoint),
        FieldRequirement::required(T_MID, "K", FieldShape::Midpoint),
        FieldRequirement::required(P_MID, "Pa", FieldShape::Midpoint),
        FieldRequirement::required(P_INT, "Pa", FieldShape::Interface),
        FieldRequirement::required(PSEUDO_DENSITY, "Pa", FieldShape::Midpoint),
        FieldRequirement::required(CLDFRAC_TOT, "1", FieldShape::Midpoint),
        FieldRequirement::required(PBL_HEIGHT, "m", FieldShape::Column),
        FieldRequirement::required(PHIS, "m2/s2", FieldShape::Column),
    ]
}

/// Units of a tracer's mixing ratio
pub fn tracer_unit(tracer: Tracer) -> &'static str {
    match tracer {
        Tracer::Modal(modal) => match modal.constituent {
            Constituent::Number => "1/kg",
            Constituent::Mass(_) => "kg/kg",
        },
        Tracer::Gas(_) => "kg/kg",
    }
}

/// Registry requirements of every tracer in the catalog.
///
/// Tracers are updated in place: read on the wet basis and written back after conversion.
pub fn tracer_requirements(catalog: &TracerCatalog) -> Vec<FieldRequirement> {
    catalog
        .tracers()
        .map(|t| FieldRequirement::updated(&catalog.name(t), tracer_unit(t), FieldShape::Midpoint))
        .collect()
}

/// Registry requirements of the interstitial and gas tendencies
pub fn tendency_requirements(catalog: &TracerCatalog) -> Vec<FieldRequirement> {
    catalog
        .advected_tracers()
        .filter_map(|t| {
            catalog.tendency_name(t).map(|name| {
                FieldRequirement::computed(
                    &name,
                    &format!("{}/s", tracer_unit(t)),
                    FieldShape::Midpoint,
                )
            })
        })
        .collect()
}

/// Handles of the wet atmosphere and the sources of the dry atmosphere
#[derive(Debug, Clone)]
pub struct AtmosphereBinding {
    pub wet: WetAtmosphere<FieldHandle>,
    pub dry: DryAtmosphere<FieldHandle, ScratchField>,
}

impl AtmosphereBinding {
    pub fn wet_views<'a>(
        &self,
        fields: &mut FieldSet<'a>,
    ) -> MamResult<WetAtmosphere<ArrayView2<'a, f64>>> {
        self.wet.try_map_ref(|h| fields.read(*h))
    }

    /// Dry atmosphere with writable scratch fields
    pub fn dry_views_mut<'a>(
        &self,
        fields: &mut FieldSet<'a>,
        scratch: &mut ScratchViews<'a>,
    ) -> MamResult<DryAtmosphereViewMut<'a>> {
        self.dry
            .try_map_ref(|h| fields.read(*h), |f| scratch.take(*f))
    }

    /// Read-only dry atmosphere
    pub fn dry_views<'a>(
        &self,
        fields: &mut FieldSet<'a>,
        scratch: &mut ScratchViews<'a>,
    ) -> MamResult<DryAtmosphereView<'a>> {
        self.dry
            .try_map_ref(|h| fields.read(*h), |f| scratch.shared(*f))
    }
}

/// Resolve the atmospheric state against the registry and the scratch layout
pub fn bind_atmosphere(
    registry: &FieldRegistry,
    layout: &ScratchLayout,
) -> MamResult<AtmosphereBinding> {
    use names::*;

    let scratch = |field: DryAtmosphereField| -> MamResult<ScratchField> {
        let key = ScratchField::Atmosphere(field);
        let region = layout.region(key)?;
        let expected = field.shape().width(layout.grid().levels);
        if region.cols != expected {
            return Err(MamError::ShapeMismatch {
                field: field.name().to_string(),
                expected: expected.to_string(),
                actual: region.cols.to_string(),
            });
        }
        Ok(key)
    };
    let midpoint = |name: &str| registry.lookup(name, FieldShape::Midpoint);

    let binding = AtmosphereBinding {
        wet: WetAtmosphere {
            qv: midpoint(QV)?,
            qc: midpoint(QC)?,
            nc: midpoint(NC)?,
            qi: midpoint(QI)?,
            ni: midpoint(NI)?,
            omega: midpoint(OMEGA)?,
        },
        dry: DryAtmosphere {
            t_mid: midpoint(T_MID)?,
            p_mid: midpoint(P_MID)?,
            p_int: registry.lookup(P_INT, FieldShape::Interface)?,
            p_del: midpoint(PSEUDO_DENSITY)?,
            cldfrac: midpoint(CLDFRAC_TOT)?,
            pblh: registry.lookup(PBL_HEIGHT, FieldShape::Column)?,
            phis: registry.lookup(PHIS, FieldShape::Column)?,
            qv: scratch(DryAtmosphereField::Qv)?,
            qc: scratch(DryAtmosphereField::Qc)?,
            nc: scratch(DryAtmosphereField::Nc)?,
            qi: scratch(DryAtmosphereField::Qi)?,
            ni: scratch(DryAtmosphereField::Ni)?,
            z_mid: scratch(DryAtmosphereField::ZMid)?,
            dz: scratch(DryAtmosphereField::Dz)?,
            z_iface: scratch(DryAtmosphereField::ZIface)?,
            w_updraft: scratch(DryAtmosphereField::WUpdraft)?,
        },
    };
    debug!("Bound atmospheric state");
    Ok(binding)
}

/// Registry fields (wet) and scratch regions (dry) of every present tracer
#[derive(Debug, Clone)]
pub struct AerosolBinding {
    pub wet: AerosolFields<FieldHandle>,
    pub dry: AerosolFields<ScratchField>,
}

impl AerosolBinding {
    pub fn wet_views<'a>(
        &self,
        fields: &mut FieldSet<'a>,
    ) -> MamResult<AerosolFields<ArrayView2<'a, f64>>> {
        self.wet.try_map_ref(|h| fields.read(*h))
    }

    pub fn wet_views_mut<'a>(
        &self,
        fields: &mut FieldSet<'a>,
    ) -> MamResult<AerosolFields<ArrayViewMut2<'a, f64>>> {
        self.wet.try_map_ref(|h| fields.write(*h))
    }

    pub fn dry_views<'a>(
        &self,
        scratch: &mut ScratchViews<'a>,
    ) -> MamResult<AerosolFields<ArrayView2<'a, f64>>> {
        self.dry.try_map_ref(|f| scratch.shared(*f))
    }

    pub fn dry_views_mut<'a>(
        &self,
        scratch: &mut ScratchViews<'a>,
    ) -> MamResult<AerosolFields<ArrayViewMut2<'a, f64>>> {
        self.dry.try_map_ref(|f| scratch.take(*f))
    }
}

/// Fail if a field named by `field_name` is registered for a species absent from its mode.
fn reject_absent_species(
    catalog: &TracerCatalog,
    registry: &FieldRegistry,
    phases: &[Phase],
    field_name: impl Fn(ModalTracer) -> Option<String>,
) -> MamResult<()> {
    for &phase in phases {
        for mode in 0..catalog.num_modes() {
            for species in (0..catalog.num_species()).filter(|&s| !catalog.present(mode, s)) {
                let Some(name) = field_name(ModalTracer::mass(mode, species, phase)) else {
                    continue;
                };
                if registry.contains(&name) {
                    return Err(MamError::Configuration(format!(
                        "Field '{}' is registered but species '{}' is absent from mode {}",
                        name,
                        catalog.species_name(species).unwrap_or("unknown"),
                        mode + 1
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Resolve every present tracer.
///
/// The registry must agree with the catalog: a present tracer without a registered field,
/// or a registered field for a species that is absent from its mode, is a configuration
/// error.
pub fn bind_aerosols(
    catalog: &TracerCatalog,
    registry: &FieldRegistry,
    layout: &ScratchLayout,
) -> MamResult<AerosolBinding> {
    reject_absent_species(catalog, registry, &[Phase::Interstitial, Phase::CloudBorne], |t| {
        Some(catalog.modal_name(t))
    })?;

    let wet = AerosolFields::try_from_catalog(catalog, |tracer| {
        let name = catalog.name(tracer);
        registry
            .lookup(&name, FieldShape::Midpoint)
            .map_err(|e| match e {
                MamError::MissingField(name) => MamError::Configuration(format!(
                    "Tracer '{}' is present but no field is registered for it",
                    name
                )),
                other => other,
            })
    })?;

    let dry = AerosolFields::try_from_catalog(catalog, |tracer| {
        let key = ScratchField::Tracer(tracer);
        if !layout.contains(key) {
            return Err(MamError::Configuration(format!(
                "Tracer '{}' has no scratch region",
                catalog.name(tracer)
            )));
        }
        Ok(key)
    })?;

    debug!(tracers = wet.len(), "Bound aerosol state");
    Ok(AerosolBinding { wet, dry })
}

/// Resolve the tendency fields of the interstitial and gas tracers
///
/// A tendency field registered for an absent species is rejected like its tracer.
pub fn bind_tendencies(
    catalog: &TracerCatalog,
    registry: &FieldRegistry,
) -> MamResult<TendencyFields<FieldHandle>> {
    reject_absent_species(catalog, registry, &[Phase::Interstitial], |t| {
        catalog.tendency_name(Tracer::Modal(t))
    })?;

    TendencyFields::try_from_catalog(catalog, |tracer| {
        let name = catalog.tendency_name(tracer).ok_or_else(|| {
            MamError::Configuration(format!(
                "Tracer '{}' does not have a tendency",
                catalog.name(tracer)
            ))
        })?;
        registry.lookup(&name, FieldShape::Midpoint)
    })
}
