//! Fields specific to wet scavenging
//!
//! Besides the modal coupling state, the wet scavenging kernel reads the convective and
//! stratiform diagnostics produced by the cloud schemes, updates the modal optical
//! properties and produces tendencies and deposition fluxes.

use mamx_core::catalog::TracerCatalog;
use mamx_core::errors::MamResult;
use mamx_core::fields::{next_column, IntoColumns, TendencyFields};
use mamx_core::registry::{FieldHandle, FieldRegistry, FieldRequirement, FieldShape};
use mamx_core::state::{bind_tendencies, tendency_requirements};
use tracing::debug;

pub mod names {
    pub const CLDT: &str = "cldt";
    pub const CLDN: &str = "cldn";
    pub const RPRDSH: &str = "rprdsh";
    pub const RPRDDP: &str = "rprddp";
    pub const EVAPCDP: &str = "evapcdp";
    pub const EVAPCSH: &str = "evapcsh";
    pub const DP_FRAC: &str = "dp_frac";
    pub const SH_FRAC: &str = "sh_frac";
    pub const ICWMRDP: &str = "icwmrdp";
    pub const ICWMRSH: &str = "icwmrsh";
    pub const EVAPR: &str = "evapr";
    pub const DLF: &str = "dlf";
    pub const PRAIN: &str = "prain";

    pub const DGNUMWET: &str = "dgnumwet";
    pub const DGNCUR_A: &str = "dgncur_a";
    pub const QAERWAT: &str = "qaerwat";
    pub const WETDENS: &str = "wetdens";

    pub const AERDEPWETIS: &str = "aerdepwetis";
    pub const AERDEPWETCW: &str = "aerdepwetcw";
}

/// Cloud and precipitation diagnostics consumed by the kernel
#[derive(Debug, Clone, PartialEq)]
pub struct ConvectiveDiagnostics<T> {
    /// Total cloud fraction [1]
    pub cldt: T,
    /// Layer cloud fraction [1]
    pub cldn: T,
    /// Rain production, shallow convection [kg/kg/s]
    pub rprdsh: T,
    /// Rain production, deep convection [kg/kg/s]
    pub rprddp: T,
    /// Evaporation of deep convective precipitation [kg/kg/s]
    pub evapcdp: T,
    /// Evaporation of shallow convective precipitation [kg/kg/s]
    pub evapcsh: T,
    /// Deep convective cloud fraction [1]
    pub dp_frac: T,
    /// Shallow convective cloud fraction [1]
    pub sh_frac: T,
    /// In-cloud water mixing ratio, deep convection [kg/kg]
    pub icwmrdp: T,
    /// In-cloud water mixing ratio, shallow convection [kg/kg]
    pub icwmrsh: T,
    /// Evaporation of stratiform rain [kg/kg/s]
    pub evapr: T,
    /// Detrained water from convection [kg/kg/s]
    pub dlf: T,
    /// Stratiform rain production [kg/kg/s]
    pub prain: T,
}

impl<T> ConvectiveDiagnostics<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ConvectiveDiagnostics<U> {
        ConvectiveDiagnostics {
            cldt: f(self.cldt),
            cldn: f(self.cldn),
            rprdsh: f(self.rprdsh),
            rprddp: f(self.rprddp),
            evapcdp: f(self.evapcdp),
            evapcsh: f(self.evapcsh),
            dp_frac: f(self.dp_frac),
            sh_frac: f(self.sh_frac),
            icwmrdp: f(self.icwmrdp),
            icwmrsh: f(self.icwmrsh),
            evapr: f(self.evapr),
            dlf: f(self.dlf),
            prain: f(self.prain),
        }
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<ConvectiveDiagnostics<U>, E> {
        Ok(ConvectiveDiagnostics {
            cldt: f(&self.cldt)?,
            cldn: f(&self.cldn)?,
            rprdsh: f(&self.rprdsh)?,
            rprddp: f(&self.rprddp)?,
            evapcdp: f(&self.evapcdp)?,
            evapcsh: f(&self.evapcsh)?,
            dp_frac: f(&self.dp_frac)?,
            sh_frac: f(&self.sh_frac)?,
            icwmrdp: f(&self.icwmrdp)?,
            icwmrsh: f(&self.icwmrsh)?,
            evapr: f(&self.evapr)?,
            dlf: f(&self.dlf)?,
            prain: f(&self.prain)?,
        })
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<ConvectiveDiagnostics<U>, E> {
        Ok(ConvectiveDiagnostics {
            cldt: f(&mut self.cldt)?,
            cldn: f(&mut self.cldn)?,
            rprdsh: f(&mut self.rprdsh)?,
            rprddp: f(&mut self.rprddp)?,
            evapcdp: f(&mut self.evapcdp)?,
            evapcsh: f(&mut self.evapcsh)?,
            dp_frac: f(&mut self.dp_frac)?,
            sh_frac: f(&mut self.sh_frac)?,
            icwmrdp: f(&mut self.icwmrdp)?,
            icwmrsh: f(&mut self.icwmrsh)?,
            evapr: f(&mut self.evapr)?,
            dlf: f(&mut self.dlf)?,
            prain: f(&mut self.prain)?,
        })
    }

    /// Members in declaration order
    pub fn into_array(self) -> [T; 13] {
        [
            self.cldt,
            self.cldn,
            self.rprdsh,
            self.rprddp,
            self.evapcdp,
            self.evapcsh,
            self.dp_frac,
            self.sh_frac,
            self.icwmrdp,
            self.icwmrsh,
            self.evapr,
            self.dlf,
            self.prain,
        ]
    }
}

impl ConvectiveDiagnostics<&'static str> {
    /// Field names of the diagnostics
    pub fn names() -> Self {
        use names::*;
        ConvectiveDiagnostics {
            cldt: CLDT,
            cldn: CLDN,
            rprdsh: RPRDSH,
            rprddp: RPRDDP,
            evapcdp: EVAPCDP,
            evapcsh: EVAPCSH,
            dp_frac: DP_FRAC,
            sh_frac: SH_FRAC,
            icwmrdp: ICWMRDP,
            icwmrsh: ICWMRSH,
            evapr: EVAPR,
            dlf: DLF,
            prain: PRAIN,
        }
    }

    fn units() -> Self {
        ConvectiveDiagnostics {
            cldt: "1",
            cldn: "1",
            rprdsh: "kg/kg/s",
            rprddp: "kg/kg/s",
            evapcdp: "kg/kg/s",
            evapcsh: "kg/kg/s",
            dp_frac: "1",
            sh_frac: "1",
            icwmrdp: "kg/kg",
            icwmrsh: "kg/kg",
            evapr: "kg/kg/s",
            dlf: "kg/kg/s",
            prain: "kg/kg/s",
        }
    }
}

impl<T: IntoColumns> IntoColumns for ConvectiveDiagnostics<T> {
    type Column = ConvectiveDiagnostics<T::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(|v| v.into_columns(ncol).into_iter());
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column).ok())
            .collect()
    }
}

/// Per-mode optical properties, stored mode-major
#[derive(Debug, Clone, PartialEq)]
pub struct ModalOptics<T> {
    /// Wet geometric mean diameter [m]
    pub dgnumwet: T,
    /// Dry geometric mean diameter [m]
    pub dgncur_a: T,
    /// Aerosol water [kg/kg]
    pub qaerwat: T,
    /// Wet aerosol density [kg/m3]
    pub wetdens: T,
}

impl<T> ModalOptics<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ModalOptics<U> {
        ModalOptics {
            dgnumwet: f(self.dgnumwet),
            dgncur_a: f(self.dgncur_a),
            qaerwat: f(self.qaerwat),
            wetdens: f(self.wetdens),
        }
    }

    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<ModalOptics<U>, E> {
        Ok(ModalOptics {
            dgnumwet: f(self.dgnumwet)?,
            dgncur_a: f(self.dgncur_a)?,
            qaerwat: f(self.qaerwat)?,
            wetdens: f(self.wetdens)?,
        })
    }

    pub fn map_ref<'s, U>(&'s self, mut f: impl FnMut(&'s T) -> U) -> ModalOptics<U> {
        ModalOptics {
            dgnumwet: f(&self.dgnumwet),
            dgncur_a: f(&self.dgncur_a),
            qaerwat: f(&self.qaerwat),
            wetdens: f(&self.wetdens),
        }
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<ModalOptics<U>, E> {
        Ok(ModalOptics {
            dgnumwet: f(&self.dgnumwet)?,
            dgncur_a: f(&self.dgncur_a)?,
            qaerwat: f(&self.qaerwat)?,
            wetdens: f(&self.wetdens)?,
        })
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<ModalOptics<U>, E> {
        Ok(ModalOptics {
            dgnumwet: f(&mut self.dgnumwet)?,
            dgncur_a: f(&mut self.dgncur_a)?,
            qaerwat: f(&mut self.qaerwat)?,
            wetdens: f(&mut self.wetdens)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        [&self.dgnumwet, &self.dgncur_a, &self.qaerwat, &self.wetdens].into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        [
            &mut self.dgnumwet,
            &mut self.dgncur_a,
            &mut self.qaerwat,
            &mut self.wetdens,
        ]
        .into_iter()
    }
}

impl ModalOptics<&'static str> {
    pub fn names() -> Self {
        use names::*;
        ModalOptics {
            dgnumwet: DGNUMWET,
            dgncur_a: DGNCUR_A,
            qaerwat: QAERWAT,
            wetdens: WETDENS,
        }
    }

    fn units() -> Self {
        ModalOptics {
            dgnumwet: "m",
            dgncur_a: "m",
            qaerwat: "kg/kg",
            wetdens: "kg/m3",
        }
    }
}

impl<T: IntoColumns> IntoColumns for ModalOptics<T> {
    type Column = ModalOptics<T::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(|v| v.into_columns(ncol).into_iter());
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column).ok())
            .collect()
    }
}

/// Column-integrated wet deposition fluxes, one entry per advected constituent
#[derive(Debug, Clone, PartialEq)]
pub struct WetDeposition<T> {
    /// Deposition of interstitial aerosol [kg/m2/s]
    pub interstitial: T,
    /// Deposition of cloud-borne aerosol [kg/m2/s]
    pub cloud_water: T,
}

impl<T> WetDeposition<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> WetDeposition<U> {
        WetDeposition {
            interstitial: f(self.interstitial),
            cloud_water: f(self.cloud_water),
        }
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<WetDeposition<U>, E> {
        Ok(WetDeposition {
            interstitial: f(&self.interstitial)?,
            cloud_water: f(&self.cloud_water)?,
        })
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<WetDeposition<U>, E> {
        Ok(WetDeposition {
            interstitial: f(&mut self.interstitial)?,
            cloud_water: f(&mut self.cloud_water)?,
        })
    }
}

impl<T: IntoColumns> IntoColumns for WetDeposition<T> {
    type Column = WetDeposition<T::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(|v| v.into_columns(ncol).into_iter());
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column).ok())
            .collect()
    }
}

/// Diagnostics are only read by the kernel
pub fn diagnostic_requirements() -> Vec<FieldRequirement> {
    ConvectiveDiagnostics::names()
        .into_array()
        .into_iter()
        .zip(ConvectiveDiagnostics::units().into_array())
        .map(|(name, unit)| FieldRequirement::required(name, unit, FieldShape::Midpoint))
        .collect()
}

/// Optical properties are read and rewritten by the kernel
pub fn optics_requirements(modes: usize) -> Vec<FieldRequirement> {
    let shape = FieldShape::ModalMidpoint { modes };
    ModalOptics::names()
        .iter()
        .zip(ModalOptics::units().iter())
        .map(|(name, unit)| FieldRequirement::updated(name, unit, shape))
        .collect()
}

pub fn deposition_requirements(catalog: &TracerCatalog) -> Vec<FieldRequirement> {
    let shape = FieldShape::Constituents {
        count: catalog.num_advected(),
    };
    vec![
        FieldRequirement::computed(names::AERDEPWETIS, "kg/m2/s", shape),
        FieldRequirement::computed(names::AERDEPWETCW, "kg/m2/s", shape),
    ]
}

/// Every field wet scavenging declares on top of the modal coupling
pub fn wetscav_requirements(catalog: &TracerCatalog) -> Vec<FieldRequirement> {
    let mut requirements = diagnostic_requirements();
    requirements.extend(optics_requirements(catalog.num_modes()));
    requirements.extend(tendency_requirements(catalog));
    requirements.extend(deposition_requirements(catalog));
    requirements
}

/// Registry handles of the fields in [`wetscav_requirements`]
#[derive(Debug, Clone)]
pub struct WetScavBinding {
    pub diagnostics: ConvectiveDiagnostics<FieldHandle>,
    pub optics: ModalOptics<FieldHandle>,
    pub tendencies: TendencyFields<FieldHandle>,
    pub deposition: WetDeposition<FieldHandle>,
}

pub fn bind_wetscav(catalog: &TracerCatalog, registry: &FieldRegistry) -> MamResult<WetScavBinding> {
    let diagnostics = ConvectiveDiagnostics::names()
        .try_map_ref(|name| registry.lookup(name, FieldShape::Midpoint))?;

    let modal = FieldShape::ModalMidpoint {
        modes: catalog.num_modes(),
    };
    let optics = ModalOptics::names().try_map_ref(|name| registry.lookup(name, modal))?;

    let tendencies = bind_tendencies(catalog, registry)?;

    let constituents = FieldShape::Constituents {
        count: catalog.num_advected(),
    };
    let deposition = WetDeposition {
        interstitial: registry.lookup(names::AERDEPWETIS, constituents)?,
        cloud_water: registry.lookup(names::AERDEPWETCW, constituents)?,
    };

    debug!(
        modes = catalog.num_modes(),
        constituents = catalog.num_advected(),
        "Bound wet scavenging fields"
    );
    Ok(WetScavBinding {
        diagnostics,
        optics,
        tendencies,
        deposition,
    })
}
