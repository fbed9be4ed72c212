//! Containers shaped like the modal tracer catalog
//!
//! The same structure is needed for many payloads: registry handles, scratch regions,
//! 2-D views over all columns and 1-D views over a single column.
//! These containers are generic over the payload so that the species-presence pattern
//! is fixed once, when the container is built from a [`TracerCatalog`],
//! and every later transformation (`map`, `try_map_ref`, [`IntoColumns`]) preserves it.
//! Absent species are `None` slots and carry no payload at all.

use crate::catalog::{Constituent, ModalTracer, Phase, Tracer, TracerCatalog};
use ndarray::{
    ArrayView1, ArrayView2, ArrayView3, ArrayViewMut1, ArrayViewMut2, ArrayViewMut3, Axis,
};
use std::convert::Infallible;
use thiserror::Error;

/// Split a per-column aggregate into one aggregate per column.
///
/// Every column owns disjoint slices of the underlying arrays,
/// so the resulting values can be handed to independent parallel work units.
pub trait IntoColumns: Sized {
    type Column;

    /// Split into at most `ncol` columns
    fn into_columns(self, ncol: usize) -> Vec<Self::Column>;
}

impl<'a> IntoColumns for ArrayView2<'a, f64> {
    type Column = ArrayView1<'a, f64>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        (0..ncol.min(self.nrows()))
            .map(|icol| self.index_axis_move(Axis(0), icol))
            .collect()
    }
}

impl<'a> IntoColumns for ArrayViewMut2<'a, f64> {
    type Column = ArrayViewMut1<'a, f64>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut columns = Vec::with_capacity(ncol);
        let mut rest = self;
        while columns.len() < ncol && rest.nrows() > 0 {
            let (head, tail) = rest.split_at(Axis(0), 1);
            columns.push(head.index_axis_move(Axis(0), 0));
            rest = tail;
        }
        columns
    }
}

/// Per-column blocks of mode-major fields
impl<'a> IntoColumns for ArrayView3<'a, f64> {
    type Column = ArrayView2<'a, f64>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        (0..ncol.min(self.len_of(Axis(0))))
            .map(|icol| self.index_axis_move(Axis(0), icol))
            .collect()
    }
}

impl<'a> IntoColumns for ArrayViewMut3<'a, f64> {
    type Column = ArrayViewMut2<'a, f64>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut columns = Vec::with_capacity(ncol);
        let mut rest = self;
        while columns.len() < ncol && rest.len_of(Axis(0)) > 0 {
            let (head, tail) = rest.split_at(Axis(0), 1);
            columns.push(head.index_axis_move(Axis(0), 0));
            rest = tail;
        }
        columns
    }
}

/// Take the next column out of a column iterator.
///
/// Used by the container implementations of [`IntoColumns`],
/// which stop at the shortest member.
pub fn next_column<I: Iterator>(columns: &mut I) -> Result<I::Item, ColumnsExhausted> {
    columns.next().ok_or(ColumnsExhausted)
}

/// A column iterator ran out before every member of an aggregate was split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No columns left to split")]
pub struct ColumnsExhausted;

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Per-mode payload: the number tracer and one optional slot per species in the table
#[derive(Debug, Clone, PartialEq)]
pub struct ModeFields<T> {
    pub number: T,
    /// Indexed by global species index; `None` where the species is absent
    pub species: Vec<Option<T>>,
}

impl<T> ModeFields<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ModeFields<U> {
        ModeFields {
            number: f(self.number),
            species: self.species.into_iter().map(|s| s.map(&mut f)).collect(),
        }
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<ModeFields<U>, E> {
        Ok(ModeFields {
            number: f(&mut self.number)?,
            species: self
                .species
                .iter_mut()
                .map(|s| s.as_mut().map(&mut f).transpose())
                .collect::<Result<_, E>>()?,
        })
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<ModeFields<U>, E> {
        Ok(ModeFields {
            number: f(&self.number)?,
            species: self
                .species
                .iter()
                .map(|s| s.as_ref().map(&mut f).transpose())
                .collect::<Result<_, E>>()?,
        })
    }

    /// Present species and their payloads
    pub fn present(&self) -> impl Iterator<Item = (usize, &T)> {
        self.species
            .iter()
            .enumerate()
            .filter_map(|(s, v)| v.as_ref().map(|v| (s, v)))
    }

    /// Whether the slots match the presence pattern of `mode` in `catalog`
    pub fn matches(&self, catalog: &TracerCatalog, mode: usize) -> bool {
        self.species.len() == catalog.num_species()
            && self
                .species
                .iter()
                .enumerate()
                .all(|(s, v)| v.is_some() == catalog.present(mode, s))
    }
}

/// All modes of a single phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFields<T> {
    pub phase: Phase,
    pub modes: Vec<ModeFields<T>>,
}

impl<T> PhaseFields<T> {
    /// Build a payload for every modal tracer of `phase`
    pub fn from_catalog(
        catalog: &TracerCatalog,
        phase: Phase,
        mut f: impl FnMut(ModalTracer) -> T,
    ) -> Self {
        infallible(Self::try_from_catalog(catalog, phase, |t| Ok(f(t))))
    }

    pub fn try_from_catalog<E>(
        catalog: &TracerCatalog,
        phase: Phase,
        mut f: impl FnMut(ModalTracer) -> Result<T, E>,
    ) -> Result<Self, E> {
        let modes = (0..catalog.num_modes())
            .map(|mode| {
                let number = f(ModalTracer::number(mode, phase))?;
                let species = (0..catalog.num_species())
                    .map(|s| {
                        if catalog.present(mode, s) {
                            f(ModalTracer::mass(mode, s, phase)).map(Some)
                        } else {
                            Ok(None)
                        }
                    })
                    .collect::<Result<_, E>>()?;
                Ok(ModeFields { number, species })
            })
            .collect::<Result<_, E>>()?;
        Ok(Self { phase, modes })
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PhaseFields<U> {
        PhaseFields {
            phase: self.phase,
            modes: self.modes.into_iter().map(|m| m.map(&mut f)).collect(),
        }
    }

    pub fn map_ref<'s, U>(&'s self, mut f: impl FnMut(&'s T) -> U) -> PhaseFields<U> {
        infallible(self.try_map_ref(|v| Ok(f(v))))
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<PhaseFields<U>, E> {
        Ok(PhaseFields {
            phase: self.phase,
            modes: self
                .modes
                .iter()
                .map(|m| m.try_map_ref(&mut f))
                .collect::<Result<_, E>>()?,
        })
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<PhaseFields<U>, E> {
        Ok(PhaseFields {
            phase: self.phase,
            modes: self
                .modes
                .iter_mut()
                .map(|m| m.try_map_mut(&mut f))
                .collect::<Result<_, E>>()?,
        })
    }

    pub fn get(&self, tracer: ModalTracer) -> Option<&T> {
        if tracer.phase != self.phase {
            return None;
        }
        let mode = self.modes.get(tracer.mode)?;
        match tracer.constituent {
            Constituent::Number => Some(&mode.number),
            Constituent::Mass(s) => mode.species.get(s)?.as_ref(),
        }
    }

    pub fn get_mut(&mut self, tracer: ModalTracer) -> Option<&mut T> {
        if tracer.phase != self.phase {
            return None;
        }
        let mode = self.modes.get_mut(tracer.mode)?;
        match tracer.constituent {
            Constituent::Number => Some(&mut mode.number),
            Constituent::Mass(s) => mode.species.get_mut(s)?.as_mut(),
        }
    }

    /// Payloads in catalog order
    pub fn iter(&self) -> impl Iterator<Item = (ModalTracer, &T)> {
        let phase = self.phase;
        self.modes.iter().enumerate().flat_map(move |(m, mode)| {
            std::iter::once((ModalTracer::number(m, phase), &mode.number)).chain(
                mode.species.iter().enumerate().filter_map(move |(s, v)| {
                    v.as_ref().map(|v| (ModalTracer::mass(m, s, phase), v))
                }),
            )
        })
    }

    /// Mutable payloads in catalog order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ModalTracer, &mut T)> {
        let phase = self.phase;
        self.modes.iter_mut().enumerate().flat_map(move |(m, mode)| {
            let ModeFields { number, species } = mode;
            std::iter::once((ModalTracer::number(m, phase), number)).chain(
                species.iter_mut().enumerate().filter_map(move |(s, v)| {
                    v.as_mut().map(|v| (ModalTracer::mass(m, s, phase), v))
                }),
            )
        })
    }

    /// Whether the slots match the presence pattern of `catalog`
    pub fn matches(&self, catalog: &TracerCatalog) -> bool {
        self.modes.len() == catalog.num_modes()
            && self
                .modes
                .iter()
                .enumerate()
                .all(|(m, mode)| mode.matches(catalog, m))
    }
}

impl<T: IntoColumns> IntoColumns for PhaseFields<T> {
    type Column = PhaseFields<T::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(|v| v.into_columns(ncol).into_iter());
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column).ok())
            .collect()
    }
}

/// Interstitial, cloud-borne and gas payloads for every tracer of a catalog
#[derive(Debug, Clone, PartialEq)]
pub struct AerosolFields<T> {
    pub interstitial: PhaseFields<T>,
    pub cloud_borne: PhaseFields<T>,
    /// Indexed by gas index
    pub gases: Vec<T>,
}

impl<T> AerosolFields<T> {
    pub fn from_catalog(catalog: &TracerCatalog, mut f: impl FnMut(Tracer) -> T) -> Self {
        infallible(Self::try_from_catalog(catalog, |t| Ok(f(t))))
    }

    pub fn try_from_catalog<E>(
        catalog: &TracerCatalog,
        mut f: impl FnMut(Tracer) -> Result<T, E>,
    ) -> Result<Self, E> {
        let interstitial =
            PhaseFields::try_from_catalog(catalog, Phase::Interstitial, |t| f(Tracer::Modal(t)))?;
        let cloud_borne =
            PhaseFields::try_from_catalog(catalog, Phase::CloudBorne, |t| f(Tracer::Modal(t)))?;
        let gases = (0..catalog.num_gases())
            .map(|g| f(Tracer::Gas(g)))
            .collect::<Result<_, E>>()?;
        Ok(Self {
            interstitial,
            cloud_borne,
            gases,
        })
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> AerosolFields<U> {
        AerosolFields {
            interstitial: self.interstitial.map(&mut f),
            cloud_borne: self.cloud_borne.map(&mut f),
            gases: self.gases.into_iter().map(&mut f).collect(),
        }
    }

    pub fn map_ref<'s, U>(&'s self, mut f: impl FnMut(&'s T) -> U) -> AerosolFields<U> {
        infallible(self.try_map_ref(|v| Ok(f(v))))
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<AerosolFields<U>, E> {
        Ok(AerosolFields {
            interstitial: self.interstitial.try_map_ref(&mut f)?,
            cloud_borne: self.cloud_borne.try_map_ref(&mut f)?,
            gases: self.gases.iter().map(&mut f).collect::<Result<_, E>>()?,
        })
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<AerosolFields<U>, E> {
        Ok(AerosolFields {
            interstitial: self.interstitial.try_map_mut(&mut f)?,
            cloud_borne: self.cloud_borne.try_map_mut(&mut f)?,
            gases: self.gases.iter_mut().map(&mut f).collect::<Result<_, E>>()?,
        })
    }

    pub fn get(&self, tracer: Tracer) -> Option<&T> {
        match tracer {
            Tracer::Modal(modal) => match modal.phase {
                Phase::Interstitial => self.interstitial.get(modal),
                Phase::CloudBorne => self.cloud_borne.get(modal),
            },
            Tracer::Gas(g) => self.gases.get(g),
        }
    }

    pub fn get_mut(&mut self, tracer: Tracer) -> Option<&mut T> {
        match tracer {
            Tracer::Modal(modal) => match modal.phase {
                Phase::Interstitial => self.interstitial.get_mut(modal),
                Phase::CloudBorne => self.cloud_borne.get_mut(modal),
            },
            Tracer::Gas(g) => self.gases.get_mut(g),
        }
    }

    /// Payloads in catalog order: interstitial, cloud-borne, gases
    pub fn iter(&self) -> impl Iterator<Item = (Tracer, &T)> {
        self.interstitial
            .iter()
            .chain(self.cloud_borne.iter())
            .map(|(t, v)| (Tracer::Modal(t), v))
            .chain(
                self.gases
                    .iter()
                    .enumerate()
                    .map(|(g, v)| (Tracer::Gas(g), v)),
            )
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Tracer, &mut T)> {
        self.interstitial
            .iter_mut()
            .chain(self.cloud_borne.iter_mut())
            .map(|(t, v)| (Tracer::Modal(t), v))
            .chain(
                self.gases
                    .iter_mut()
                    .enumerate()
                    .map(|(g, v)| (Tracer::Gas(g), v)),
            )
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn matches(&self, catalog: &TracerCatalog) -> bool {
        self.interstitial.matches(catalog)
            && self.cloud_borne.matches(catalog)
            && self.gases.len() == catalog.num_gases()
    }
}

impl<T: IntoColumns> IntoColumns for AerosolFields<T> {
    type Column = AerosolFields<T::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(|v| v.into_columns(ncol).into_iter());
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column).ok())
            .collect()
    }
}

/// Tendency payloads: interstitial modal tracers and gases.
///
/// Cloud-borne tracers never have tendencies.
#[derive(Debug, Clone, PartialEq)]
pub struct TendencyFields<T> {
    pub interstitial: PhaseFields<T>,
    pub gases: Vec<T>,
}

impl<T> TendencyFields<T> {
    pub fn from_catalog(catalog: &TracerCatalog, mut f: impl FnMut(Tracer) -> T) -> Self {
        infallible(Self::try_from_catalog(catalog, |t| Ok(f(t))))
    }

    pub fn try_from_catalog<E>(
        catalog: &TracerCatalog,
        mut f: impl FnMut(Tracer) -> Result<T, E>,
    ) -> Result<Self, E> {
        let interstitial =
            PhaseFields::try_from_catalog(catalog, Phase::Interstitial, |t| f(Tracer::Modal(t)))?;
        let gases = (0..catalog.num_gases())
            .map(|g| f(Tracer::Gas(g)))
            .collect::<Result<_, E>>()?;
        Ok(Self {
            interstitial,
            gases,
        })
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> TendencyFields<U> {
        TendencyFields {
            interstitial: self.interstitial.map(&mut f),
            gases: self.gases.into_iter().map(&mut f).collect(),
        }
    }

    pub fn try_map_ref<'s, U, E>(
        &'s self,
        mut f: impl FnMut(&'s T) -> Result<U, E>,
    ) -> Result<TendencyFields<U>, E> {
        Ok(TendencyFields {
            interstitial: self.interstitial.try_map_ref(&mut f)?,
            gases: self.gases.iter().map(&mut f).collect::<Result<_, E>>()?,
        })
    }

    pub fn try_map_mut<'s, U, E>(
        &'s mut self,
        mut f: impl FnMut(&'s mut T) -> Result<U, E>,
    ) -> Result<TendencyFields<U>, E> {
        Ok(TendencyFields {
            interstitial: self.interstitial.try_map_mut(&mut f)?,
            gases: self.gases.iter_mut().map(&mut f).collect::<Result<_, E>>()?,
        })
    }

    /// Payloads in catalog order: interstitial, then gases
    pub fn iter(&self) -> impl Iterator<Item = (Tracer, &T)> {
        self.interstitial
            .iter()
            .map(|(t, v)| (Tracer::Modal(t), v))
            .chain(
                self.gases
                    .iter()
                    .enumerate()
                    .map(|(g, v)| (Tracer::Gas(g), v)),
            )
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Tracer, &mut T)> {
        self.interstitial
            .iter_mut()
            .map(|(t, v)| (Tracer::Modal(t), v))
            .chain(
                self.gases
                    .iter_mut()
                    .enumerate()
                    .map(|(g, v)| (Tracer::Gas(g), v)),
            )
    }

    pub fn matches(&self, catalog: &TracerCatalog) -> bool {
        self.interstitial.phase == Phase::Interstitial
            && self.interstitial.matches(catalog)
            && self.gases.len() == catalog.num_gases()
    }
}

impl<T: IntoColumns> IntoColumns for TendencyFields<T> {
    type Column = TendencyFields<T::Column>;

    fn into_columns(self, ncol: usize) -> Vec<Self::Column> {
        let mut split = self.map(|v| v.into_columns(ncol).into_iter());
        (0..ncol)
            .map_while(|_| split.try_map_mut(next_column).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModalConfig, ModeDefinition};
    use ndarray::Array2;

    fn catalog() -> TracerCatalog {
        TracerCatalog::new(ModalConfig {
            species: vec!["so4".to_string(), "bc".to_string(), "dst".to_string()],
            modes: vec![
                ModeDefinition::new("accumulation", &["so4", "bc"]),
                ModeDefinition::new("coarse", &["dst"]),
            ],
            gases: vec!["SO2".to_string()],
        })
        .unwrap()
    }

    #[test]
    fn test_presence_pattern_follows_catalog() {
        let catalog = catalog();
        let fields = AerosolFields::from_catalog(&catalog, |t| catalog.name(t));
        assert!(fields.matches(&catalog));
        assert!(fields.interstitial.modes[0].species[2].is_none());
        assert!(fields.interstitial.modes[1].species[0].is_none());
        assert_eq!(
            fields.cloud_borne.modes[1].species[2].as_deref(),
            Some("dst_c2")
        );
    }

    #[test]
    fn test_iteration_matches_catalog_order() {
        let catalog = catalog();
        let fields = AerosolFields::from_catalog(&catalog, |t| t);
        for (tracer, payload) in fields.iter() {
            assert_eq!(tracer, *payload);
        }
        let from_fields: Vec<Tracer> = fields.iter().map(|(t, _)| t).collect();
        let from_catalog: Vec<Tracer> = catalog.tracers().collect();
        assert_eq!(from_fields, from_catalog);
        assert_eq!(fields.len(), from_catalog.len());

        let tendencies = TendencyFields::from_catalog(&catalog, |t| t);
        let from_tendencies: Vec<Tracer> = tendencies.iter().map(|(t, _)| t).collect();
        let advected: Vec<Tracer> = catalog.advected_tracers().collect();
        assert_eq!(from_tendencies, advected);
    }

    #[test]
    fn test_try_from_catalog_propagates_errors() {
        let catalog = catalog();
        let result = AerosolFields::try_from_catalog(&catalog, |t| match t {
            Tracer::Gas(_) => Err("no gases"),
            _ => Ok(1),
        });
        assert_eq!(result.unwrap_err(), "no gases");
    }

    #[test]
    fn test_matches_detects_mismatch() {
        let catalog = catalog();
        let mut fields = AerosolFields::from_catalog(&catalog, |_| 0);
        fields.interstitial.modes[1].species[0] = Some(1);
        assert!(!fields.matches(&catalog));
    }

    #[test]
    fn test_get() {
        let catalog = catalog();
        let fields = AerosolFields::from_catalog(&catalog, |t| catalog.name(t));
        let bc = Tracer::Modal(ModalTracer::mass(0, 1, Phase::CloudBorne));
        assert_eq!(fields.get(bc).map(|s| s.as_str()), Some("bc_c1"));
        let absent = Tracer::Modal(ModalTracer::mass(1, 1, Phase::CloudBorne));
        assert_eq!(fields.get(absent), None);
    }

    #[test]
    fn test_into_columns_read_only() {
        let data = Array2::from_shape_fn((3, 2), |(i, j)| (i * 10 + j) as f64);
        let columns = data.view().into_columns(3);
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2][1], 21.0);
    }

    #[test]
    fn test_into_columns_mutable_are_disjoint() {
        let catalog = catalog();
        let mut storage = AerosolFields::from_catalog(&catalog, |_| Array2::<f64>::zeros((4, 3)));
        {
            let views = storage
                .try_map_mut(|a| Ok::<_, ()>(a.view_mut()))
                .unwrap();
            let columns = views.into_columns(4);
            assert_eq!(columns.len(), 4);
            for (icol, mut column) in columns.into_iter().enumerate() {
                for (_, values) in column.iter_mut() {
                    values.fill(icol as f64);
                }
            }
        }
        for (_, array) in storage.iter() {
            for icol in 0..4 {
                assert!(array.row(icol).iter().all(|v| *v == icol as f64));
            }
        }
    }

    #[test]
    fn test_next_column_exhausted() {
        let mut columns = vec![1.0, 2.0].into_iter();
        assert_eq!(next_column(&mut columns), Ok(1.0));
        assert_eq!(next_column(&mut columns), Ok(2.0));
        let err = next_column(&mut columns).unwrap_err();
        assert_eq!(err, ColumnsExhausted);
        assert_eq!(err.to_string(), "No columns left to split");
    }

    #[test]
    fn test_into_columns_three_dimensional() {
        let mut data = ndarray::Array3::<f64>::zeros((2, 3, 4));
        for (icol, mut column) in data.view_mut().into_columns(2).into_iter().enumerate() {
            assert_eq!(column.dim(), (3, 4));
            column[[2, 3]] = icol as f64 + 1.0;
        }
        assert_eq!(data[[0, 2, 3]], 1.0);
        assert_eq!(data[[1, 2, 3]], 2.0);

        let columns = data.view().into_columns(5);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1][[2, 3]], 2.0);
    }
}
