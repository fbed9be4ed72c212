//! Scratch buffer allocation
//!
//! A modal process keeps its dry-basis state in a single contiguous block of memory that
//! is supplied once by a [`BufferManager`] during initialization.
//! The [`ScratchLayout`] partitions the block into one region per dry atmospheric field and
//! one region per present tracer.
//!
//! The size of the block is computed twice: in closed form from the catalog
//! ([`ScratchLayout::required_bytes_for`]) and by summing the partitioned regions.
//! The two must agree when the buffer is bound,
//! which catches any drift between the sizing formula and the partitioning.

use crate::catalog::{Phase, Tracer, TracerCatalog};
use crate::errors::{MamError, MamResult};
use crate::registry::{FieldShape, GridDimensions};
use indexmap::IndexMap;
use ndarray::{ArrayView2, ArrayViewMut2};
use std::fmt;
use tracing::debug;

/// Size in bytes of a single scratch element
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f64>();

/// Dry atmospheric quantities owned by the scratch buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DryAtmosphereField {
    Qv,
    Qc,
    Nc,
    Qi,
    Ni,
    ZMid,
    Dz,
    ZIface,
    WUpdraft,
}

impl DryAtmosphereField {
    pub const ALL: [DryAtmosphereField; 9] = [
        DryAtmosphereField::Qv,
        DryAtmosphereField::Qc,
        DryAtmosphereField::Nc,
        DryAtmosphereField::Qi,
        DryAtmosphereField::Ni,
        DryAtmosphereField::ZMid,
        DryAtmosphereField::Dz,
        DryAtmosphereField::ZIface,
        DryAtmosphereField::WUpdraft,
    ];

    pub fn shape(&self) -> FieldShape {
        match self {
            DryAtmosphereField::ZIface => FieldShape::Interface,
            _ => FieldShape::Midpoint,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DryAtmosphereField::Qv => "qv_dry",
            DryAtmosphereField::Qc => "qc_dry",
            DryAtmosphereField::Nc => "nc_dry",
            DryAtmosphereField::Qi => "qi_dry",
            DryAtmosphereField::Ni => "ni_dry",
            DryAtmosphereField::ZMid => "z_mid",
            DryAtmosphereField::Dz => "dz",
            DryAtmosphereField::ZIface => "z_iface",
            DryAtmosphereField::WUpdraft => "w_updraft",
        }
    }
}

/// Key of a scratch region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchField {
    Atmosphere(DryAtmosphereField),
    Tracer(Tracer),
}

impl fmt::Display for ScratchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScratchField::Atmosphere(field) => write!(f, "{}", field.name()),
            ScratchField::Tracer(tracer) => write!(f, "{:?}", tracer),
        }
    }
}

/// Position of a region within the scratch block, in elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchRegion {
    pub offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl ScratchRegion {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> usize {
        self.offset + self.len()
    }
}

/// Offset table partitioning the scratch block
#[derive(Debug, Clone)]
pub struct ScratchLayout {
    grid: GridDimensions,
    regions: IndexMap<ScratchField, ScratchRegion>,
    required_bytes: usize,
}

impl ScratchLayout {
    /// Partition a block for `catalog` on `grid`.
    ///
    /// Regions are contiguous and ordered: atmospheric fields, interstitial tracers,
    /// cloud-borne tracers, then gases.
    pub fn new(catalog: &TracerCatalog, grid: GridDimensions) -> Self {
        let mut regions = IndexMap::new();
        let mut offset = 0;
        let mut push = |field: ScratchField, shape: FieldShape| {
            let region = ScratchRegion {
                offset,
                rows: grid.columns,
                cols: shape.width(grid.levels),
            };
            offset = region.end();
            regions.insert(field, region);
        };

        for field in DryAtmosphereField::ALL {
            push(ScratchField::Atmosphere(field), field.shape());
        }
        for phase in [Phase::Interstitial, Phase::CloudBorne] {
            for tracer in catalog.modal_tracers(phase) {
                push(ScratchField::Tracer(Tracer::Modal(tracer)), FieldShape::Midpoint);
            }
        }
        for gas in 0..catalog.num_gases() {
            push(ScratchField::Tracer(Tracer::Gas(gas)), FieldShape::Midpoint);
        }

        Self {
            grid,
            regions,
            required_bytes: Self::required_bytes_for(catalog, grid),
        }
    }

    /// Closed-form size of the scratch block in bytes
    pub fn required_bytes_for(catalog: &TracerCatalog, grid: GridDimensions) -> usize {
        let midpoint = grid.columns * grid.levels;
        let interface = grid.columns * (grid.levels + 1);
        let atmosphere = 8 * midpoint + interface;
        let modal_tracers = catalog.num_modes() + catalog.num_present();
        let tracers = midpoint * (2 * modal_tracers + catalog.num_gases());
        (atmosphere + tracers) * ELEMENT_SIZE
    }

    pub fn required_bytes(&self) -> usize {
        self.required_bytes
    }

    /// Bytes covered by the partitioned regions
    pub fn used_bytes(&self) -> usize {
        self.regions
            .values()
            .map(|r| r.end())
            .max()
            .unwrap_or(0)
            * ELEMENT_SIZE
    }

    pub fn grid(&self) -> GridDimensions {
        self.grid
    }

    pub fn region(&self, field: ScratchField) -> MamResult<ScratchRegion> {
        self.regions
            .get(&field)
            .copied()
            .ok_or_else(|| MamError::MissingField(field.to_string()))
    }

    pub fn contains(&self, field: ScratchField) -> bool {
        self.regions.contains_key(&field)
    }

    pub fn regions(&self) -> impl Iterator<Item = (&ScratchField, &ScratchRegion)> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Supplier of the raw scratch block
#[derive(Debug, Clone, Default)]
pub struct BufferManager {
    storage: Vec<f64>,
}

impl BufferManager {
    /// Allocate a zero-filled block of (at most) `bytes` bytes
    pub fn with_bytes(bytes: usize) -> Self {
        Self {
            storage: vec![0.0; bytes / ELEMENT_SIZE],
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.storage.len() * ELEMENT_SIZE
    }

    fn into_storage(self) -> Vec<f64> {
        self.storage
    }
}

/// A bound scratch block and the layout that partitions it
#[derive(Debug)]
pub struct ScratchBuffer {
    layout: ScratchLayout,
    storage: Vec<f64>,
}

impl ScratchBuffer {
    /// Take ownership of the block supplied by `manager` and partition it.
    pub fn bind(layout: ScratchLayout, manager: BufferManager) -> MamResult<Self> {
        let required = layout.required_bytes();
        let supplied = manager.allocated_bytes();
        if supplied < required {
            return Err(MamError::Allocation { required, supplied });
        }

        let used = layout.used_bytes();
        if used != required {
            return Err(MamError::Configuration(format!(
                "Scratch partitioning used {} bytes but {} bytes are required",
                used, required
            )));
        }

        debug!(
            regions = layout.len(),
            required, supplied, "Bound scratch buffer"
        );

        Ok(Self {
            layout,
            storage: manager.into_storage(),
        })
    }

    pub fn layout(&self) -> &ScratchLayout {
        &self.layout
    }

    /// Read-only view of a single region
    pub fn view(&self, field: ScratchField) -> MamResult<ArrayView2<'_, f64>> {
        let region = self.layout.region(field)?;
        let data = self
            .storage
            .get(region.offset..region.end())
            .ok_or_else(|| MamError::MissingField(field.to_string()))?;
        ArrayView2::from_shape((region.rows, region.cols), data).map_err(|e| {
            MamError::Configuration(format!("Scratch region {} is malformed: {}", field, e))
        })
    }

    /// Carve the block into disjoint views, one per region
    pub fn views_mut(&mut self) -> ScratchViews<'_> {
        let mut slots = IndexMap::with_capacity(self.layout.len());
        let mut rest: &mut [f64] = &mut self.storage;
        let mut consumed = 0;
        for (field, region) in self.layout.regions.iter() {
            let skip = region.offset - consumed;
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
            let (head, tail) = tail.split_at_mut(region.len());
            rest = tail;
            consumed = region.end();
            slots.insert(*field, (*region, ScratchSlot::Unused(head)));
        }
        ScratchViews { slots }
    }
}

enum ScratchSlot<'a> {
    Unused(&'a mut [f64]),
    Shared(&'a [f64]),
    Taken,
}

/// Disjoint borrows of the regions of a [`ScratchBuffer`].
///
/// Each region can be taken mutably once, or shared any number of times.
pub struct ScratchViews<'a> {
    slots: IndexMap<ScratchField, (ScratchRegion, ScratchSlot<'a>)>,
}

impl<'a> ScratchViews<'a> {
    /// Exclusive mutable view of a region
    pub fn take(&mut self, field: ScratchField) -> MamResult<ArrayViewMut2<'a, f64>> {
        let (region, slot) = self
            .slots
            .get_mut(&field)
            .ok_or_else(|| MamError::MissingField(field.to_string()))?;
        match std::mem::replace(slot, ScratchSlot::Taken) {
            ScratchSlot::Unused(data) => ArrayViewMut2::from_shape((region.rows, region.cols), data)
                .map_err(|e| {
                    MamError::Configuration(format!("Scratch region {} is malformed: {}", field, e))
                }),
            previous @ ScratchSlot::Shared(_) => {
                *slot = previous;
                Err(MamError::FieldAliased(field.to_string()))
            }
            ScratchSlot::Taken => Err(MamError::FieldAliased(field.to_string())),
        }
    }

    /// Read-only view of a region
    pub fn shared(&mut self, field: ScratchField) -> MamResult<ArrayView2<'a, f64>> {
        let (region, slot) = self
            .slots
            .get_mut(&field)
            .ok_or_else(|| MamError::MissingField(field.to_string()))?;
        let data: &'a [f64] = match std::mem::replace(slot, ScratchSlot::Taken) {
            ScratchSlot::Unused(data) => data,
            ScratchSlot::Shared(data) => data,
            ScratchSlot::Taken => return Err(MamError::FieldAliased(field.to_string())),
        };
        *slot = ScratchSlot::Shared(data);
        ArrayView2::from_shape((region.rows, region.cols), data).map_err(|e| {
            MamError::Configuration(format!("Scratch region {} is malformed: {}", field, e))
        })
    }
}
