//! In-memory field registry
//!
//! The registry owns the model state that processes read and write.
//! Each field is a named `columns × width` array where the width is determined by its
//! [`FieldShape`].
//!
//! Processes declare what they need through [`FieldRequirement`]s,
//! resolve names to [`FieldHandle`]s once during initialization,
//! and borrow the arrays through a [`FieldSet`] while a timestep runs.

use crate::errors::{MamError, MamResult};
use indexmap::IndexMap;
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Horizontal and vertical extent of the physics grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimensions {
    pub columns: usize,
    /// Number of mid-point levels; there are `levels + 1` interfaces
    pub levels: usize,
}

impl GridDimensions {
    pub fn new(columns: usize, levels: usize) -> Self {
        Self { columns, levels }
    }

    pub fn interfaces(&self) -> usize {
        self.levels + 1
    }
}

/// Layout of the per-column data of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldShape {
    /// A single value per column
    Column,
    /// One value per mid-point level
    Midpoint,
    /// One value per level interface
    Interface,
    /// One value per mode and mid-point level, mode-major
    ModalMidpoint { modes: usize },
    /// One value per constituent
    Constituents { count: usize },
}

impl FieldShape {
    /// Number of values stored per column
    pub fn width(&self, levels: usize) -> usize {
        match self {
            FieldShape::Column => 1,
            FieldShape::Midpoint => levels,
            FieldShape::Interface => levels + 1,
            FieldShape::ModalMidpoint { modes } => modes * levels,
            FieldShape::Constituents { count } => *count,
        }
    }
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldShape::Column => write!(f, "Column"),
            FieldShape::Midpoint => write!(f, "Midpoint"),
            FieldShape::Interface => write!(f, "Interface"),
            FieldShape::ModalMidpoint { modes } => write!(f, "ModalMidpoint({} modes)", modes),
            FieldShape::Constituents { count } => write!(f, "Constituents({})", count),
        }
    }
}

/// How a process uses a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequirementType {
    /// Read only
    Required,
    /// Read and written back
    Updated,
    /// Written without being read
    Computed,
}

/// A field that a process declares it needs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRequirement {
    pub name: String,
    pub unit: String,
    pub shape: FieldShape,
    pub requirement_type: RequirementType,
}

impl FieldRequirement {
    pub fn new(
        name: &str,
        unit: &str,
        shape: FieldShape,
        requirement_type: RequirementType,
    ) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            shape,
            requirement_type,
        }
    }

    pub fn required(name: &str, unit: &str, shape: FieldShape) -> Self {
        Self::new(name, unit, shape, RequirementType::Required)
    }

    pub fn updated(name: &str, unit: &str, shape: FieldShape) -> Self {
        Self::new(name, unit, shape, RequirementType::Updated)
    }

    pub fn computed(name: &str, unit: &str, shape: FieldShape) -> Self {
        Self::new(name, unit, shape, RequirementType::Computed)
    }
}

/// A registered field and its storage
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub unit: String,
    pub shape: FieldShape,
    pub data: Array2<f64>,
}

/// Stable reference to a registered field.
///
/// Handles stay valid for the lifetime of the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle(usize);

impl FieldHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Named field storage for a single grid
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    grid: GridDimensions,
    fields: IndexMap<String, Field>,
}

impl FieldRegistry {
    pub fn new(grid: GridDimensions) -> Self {
        Self {
            grid,
            fields: IndexMap::new(),
        }
    }

    pub fn grid(&self) -> GridDimensions {
        self.grid
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Register a field, allocating zero-filled storage.
    ///
    /// Registering a field that already exists is allowed as long as the shape and
    /// unit agree; the existing data is kept.
    pub fn register(&mut self, requirement: &FieldRequirement) -> MamResult<FieldHandle> {
        if let Some((index, _, existing)) = self.fields.get_full(&requirement.name) {
            if existing.shape != requirement.shape {
                return Err(MamError::ShapeMismatch {
                    field: requirement.name.clone(),
                    expected: existing.shape.to_string(),
                    actual: requirement.shape.to_string(),
                });
            }
            if existing.unit != requirement.unit {
                return Err(MamError::UnitMismatch {
                    field: requirement.name.clone(),
                    expected: existing.unit.clone(),
                    actual: requirement.unit.clone(),
                });
            }
            return Ok(FieldHandle(index));
        }

        let width = requirement.shape.width(self.grid.levels);
        let field = Field {
            name: requirement.name.clone(),
            unit: requirement.unit.clone(),
            shape: requirement.shape,
            data: Array2::zeros((self.grid.columns, width)),
        };
        let (index, _) = self.fields.insert_full(requirement.name.clone(), field);
        Ok(FieldHandle(index))
    }

    pub fn register_all(&mut self, requirements: &[FieldRequirement]) -> MamResult<()> {
        for requirement in requirements {
            self.register(requirement)?;
        }
        debug!(
            registered = requirements.len(),
            total = self.fields.len(),
            "Registered fields"
        );
        Ok(())
    }

    /// Replace the values of a registered field
    pub fn insert(&mut self, name: &str, values: Array2<f64>) -> MamResult<()> {
        let levels = self.grid.levels;
        let columns = self.grid.columns;
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| MamError::MissingField(name.to_string()))?;
        let expected = (columns, field.shape.width(levels));
        if values.dim() != expected {
            return Err(MamError::ShapeMismatch {
                field: name.to_string(),
                expected: format!("{:?}", expected),
                actual: format!("{:?}", values.dim()),
            });
        }
        field.data = values;
        Ok(())
    }

    pub fn handle(&self, name: &str) -> MamResult<FieldHandle> {
        self.fields
            .get_index_of(name)
            .map(FieldHandle)
            .ok_or_else(|| MamError::MissingField(name.to_string()))
    }

    /// Resolve a field by name, checking that it has the expected shape
    pub fn lookup(&self, name: &str, shape: FieldShape) -> MamResult<FieldHandle> {
        let handle = self.handle(name)?;
        let field = self.field_by_handle(handle)?;
        if field.shape != shape {
            return Err(MamError::ShapeMismatch {
                field: name.to_string(),
                expected: shape.to_string(),
                actual: field.shape.to_string(),
            });
        }
        Ok(handle)
    }

    pub fn field(&self, name: &str) -> MamResult<&Field> {
        self.fields
            .get(name)
            .ok_or_else(|| MamError::MissingField(name.to_string()))
    }

    fn field_by_handle(&self, handle: FieldHandle) -> MamResult<&Field> {
        self.fields
            .get_index(handle.0)
            .map(|(_, f)| f)
            .ok_or_else(|| MamError::MissingField(format!("#{}", handle.0)))
    }

    pub fn name(&self, handle: FieldHandle) -> Option<&str> {
        self.fields.get_index(handle.0).map(|(k, _)| k.as_str())
    }

    pub fn values(&self, handle: FieldHandle) -> MamResult<ArrayView2<'_, f64>> {
        Ok(self.field_by_handle(handle)?.data.view())
    }

    pub fn values_mut(&mut self, handle: FieldHandle) -> MamResult<ArrayViewMut2<'_, f64>> {
        self.fields
            .get_index_mut(handle.0)
            .map(|(_, f)| f.data.view_mut())
            .ok_or_else(|| MamError::MissingField(format!("#{}", handle.0)))
    }

    /// Borrow many fields at once.
    ///
    /// Within a single [`FieldSet`] each field can either be read any number of times
    /// or written exactly once.
    pub fn field_set(&mut self) -> FieldSet<'_> {
        let names = self.fields.keys().cloned().collect();
        let slots = self
            .fields
            .values_mut()
            .map(|field| Slot::Unused(&mut field.data))
            .collect();
        FieldSet { names, slots }
    }
}

enum Slot<'a> {
    Unused(&'a mut Array2<f64>),
    Shared(&'a Array2<f64>),
    Taken,
}

/// Simultaneous borrows of several registry fields
pub struct FieldSet<'a> {
    names: Vec<String>,
    slots: Vec<Slot<'a>>,
}

impl<'a> FieldSet<'a> {
    fn name(&self, handle: FieldHandle) -> String {
        self.names
            .get(handle.0)
            .cloned()
            .unwrap_or_else(|| format!("#{}", handle.0))
    }

    /// Read-only view of a field
    pub fn read(&mut self, handle: FieldHandle) -> MamResult<ArrayView2<'a, f64>> {
        let name = self.name(handle);
        let slot = self
            .slots
            .get_mut(handle.0)
            .ok_or_else(|| MamError::MissingField(name.clone()))?;
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Unused(data) => {
                let shared: &'a Array2<f64> = data;
                *slot = Slot::Shared(shared);
                Ok(shared.view())
            }
            Slot::Shared(shared) => {
                *slot = Slot::Shared(shared);
                Ok(shared.view())
            }
            Slot::Taken => Err(MamError::FieldAliased(name)),
        }
    }

    /// Exclusive mutable view of a field
    pub fn write(&mut self, handle: FieldHandle) -> MamResult<ArrayViewMut2<'a, f64>> {
        let name = self.name(handle);
        let slot = self
            .slots
            .get_mut(handle.0)
            .ok_or_else(|| MamError::MissingField(name.clone()))?;
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Unused(data) => Ok(data.view_mut()),
            previous @ Slot::Shared(_) => {
                *slot = previous;
                Err(MamError::FieldAliased(name))
            }
            Slot::Taken => Err(MamError::FieldAliased(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn registry() -> FieldRegistry {
        FieldRegistry::new(GridDimensions::new(2, 3))
    }

    #[test]
    fn test_widths() {
        assert_eq!(FieldShape::Column.width(3), 1);
        assert_eq!(FieldShape::Midpoint.width(3), 3);
        assert_eq!(FieldShape::Interface.width(3), 4);
        assert_eq!(FieldShape::ModalMidpoint { modes: 4 }.width(3), 12);
        assert_eq!(FieldShape::Constituents { count: 7 }.width(3), 7);
    }

    #[test]
    fn test_register_allocates_storage() {
        let mut registry = registry();
        let handle = registry
            .register(&FieldRequirement::required("p_int", "Pa", FieldShape::Interface))
            .unwrap();
        assert_eq!(registry.values(handle).unwrap().dim(), (2, 4));
        assert_eq!(registry.name(handle), Some("p_int"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = registry();
        let requirement = FieldRequirement::required("qv", "kg/kg", FieldShape::Midpoint);
        let first = registry.register(&requirement).unwrap();
        registry
            .insert("qv", Array2::from_elem((2, 3), 0.01))
            .unwrap();
        let second = registry
            .register(&FieldRequirement::updated("qv", "kg/kg", FieldShape::Midpoint))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        // Data is kept
        assert_eq!(registry.values(first).unwrap()[[1, 2]], 0.01);
    }

    #[test]
    fn test_register_conflicts() {
        let mut registry = registry();
        registry
            .register(&FieldRequirement::required("qv", "kg/kg", FieldShape::Midpoint))
            .unwrap();

        let err = registry
            .register(&FieldRequirement::required("qv", "kg/kg", FieldShape::Interface))
            .unwrap_err();
        assert!(matches!(err, MamError::ShapeMismatch { .. }));

        let err = registry
            .register(&FieldRequirement::required("qv", "g/kg", FieldShape::Midpoint))
            .unwrap_err();
        assert!(matches!(err, MamError::UnitMismatch { .. }));
    }

    #[test]
    fn test_insert_validates_dimensions() {
        let mut registry = registry();
        registry
            .register(&FieldRequirement::required("phis", "m2/s2", FieldShape::Column))
            .unwrap();
        registry.insert("phis", array![[1.0], [2.0]]).unwrap();

        let err = registry.insert("phis", array![[1.0, 2.0]]).unwrap_err();
        assert!(err.to_string().contains("(2, 1)"), "{}", err);

        let err = registry.insert("missing", array![[1.0]]).unwrap_err();
        assert!(matches!(err, MamError::MissingField(_)));
    }

    #[test]
    fn test_lookup_checks_shape() {
        let mut registry = registry();
        registry
            .register(&FieldRequirement::required("p_mid", "Pa", FieldShape::Midpoint))
            .unwrap();
        assert!(registry.lookup("p_mid", FieldShape::Midpoint).is_ok());
        let err = registry
            .lookup("p_mid", FieldShape::Interface)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Field 'p_mid' has shape Midpoint, expected Interface"
        );
        assert!(matches!(
            registry.lookup("T_mid", FieldShape::Midpoint),
            Err(MamError::MissingField(_))
        ));
    }

    #[test]
    fn test_field_set_borrows() {
        let mut registry = registry();
        let a = registry
            .register(&FieldRequirement::required("a", "1", FieldShape::Midpoint))
            .unwrap();
        let b = registry
            .register(&FieldRequirement::computed("b", "1", FieldShape::Midpoint))
            .unwrap();
        registry
            .insert("a", Array2::from_elem((2, 3), 2.0))
            .unwrap();

        {
            let mut fields = registry.field_set();
            let a1 = fields.read(a).unwrap();
            let a2 = fields.read(a).unwrap();
            let mut b_values = fields.write(b).unwrap();
            b_values.assign(&(&a1 + &a2));

            // a is shared, b is exclusively borrowed
            assert!(matches!(fields.write(a), Err(MamError::FieldAliased(_))));
            assert!(matches!(fields.read(b), Err(MamError::FieldAliased(_))));
            assert!(matches!(fields.write(b), Err(MamError::FieldAliased(_))));
        }

        assert!(registry.values(b).unwrap().iter().all(|v| *v == 4.0));
    }
}
