//! Field (port) descriptors and typed handles.
//!
//! The storage itself lives in the [`super::FieldStore`]; everything here is
//! metadata or a cheap copyable handle into the store.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

use crate::id::{FieldId, ModuleId, NodeId};

/// Role a field plays for its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Module input; normally aliases an upstream field.
    Input,
    /// Module output; may fan out to many inputs.
    Output,
    /// Node state with node-length lifetime.
    State,
    /// Module or node parameter ("var") with a default value.
    Param,
}

/// Where a field's storage physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Residency {
    #[default]
    Host,
    /// Bulk array storage on the compute device; counted against the device budget.
    Device,
}

/// Who declared a field and therefore releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOwner {
    Node(NodeId),
    Module(ModuleId),
    /// Declared directly on the store (scene-construction code, tests).
    Free,
}

/// Whether a field physically holds storage or borrows another field's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    AliasOf(FieldId),
}

/// Declaration of a field, before it is registered in the store.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub residency: Residency,
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            kind,
            residency: Residency::Host,
            // Inputs are required unless declared optional.
            required: kind == FieldKind::Input,
        }
    }

    pub fn input(name: &str) -> Self {
        Self::new(name, FieldKind::Input)
    }

    pub fn output(name: &str) -> Self {
        Self::new(name, FieldKind::Output)
    }

    pub fn state(name: &str) -> Self {
        Self::new(name, FieldKind::State)
    }

    pub fn param(name: &str) -> Self {
        Self::new(name, FieldKind::Param)
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn on_device(mut self) -> Self {
        self.residency = Residency::Device;
        self
    }
}

/// Registered metadata of a field.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub residency: Residency,
    pub required: bool,
    pub owner: FieldOwner,
    pub(crate) type_id: TypeId,
    pub type_name: &'static str,
}

impl FieldMeta {
    pub(crate) fn new<T: 'static>(spec: FieldSpec, owner: FieldOwner) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            kind: spec.kind,
            residency: spec.residency,
            required: spec.required,
            owner,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn holds<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

/// Typed handle to a field carrying values of type `T`.
///
/// The type is fixed when the field is declared, so reads and writes through
/// a `Field<T>` never need a runtime type check beyond the store's downcast.
pub struct Field<T> {
    id: FieldId,
    _marker: PhantomData<fn() -> T>,
}

/// Array-valued field.
pub type ArrayField<T> = Field<Vec<T>>;

impl<T> Field<T> {
    pub(crate) fn from_id(id: FieldId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }
}

// Manual impls: `T` itself need not be Clone/Copy/Debug.
impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> PartialEq for Field<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Field<T> {}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

impl<T> From<Field<T>> for FieldId {
    fn from(field: Field<T>) -> Self {
        field.id
    }
}

impl<T> From<&Field<T>> for FieldId {
    fn from(field: &Field<T>) -> Self {
        field.id
    }
}
