use std::any::Any;
use std::collections::BTreeMap;
use std::mem::size_of;

use crate::error::{GraphError, GraphResult};
use crate::id::{FieldId, IdAllocator, ModuleId, NodeId};

use super::field::{ArrayField, Field, FieldKind, FieldMeta, FieldOwner, FieldSpec, Ownership, Residency};

/// Bytes held by a `Vec<E>` stored behind `dyn Any`.
fn array_bytes<E: 'static>(value: &dyn Any) -> usize {
    value
        .downcast_ref::<Vec<E>>()
        .map(|v| v.len() * size_of::<E>())
        .unwrap_or(0)
}

struct FieldRecord {
    meta: FieldMeta,
    ownership: Ownership,
    /// Private storage. Ignored (but kept) while the field is an alias.
    storage: Option<Box<dyn Any>>,
    /// Set for array fields so device residency can be accounted.
    sizer: Option<fn(&dyn Any) -> usize>,
    device_bytes: usize,
}

/// Typed storage for every field of a scene, keyed by [`FieldId`].
///
/// Each field is either `Owned` (reads and writes hit its own storage) or an
/// alias of another field. Alias chains are acyclic: the check runs once in
/// [`FieldStore::connect`], so resolution can simply follow the chain to the
/// owning root.
pub struct FieldStore {
    records: BTreeMap<FieldId, FieldRecord>,
    ids: IdAllocator,
    device_budget_bytes: Option<usize>,
    device_bytes: usize,
    state_writes_locked: bool,
}

impl Default for FieldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldStore {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            ids: IdAllocator::default(),
            device_budget_bytes: None,
            device_bytes: 0,
            state_writes_locked: false,
        }
    }

    /// Creates a store that refuses device allocations beyond `budget` bytes.
    pub fn with_device_budget(budget: Option<usize>) -> Self {
        Self {
            device_budget_bytes: budget,
            ..Self::new()
        }
    }

    pub(crate) fn next_module_id(&mut self) -> ModuleId {
        self.ids.module()
    }

    pub(crate) fn next_node_id(&mut self) -> NodeId {
        self.ids.node()
    }

    pub(crate) fn last_module_index(&self) -> u64 {
        self.ids.last_module()
    }

    /// Number of live fields.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bytes currently held by device-resident array fields.
    pub fn device_bytes(&self) -> usize {
        self.device_bytes
    }

    // ------------------------------------------------------------------
    // Declaration
    // ------------------------------------------------------------------

    /// Declares an unowned field (scene-construction code, tests).
    pub fn declare<T: 'static>(&mut self, spec: FieldSpec) -> Field<T> {
        self.declare_owned(FieldOwner::Free, spec)
    }

    /// Declares a field released together with `owner`.
    pub fn declare_owned<T: 'static>(&mut self, owner: FieldOwner, spec: FieldSpec) -> Field<T> {
        self.insert::<T>(owner, spec, None)
    }

    /// Declares an array field whose device residency is accounted against the budget.
    pub fn declare_array<E: 'static>(&mut self, owner: FieldOwner, spec: FieldSpec) -> ArrayField<E> {
        self.insert::<Vec<E>>(owner, spec, Some(array_bytes::<E>))
    }

    /// Declares a field that starts out holding `value` (parameters, defaults).
    pub fn declare_value<T: 'static>(
        &mut self,
        owner: FieldOwner,
        spec: FieldSpec,
        value: T,
    ) -> Field<T> {
        let field = self.insert::<T>(owner, spec, None);
        if let Some(record) = self.records.get_mut(&field.id()) {
            record.storage = Some(Box::new(value));
        }
        field
    }

    fn insert<T: 'static>(
        &mut self,
        owner: FieldOwner,
        spec: FieldSpec,
        sizer: Option<fn(&dyn Any) -> usize>,
    ) -> Field<T> {
        let id = self.ids.field();
        let mut meta = FieldMeta::new::<T>(spec, owner);
        // Only sized array fields can be accounted against the device budget.
        if meta.residency == Residency::Device && sizer.is_none() {
            log::warn!(
                "`{}` requested device residency but is not an array field; keeping it on the host",
                meta.name
            );
            meta.residency = Residency::Host;
        }
        log::trace!("declare {} `{}` ({:?}, {})", id, meta.name, meta.kind, meta.type_name);
        self.records.insert(
            id,
            FieldRecord {
                meta,
                ownership: Ownership::Owned,
                storage: None,
                sizer,
                device_bytes: 0,
            },
        );
        Field::from_id(id)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn contains(&self, id: impl Into<FieldId>) -> bool {
        self.records.contains_key(&id.into())
    }

    pub fn meta(&self, id: impl Into<FieldId>) -> Option<&FieldMeta> {
        self.records.get(&id.into()).map(|r| &r.meta)
    }

    pub fn ownership(&self, id: impl Into<FieldId>) -> Option<Ownership> {
        self.records.get(&id.into()).map(|r| r.ownership)
    }

    /// True if the field currently borrows another field's storage.
    pub fn is_alias(&self, id: impl Into<FieldId>) -> bool {
        matches!(self.ownership(id), Some(Ownership::AliasOf(_)))
    }

    /// Direct upstream of an aliasing field.
    pub fn upstream(&self, id: impl Into<FieldId>) -> Option<FieldId> {
        match self.ownership(id) {
            Some(Ownership::AliasOf(up)) => Some(up),
            _ => None,
        }
    }

    /// Fields that alias `id` directly, in declaration order.
    pub fn downstream(&self, id: impl Into<FieldId>) -> Vec<FieldId> {
        let id = id.into();
        self.records
            .iter()
            .filter(|(_, r)| r.ownership == Ownership::AliasOf(id))
            .map(|(k, _)| *k)
            .collect()
    }

    /// True if the field is connected or holds its own value.
    pub fn is_bound(&self, id: impl Into<FieldId>) -> bool {
        self.records
            .get(&id.into())
            .map(|r| r.ownership != Ownership::Owned || r.storage.is_some())
            .unwrap_or(false)
    }

    /// Fields owned by `owner`, in declaration order.
    pub fn owned_by(&self, owner: FieldOwner) -> Vec<FieldId> {
        self.records
            .iter()
            .filter(|(_, r)| r.meta.owner == owner)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Re-types an untyped id, checking the declared type.
    pub fn typed<T: 'static>(&self, id: FieldId) -> GraphResult<Field<T>> {
        let meta = self.meta(id).ok_or_else(|| unknown_field(id))?;
        if !meta.holds::<T>() {
            return Err(GraphError::TypeMismatch {
                upstream: meta.name.clone(),
                upstream_type: meta.type_name,
                downstream: format!("Field<{}>", std::any::type_name::<T>()),
                downstream_type: std::any::type_name::<T>(),
            });
        }
        Ok(Field::from_id(id))
    }

    fn label(&self, id: FieldId) -> String {
        self.records
            .get(&id)
            .map(|r| r.meta.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Follows the alias chain of `id` to the field that owns the storage.
    pub fn resolve(&self, id: impl Into<FieldId>) -> GraphResult<FieldId> {
        let id = id.into();
        let mut current = id;
        let mut previous = id;
        // Chains are acyclic by construction; the bound only guards against a broken invariant.
        for _ in 0..=self.records.len() {
            let Some(record) = self.records.get(&current) else {
                return Err(if current == id {
                    unknown_field(id)
                } else {
                    GraphError::UnboundField(format!(
                        "{} (upstream {} was released)",
                        self.label(previous),
                        current
                    ))
                });
            };
            match record.ownership {
                Ownership::Owned => return Ok(current),
                Ownership::AliasOf(up) => {
                    previous = current;
                    current = up;
                }
            }
        }
        Err(GraphError::Configuration(format!(
            "alias chain of `{}` does not terminate",
            self.label(id)
        )))
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Makes `downstream` an alias of `upstream`.
    ///
    /// Any previous connection of `downstream` is replaced without copying
    /// data. On error neither field is modified.
    pub fn connect(
        &mut self,
        upstream: impl Into<FieldId>,
        downstream: impl Into<FieldId>,
    ) -> GraphResult<()> {
        let up = upstream.into();
        let down = downstream.into();
        let up_meta = self.meta(up).ok_or_else(|| unknown_field(up))?;
        let down_meta = self.meta(down).ok_or_else(|| unknown_field(down))?;

        if up_meta.type_id != down_meta.type_id {
            return Err(GraphError::TypeMismatch {
                upstream: up_meta.name.clone(),
                upstream_type: up_meta.type_name,
                downstream: down_meta.name.clone(),
                downstream_type: down_meta.type_name,
            });
        }

        // Walking upstream from `up` must never reach `down`.
        let mut current = up;
        loop {
            if current == down {
                return Err(GraphError::Configuration(format!(
                    "connecting `{}` to `{}` would close an alias cycle",
                    up_meta.name, down_meta.name
                )));
            }
            match self.records.get(&current).map(|r| r.ownership) {
                Some(Ownership::AliasOf(next)) => current = next,
                _ => break,
            }
        }

        log::trace!("connect {} -> {}", self.label(up), self.label(down));
        if let Some(record) = self.records.get_mut(&down) {
            record.ownership = Ownership::AliasOf(up);
        }
        Ok(())
    }

    /// Drops the connection of `downstream`, returning its former upstream.
    ///
    /// The field falls back to its private storage, if it ever had any.
    pub fn disconnect(&mut self, downstream: impl Into<FieldId>) -> GraphResult<Option<FieldId>> {
        let down = downstream.into();
        let record = self
            .records
            .get_mut(&down)
            .ok_or_else(|| unknown_field(down))?;
        let previous = match record.ownership {
            Ownership::AliasOf(up) => Some(up),
            Ownership::Owned => None,
        };
        record.ownership = Ownership::Owned;
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Data access
    // ------------------------------------------------------------------

    /// Reads the value visible through `field` (its own or its root's).
    pub fn read<T: 'static>(&self, field: Field<T>) -> GraphResult<&T> {
        let root = self.resolve(field)?;
        let record = &self.records[&root];
        let storage = record
            .storage
            .as_ref()
            .ok_or_else(|| GraphError::UnboundField(self.label(field.id())))?;
        storage
            .downcast_ref::<T>()
            .ok_or_else(|| self.corrupt_type::<T>(root))
    }

    /// Writes `value` into the storage `field` resolves to.
    pub fn write<T: 'static>(&mut self, field: Field<T>, value: T) -> GraphResult<()> {
        let root = self.resolve(field)?;
        self.check_writable(root)?;
        let new_bytes = self.device_bytes_of(root, &value);
        self.check_device(root, new_bytes, || {
            GraphError::Configuration(format!(
                "device byte count of `{}` overflows",
                self.label(root)
            ))
        })?;
        if let Some(record) = self.records.get_mut(&root) {
            record.storage = Some(Box::new(value));
        }
        self.commit_device(root, new_bytes);
        Ok(())
    }

    /// Mutable access to an already allocated value.
    ///
    /// Length changes of device arrays made through this reference are not
    /// re-accounted; resize them with [`FieldStore::allocate`].
    pub fn get_mut<T: 'static>(&mut self, field: Field<T>) -> GraphResult<&mut T> {
        let root = self.resolve(field)?;
        self.check_writable(root)?;
        match self.records[&root].storage.as_ref().map(|s| s.is::<T>()) {
            None => return Err(GraphError::UnboundField(self.label(field.id()))),
            Some(false) => return Err(self.corrupt_type::<T>(root)),
            Some(true) => {}
        }
        self.records
            .get_mut(&root)
            .and_then(|r| r.storage.as_mut())
            .and_then(|s| s.downcast_mut::<T>())
            .ok_or_else(|| unknown_field(root))
    }

    /// Resizes the array `field` resolves to.
    ///
    /// Existing elements are preserved up to the new length; new slots hold
    /// `E::default()`. Returns `false` when the length already matched and
    /// nothing was reallocated.
    pub fn allocate<E>(&mut self, field: ArrayField<E>, elements: usize) -> GraphResult<bool>
    where
        E: Clone + Default + 'static,
    {
        let root = self.resolve(field)?;
        self.check_writable(root)?;
        let current_len = self.records[&root]
            .storage
            .as_ref()
            .and_then(|s| s.downcast_ref::<Vec<E>>())
            .map(Vec::len);
        if current_len == Some(elements) {
            return Ok(false);
        }

        let label = self.label(root);
        let alloc_err = || GraphError::Allocation {
            field: label.clone(),
            elements,
        };
        let new_bytes = match self.records[&root].meta.residency {
            Residency::Device => elements.checked_mul(size_of::<E>()).ok_or_else(alloc_err)?,
            Residency::Host => 0,
        };
        self.check_device(root, new_bytes, alloc_err)?;

        let record = self
            .records
            .get_mut(&root)
            .ok_or_else(|| unknown_field(root))?;
        match record
            .storage
            .as_mut()
            .and_then(|s| s.downcast_mut::<Vec<E>>())
        {
            Some(data) => {
                if elements > data.len() {
                    data.try_reserve_exact(elements - data.len())
                        .map_err(|_| alloc_err())?;
                    data.resize(elements, E::default());
                } else {
                    data.truncate(elements);
                    data.shrink_to_fit();
                }
            }
            None => {
                let mut data: Vec<E> = Vec::new();
                data.try_reserve_exact(elements).map_err(|_| alloc_err())?;
                data.resize(elements, E::default());
                record.storage = Some(Box::new(data));
            }
        }
        self.commit_device(root, new_bytes);
        Ok(true)
    }

    /// Element count of the array `field` resolves to (0 when unallocated).
    pub fn element_count<E: 'static>(&self, field: ArrayField<E>) -> usize {
        self.read(field).map(Vec::len).unwrap_or(0)
    }

    fn device_bytes_of(&self, root: FieldId, value: &dyn Any) -> usize {
        let record = &self.records[&root];
        match (record.meta.residency, record.sizer) {
            (Residency::Device, Some(sizer)) => sizer(value),
            _ => 0,
        }
    }

    /// Device total if `root` held `new_bytes` instead of its current size.
    fn device_total_with(&self, root: FieldId, new_bytes: usize) -> Option<usize> {
        let old_bytes = self.records[&root].device_bytes;
        (self.device_bytes - old_bytes).checked_add(new_bytes)
    }

    /// Fails when `root` holding `new_bytes` would exceed the budget. Records nothing.
    ///
    /// Without a budget, a total that does not fit in `usize` fails with `overflow()`.
    fn check_device(
        &self,
        root: FieldId,
        new_bytes: usize,
        overflow: impl FnOnce() -> GraphError,
    ) -> GraphResult<()> {
        let total = self.device_total_with(root, new_bytes);
        if let Some(budget) = self.device_budget_bytes {
            if total.is_none_or(|total| total > budget) {
                log::error!(
                    "device budget exceeded by `{}`: {} more bytes on top of {} > {} bytes",
                    self.label(root),
                    new_bytes,
                    self.device_bytes - self.records[&root].device_bytes,
                    budget
                );
                return Err(GraphError::ResourceExhausted {
                    field: self.label(root),
                    requested_bytes: new_bytes,
                    budget_bytes: budget,
                });
            }
        }
        match total {
            Some(_) => Ok(()),
            None => Err(overflow()),
        }
    }

    /// Records that `root` now holds `new_bytes`. Call only after the storage changed.
    fn commit_device(&mut self, root: FieldId, new_bytes: usize) {
        if let Some(record) = self.records.get_mut(&root) {
            self.device_bytes = self.device_bytes - record.device_bytes + new_bytes;
            record.device_bytes = new_bytes;
        }
    }

    fn check_writable(&self, root: FieldId) -> GraphResult<()> {
        let meta = &self.records[&root].meta;
        let is_node_state = meta.kind == FieldKind::State && matches!(meta.owner, FieldOwner::Node(_));
        if self.state_writes_locked && is_node_state {
            return Err(GraphError::StateWriteInGraphics(meta.name.clone()));
        }
        Ok(())
    }

    fn corrupt_type<T: 'static>(&self, root: FieldId) -> GraphError {
        GraphError::Configuration(format!(
            "field `{}` does not hold a {}",
            self.label(root),
            std::any::type_name::<T>()
        ))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// While locked, writes that resolve to node state fail with
    /// [`GraphError::StateWriteInGraphics`].
    pub(crate) fn lock_state_writes(&mut self, locked: bool) {
        self.state_writes_locked = locked;
    }

    /// Releases the ports of every module created after `last_module_index`.
    pub(crate) fn release_modules_after(&mut self, last_module_index: u64) -> usize {
        let mut modules: Vec<ModuleId> = self
            .records
            .values()
            .filter_map(|r| match r.meta.owner {
                FieldOwner::Module(m) if m.index() > last_module_index => Some(m),
                _ => None,
            })
            .collect();
        modules.sort();
        modules.dedup();
        modules
            .into_iter()
            .map(|m| self.release_owner(FieldOwner::Module(m)))
            .sum()
    }

    /// Removes every field declared by `owner`, returning how many were removed.
    ///
    /// Only the removed fields' private storage is dropped. Fields elsewhere that
    /// alias a removed field become unbound rather than inheriting anything.
    pub fn release_owner(&mut self, owner: FieldOwner) -> usize {
        let doomed = self.owned_by(owner);
        for id in &doomed {
            if let Some(record) = self.records.remove(id) {
                self.device_bytes -= record.device_bytes;
            }
        }
        if !doomed.is_empty() {
            log::debug!("released {} fields of {:?}", doomed.len(), owner);
        }
        doomed.len()
    }
}

fn unknown_field(id: FieldId) -> GraphError {
    GraphError::Configuration(format!("unknown or released field {id}"))
}
