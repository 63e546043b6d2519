//! Handle holders: the dependency-declaration capability of a component.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use uuid::Uuid;

use crate::error::DependencyError;
use crate::handle::{DataHandle, ReadHandle, WriteHandle};
use crate::id::{AccessMode, DataObjID};

/// Identity of one holder. Names are for humans; ownership checks compare
/// the unique id so two components sharing a name never share handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderRef {
    id: Uuid,
    name: String,
}

impl HolderRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for HolderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Default)]
struct Declarations {
    handles: Vec<Arc<DataHandle>>,
    extra_inputs: BTreeSet<DataObjID>,
    extra_outputs: BTreeSet<DataObjID>,
}

/// The handles a component owns plus its extra, name-only dependencies.
///
/// Declarations are made during configuration through `&self`, so a
/// component can be shared behind an `Arc` before its dependencies settle.
pub struct HandleRegistry {
    me: HolderRef,
    decl: RwLock<Declarations>,
}

impl HandleRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            me: HolderRef::new(name),
            decl: RwLock::new(Declarations::default()),
        }
    }

    pub fn holder(&self) -> &HolderRef {
        &self.me
    }

    pub fn name(&self) -> &str {
        self.me.name()
    }

    fn read(&self) -> RwLockReadGuard<'_, Declarations> {
        self.decl.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Declarations> {
        self.decl.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `handle` to this holder. Declaring a handle this holder already
    /// owns is a no-op; declaring one owned elsewhere fails.
    pub fn declare(&self, handle: &Arc<DataHandle>) -> Result<(), DependencyError> {
        let owner = handle.claim(&self.me);
        if owner != &self.me {
            return Err(DependencyError::NotOwner {
                holder: self.me.name().to_string(),
                action: "declare",
                id: handle.id(),
                owner: owner.name().to_string(),
            });
        }
        let mut decl = self.write();
        if !decl.handles.iter().any(|h| Arc::ptr_eq(h, handle)) {
            debug!(holder = %self.me, id = %handle.id(), mode = ?handle.mode(), "declared handle");
            decl.handles.push(Arc::clone(handle));
        }
        Ok(())
    }

    /// Create and declare a typed read handle.
    pub fn declare_read<T: Any + Send + Sync>(
        &self,
        id: impl Into<DataObjID>,
    ) -> Result<ReadHandle<T>, DependencyError> {
        let handle = DataHandle::new(id, AccessMode::Read);
        self.declare(&handle)?;
        Ok(ReadHandle::from_handle(handle))
    }

    /// Create and declare a typed write handle.
    pub fn declare_write<T: Any + Send + Sync>(
        &self,
        id: impl Into<DataObjID>,
    ) -> Result<WriteHandle<T>, DependencyError> {
        let handle = DataHandle::new(id, AccessMode::Write);
        self.declare(&handle)?;
        Ok(WriteHandle::from_handle(handle))
    }

    /// Remove a handle. Only its owner may renounce it.
    pub fn renounce(&self, handle: &Arc<DataHandle>) -> Result<(), DependencyError> {
        match handle.owner() {
            Some(owner) if owner == &self.me => {}
            owner => {
                return Err(DependencyError::NotOwner {
                    holder: self.me.name().to_string(),
                    action: "renounce",
                    id: handle.id(),
                    owner: owner.map_or("nobody", HolderRef::name).to_string(),
                });
            }
        }
        self.write().handles.retain(|h| !Arc::ptr_eq(h, handle));
        debug!(holder = %self.me, id = %handle.id(), "renounced handle");
        Ok(())
    }

    /// Drop every input dependency on `id`, typed or extra. Returns whether
    /// anything was removed.
    pub fn renounce_input(&self, id: &DataObjID) -> bool {
        let mut decl = self.write();
        let before = decl.handles.len();
        decl.handles
            .retain(|h| !(h.mode() == AccessMode::Read && &h.id() == id));
        let removed_handles = decl.handles.len() != before;
        let removed_extra = decl.extra_inputs.remove(id);
        removed_handles || removed_extra
    }

    /// Add a name-only dependency.
    pub fn add_dependency(&self, id: impl Into<DataObjID>, mode: AccessMode) {
        let id = id.into();
        let mut decl = self.write();
        if mode.reads() {
            decl.extra_inputs.insert(id.clone());
        }
        if mode.writes() {
            decl.extra_outputs.insert(id);
        }
    }

    pub fn handles(&self) -> Vec<Arc<DataHandle>> {
        self.read().handles.clone()
    }

    pub fn input_handles(&self) -> Vec<Arc<DataHandle>> {
        self.read()
            .handles
            .iter()
            .filter(|h| h.mode().reads())
            .cloned()
            .collect()
    }

    pub fn output_handles(&self) -> Vec<Arc<DataHandle>> {
        self.read()
            .handles
            .iter()
            .filter(|h| h.mode().writes())
            .cloned()
            .collect()
    }

    pub fn extra_input_deps(&self) -> BTreeSet<DataObjID> {
        self.read().extra_inputs.clone()
    }

    pub fn extra_output_deps(&self) -> BTreeSet<DataObjID> {
        self.read().extra_outputs.clone()
    }

    /// Everything this holder reads: input handles plus extra inputs.
    pub fn input_data_objs(&self) -> BTreeSet<DataObjID> {
        let decl = self.read();
        decl.handles
            .iter()
            .filter(|h| h.mode().reads())
            .map(|h| h.id())
            .chain(decl.extra_inputs.iter().cloned())
            .collect()
    }

    /// Everything this holder writes: output handles plus extra outputs.
    pub fn output_data_objs(&self) -> BTreeSet<DataObjID> {
        let decl = self.read();
        decl.handles
            .iter()
            .filter(|h| h.mode().writes())
            .map(|h| h.id())
            .chain(decl.extra_outputs.iter().cloned())
            .collect()
    }

    /// Rewrite every declared key, typed and extra.
    pub(crate) fn rewrite_keys(&self, mut fix: impl FnMut(&DataObjID) -> DataObjID) {
        let mut decl = self.write();
        for handle in &decl.handles {
            handle.set_id(fix(&handle.id()));
        }
        decl.extra_inputs = decl.extra_inputs.iter().map(&mut fix).collect();
        decl.extra_outputs = decl.extra_outputs.iter().map(&mut fix).collect();
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("holder", &self.me.name())
            .field("inputs", &self.input_data_objs())
            .field("outputs", &self.output_data_objs())
            .finish()
    }
}

/// Anything that declares data dependencies. Holders form a tree: an
/// algorithm owns tools, which may own further tools.
pub trait DataHandleHolder: Send + Sync {
    fn registry(&self) -> &HandleRegistry;

    /// Directly owned child holders.
    fn sub_holders(&self) -> Vec<&dyn DataHandleHolder> {
        Vec::new()
    }
}

impl DataHandleHolder for HandleRegistry {
    fn registry(&self) -> &HandleRegistry {
        self
    }
}
