//! Data handles: one data product, one access mode, one owner.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::StoreError;
use crate::holder::HolderRef;
use crate::id::{AccessMode, DataObjID};
use crate::store::EventStore;

/// Untyped binding of a [`DataObjID`] to an access mode and an owner.
///
/// The owner is set by the first holder that declares the handle and can
/// never change afterwards. The key stays rewritable so configuration
/// passes (path fixing) can relocate it before the graph is built.
pub struct DataHandle {
    id: RwLock<DataObjID>,
    mode: AccessMode,
    owner: OnceLock<HolderRef>,
}

impl DataHandle {
    pub fn new(id: impl Into<DataObjID>, mode: AccessMode) -> Arc<Self> {
        Arc::new(Self {
            id: RwLock::new(id.into()),
            mode,
            owner: OnceLock::new(),
        })
    }

    pub fn id(&self) -> DataObjID {
        self.id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_id(&self, id: DataObjID) {
        *self.id.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn owner(&self) -> Option<&HolderRef> {
        self.owner.get()
    }

    /// Bind to `holder` if unowned. Returns the effective owner, which the
    /// caller compares against itself.
    pub(crate) fn claim(&self, holder: &HolderRef) -> &HolderRef {
        self.owner.get_or_init(|| holder.clone())
    }
}

impl fmt::Debug for DataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataHandle")
            .field("id", &self.id())
            .field("mode", &self.mode)
            .field("owner", &self.owner().map(HolderRef::name))
            .finish()
    }
}

// ── Typed handles ─────────────────────────────────────────────

/// Typed read access to a product of type `T`.
pub struct ReadHandle<T> {
    handle: Arc<DataHandle>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ReadHandle<T> {
    pub fn new(id: impl Into<DataObjID>) -> Self {
        Self::from_handle(DataHandle::new(id, AccessMode::Read))
    }

    pub(crate) fn from_handle(handle: Arc<DataHandle>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn handle(&self) -> &Arc<DataHandle> {
        &self.handle
    }

    pub fn id(&self) -> DataObjID {
        self.handle.id()
    }

    pub fn get(&self, store: &EventStore) -> Result<Arc<T>, StoreError> {
        store.get::<T>(&self.handle.id())
    }
}

impl<T> Clone for ReadHandle<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            _marker: PhantomData,
        }
    }
}

/// Typed write access to a product of type `T`.
pub struct WriteHandle<T> {
    handle: Arc<DataHandle>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Any + Send + Sync> WriteHandle<T> {
    pub fn new(id: impl Into<DataObjID>) -> Self {
        Self::from_handle(DataHandle::new(id, AccessMode::Write))
    }

    pub(crate) fn from_handle(handle: Arc<DataHandle>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn handle(&self) -> &Arc<DataHandle> {
        &self.handle
    }

    pub fn id(&self) -> DataObjID {
        self.handle.id()
    }

    pub fn put(&self, store: &EventStore, value: T) -> Result<(), StoreError> {
        store.put(&self.handle.id(), value)
    }
}

impl<T> Clone for WriteHandle<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            _marker: PhantomData,
        }
    }
}
