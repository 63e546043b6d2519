use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::StoreError;
use crate::id::DataObjID;

type Product = Arc<dyn Any + Send + Sync>;

/// Per-slot whiteboard of type-erased data products.
///
/// Products are write-once. A view store reads through to its parent when
/// it does not hold a key itself.
#[derive(Default)]
pub struct EventStore {
    parent: Option<Arc<EventStore>>,
    products: RwLock<HashMap<String, Product>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store for a view nested in `parent`.
    pub fn view(parent: Arc<EventStore>) -> Self {
        Self {
            parent: Some(parent),
            products: RwLock::new(HashMap::new()),
        }
    }

    /// Store `value` under `id` (the first alternative for multi-key ids).
    pub fn put<T: Any + Send + Sync>(&self, id: &DataObjID, value: T) -> Result<(), StoreError> {
        let key = first_key(id);
        let mut products = self.products.write().unwrap_or_else(PoisonError::into_inner);
        if products.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        products.insert(key, Arc::new(value));
        Ok(())
    }

    /// Fetch the product under the first alternative of `id` that exists.
    pub fn get<T: Any + Send + Sync>(&self, id: &DataObjID) -> Result<Arc<T>, StoreError> {
        let product = id
            .alternatives()
            .iter()
            .find_map(|alt| self.lookup(alt.key()))
            .ok_or_else(|| StoreError::Missing(id.key().to_string()))?;
        product.downcast::<T>().map_err(|_| StoreError::TypeMismatch {
            key: id.key().to_string(),
            expected: type_name::<T>(),
        })
    }

    pub fn contains(&self, id: &DataObjID) -> bool {
        id.alternatives().iter().any(|alt| self.lookup(alt.key()).is_some())
    }

    /// Number of products held locally, excluding the parent.
    pub fn len(&self) -> usize {
        self.products.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.products.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn lookup(&self, key: &str) -> Option<Product> {
        let local = self
            .products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        local.or_else(|| self.parent.as_ref().and_then(|p| p.lookup(key)))
    }
}

fn first_key(id: &DataObjID) -> String {
    id.alternatives()
        .into_iter()
        .next()
        .map(|alt| alt.key().to_string())
        .unwrap_or_default()
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("products", &self.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
