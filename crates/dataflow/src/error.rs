use thiserror::Error;

use crate::id::DataObjID;

/// Configuration-time errors in dependency declaration and graph construction.
///
/// These are structural: a component that hits one must be rejected rather
/// than scheduled with an inconsistent graph.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("holder '{holder}' cannot {action} '{id}': owned by '{owner}'")]
    NotOwner {
        holder: String,
        action: &'static str,
        id: DataObjID,
        owner: String,
    },

    #[error("data object '{id}' is produced by both '{first}' and '{second}'")]
    MultipleProducers {
        id: DataObjID,
        first: String,
        second: String,
    },

    #[error("algorithm '{algorithm}' reads '{id}' but nothing produces it")]
    UnresolvedInput { algorithm: String, id: DataObjID },

    #[error("circular data dependency among algorithms: {0}")]
    CircularDependency(String),

    #[error("algorithm '{0}' registered twice in the data-flow graph")]
    DuplicateAlgorithm(String),
}

/// Errors reading or writing the per-event data store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("data object '{0}' not found in event store")]
    Missing(String),

    #[error("data object '{0}' already exists in event store")]
    AlreadyExists(String),

    #[error("data object '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}
