use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eventide_core::EventContext;
use eventide_dataflow::{DataHandleHolder, EventStore, StoreError};

use crate::suspend::SuspendError;

/// Error type for algorithm execution and lifecycle hooks.
#[derive(Debug, thiserror::Error)]
pub enum AlgorithmError {
    #[error("Algorithm failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Suspend(#[from] SuspendError),
    #[error("View scheduling failed: {0}")]
    View(String),
    #[error("Algorithm panicked: {0}")]
    Panicked(String),
}

impl AlgorithmError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Shared part of every schedulable unit: identity, declared dependencies,
/// and lifecycle hooks.
///
/// The hooks run when the pool drives an instance through its state
/// machine. All default to doing nothing.
pub trait Component: DataHandleHolder + AsHolder {
    /// Name used for logging, metrics and pool lookup.
    fn name(&self) -> &str {
        self.registry().name()
    }

    fn initialize(&self) -> Result<(), AlgorithmError> {
        Ok(())
    }

    fn start(&self) -> Result<(), AlgorithmError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), AlgorithmError> {
        Ok(())
    }

    fn finalize(&self) -> Result<(), AlgorithmError> {
        Ok(())
    }
}

/// An algorithm that runs to completion on a worker thread.
///
/// `execute` takes `&self`: instances with cardinality 0 are shared between
/// concurrent events and must keep per-event state out of `self`.
pub trait Algorithm: Component {
    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError>;
}

/// An algorithm that may suspend on external asynchronous work.
///
/// Suspension points inside `execute` should go through
/// [`crate::suspend`] so the current context is checked on resume.
#[async_trait]
pub trait AsyncAlgorithm: Component {
    async fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError>;
}

/// One algorithm instance as held by the pool.
#[derive(Clone)]
pub enum Instance {
    Blocking(Arc<dyn Algorithm>),
    Suspendable(Arc<dyn AsyncAlgorithm>),
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name())
            .field("asynchronous", &self.is_asynchronous())
            .finish()
    }
}

impl Instance {
    pub fn blocking(alg: impl Algorithm + 'static) -> Self {
        Self::Blocking(Arc::new(alg))
    }

    pub fn suspendable(alg: impl AsyncAlgorithm + 'static) -> Self {
        Self::Suspendable(Arc::new(alg))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Blocking(a) => a.name(),
            Self::Suspendable(a) => a.name(),
        }
    }

    pub fn is_asynchronous(&self) -> bool {
        matches!(self, Self::Suspendable(_))
    }

    /// The root of this instance's holder tree.
    pub fn holder(&self) -> &dyn DataHandleHolder {
        match self {
            Self::Blocking(a) => a.as_holder(),
            Self::Suspendable(a) => a.as_holder(),
        }
    }

    /// True if both refer to the same underlying object.
    pub fn same_instance(&self, other: &Instance) -> bool {
        match (self, other) {
            (Self::Blocking(a), Self::Blocking(b)) => Arc::ptr_eq(a, b),
            (Self::Suspendable(a), Self::Suspendable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn initialize(&self) -> Result<(), AlgorithmError> {
        match self {
            Self::Blocking(a) => a.initialize(),
            Self::Suspendable(a) => a.initialize(),
        }
    }

    pub(crate) fn start(&self) -> Result<(), AlgorithmError> {
        match self {
            Self::Blocking(a) => a.start(),
            Self::Suspendable(a) => a.start(),
        }
    }

    pub(crate) fn stop(&self) -> Result<(), AlgorithmError> {
        match self {
            Self::Blocking(a) => a.stop(),
            Self::Suspendable(a) => a.stop(),
        }
    }

    pub(crate) fn finalize(&self) -> Result<(), AlgorithmError> {
        match self {
            Self::Blocking(a) => a.finalize(),
            Self::Suspendable(a) => a.finalize(),
        }
    }
}

/// View of a component as the root of its holder tree. Implemented for
/// every sized holder; usable through `dyn Algorithm`.
pub trait AsHolder {
    fn as_holder(&self) -> &dyn DataHandleHolder;
}

impl<T: DataHandleHolder> AsHolder for T {
    fn as_holder(&self) -> &dyn DataHandleHolder {
        self
    }
}
