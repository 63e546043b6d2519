use std::sync::Arc;

use eventide_core::{CoreError, EventContext, State};
use eventide_dataflow::{DependencyError, EventStore, StoreError};
use serde::Serialize;

use crate::pool::PoolError;

/// Outcome of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EventStatus {
    Success,
    /// The first algorithm failure seen for the event. Algorithms already
    /// running when it happened were allowed to finish; nothing else ran.
    Failed { algorithm: String, reason: String },
}

impl EventStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// An event handed back by the scheduler.
///
/// The store stays readable after the slot has been returned.
#[derive(Debug, Clone)]
pub struct FinishedEvent {
    pub context: EventContext,
    pub status: EventStatus,
    pub store: Arc<EventStore>,
    /// Views opened for the event, in the order they were opened.
    pub views: Vec<(EventContext, Arc<EventStore>)>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is {0}, not RUNNING")]
    NotRunning(State),
    #[error("requested {requested} slot(s) but only {free} free")]
    NoFreeSlots { requested: usize, free: usize },
    #[error("slot {0} is occupied")]
    SlotOccupied(usize),
    #[error("slot {slot} is out of range ({slots} slots)")]
    SlotOutOfRange { slot: usize, slots: usize },
    #[error("slot {0} requested twice in one batch")]
    DuplicateSlot(usize),
    #[error("invalid event context: {0}")]
    InvalidContext(String),
    #[error("no events in flight")]
    NoEventsInFlight,
    #[error("{0} event(s) still in flight")]
    EventsInFlight(usize),
    #[error("unknown view node '{0}'")]
    UnknownViewNode(String),
    #[error("slot {slot} is not processing event {event}")]
    NotActive { slot: usize, event: u64 },
    #[error("scheduler loop has stopped")]
    Stopped,
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] CoreError),
    #[error("failed to build executor: {0}")]
    Executor(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_helpers() {
        assert!(EventStatus::Success.is_success());
        let failed = EventStatus::Failed {
            algorithm: "A".into(),
            reason: "boom".into(),
        };
        assert!(!failed.is_success());
        assert_eq!(
            serde_json::to_string(&failed).unwrap(),
            r#"{"Failed":{"algorithm":"A","reason":"boom"}}"#
        );
    }

    #[test]
    fn errors_name_the_offender() {
        let err = SchedulerError::NoFreeSlots { requested: 3, free: 1 };
        assert_eq!(err.to_string(), "requested 3 slot(s) but only 1 free");
        let err = SchedulerError::NotRunning(State::Initialized);
        assert_eq!(err.to_string(), "scheduler is INITIALIZED, not RUNNING");
    }
}
