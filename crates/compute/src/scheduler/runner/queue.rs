use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::scheduler::types::{FinishedEvent, SchedulerError};

pub(super) type Pending<'a> = MutexGuard<'a, VecDeque<FinishedEvent>>;

/// Finished events waiting to be popped.
///
/// Poppers never hold the lock while they wait. Pushes and slot releases
/// happen under it and wake every waiter, so a waiter cannot miss an event
/// or the last event in flight being taken by someone else.
#[derive(Default)]
pub(super) struct FinishedQueue {
    events: Mutex<VecDeque<FinishedEvent>>,
    ready: Condvar,
}

impl FinishedQueue {
    pub fn push(&self, event: FinishedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
        self.ready.notify_all();
    }

    /// Make waiters re-check their exit condition.
    pub fn wake(&self) {
        self.ready.notify_all();
    }

    pub fn lock(&self) -> Result<Pending<'_>, SchedulerError> {
        self.events
            .lock()
            .map_err(|e| SchedulerError::LockPoisoned(format!("finished queue: {e}")))
    }

    /// Release the lock until the next push.
    pub fn wait<'a>(&self, pending: Pending<'a>) -> Result<Pending<'a>, SchedulerError> {
        self.ready
            .wait(pending)
            .map_err(|e| SchedulerError::LockPoisoned(format!("finished queue: {e}")))
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
