use std::sync::{Arc, PoisonError};

use eventide_core::{EventContext, State};
use eventide_dataflow::{EventStore, StoreError};
use tracing::{debug, info, warn};

use crate::scheduler::types::{FinishedEvent, SchedulerError};

use super::core::lock;
use super::execution::Action;
use super::Scheduler;

impl Scheduler {
    /// Admit one event. A context without a slot gets the lowest free one.
    /// Returns the context as admitted.
    pub fn push_new_event(&self, ctx: EventContext) -> Result<EventContext, SchedulerError> {
        self.push_new_event_with(ctx, |_| Ok(()))
    }

    /// Admit one event after `fill` has put the caller-supplied products
    /// into its fresh store. Nothing is reserved if `fill` fails.
    pub fn push_new_event_with<F>(
        &self,
        ctx: EventContext,
        fill: F,
    ) -> Result<EventContext, SchedulerError>
    where
        F: FnOnce(&EventStore) -> Result<(), StoreError>,
    {
        let store = EventStore::new();
        fill(&store)?;
        let mut admitted = self.admit(vec![(ctx, Arc::new(store))])?;
        admitted.pop().ok_or(SchedulerError::Stopped)
    }

    /// Admit every context or none of them.
    pub fn push_new_events(
        &self,
        ctxs: Vec<EventContext>,
    ) -> Result<Vec<EventContext>, SchedulerError> {
        let batch = ctxs
            .into_iter()
            .map(|ctx| (ctx, Arc::new(EventStore::new())))
            .collect();
        self.admit(batch)
    }

    fn admit(
        &self,
        batch: Vec<(EventContext, Arc<EventStore>)>,
    ) -> Result<Vec<EventContext>, SchedulerError> {
        // Held until every admission is queued, so a concurrent stop sees
        // the whole batch or none of it.
        let lifecycle = lock(&self.lifecycle, "scheduler lifecycle")?;
        match (lifecycle.state(), lifecycle.target_state()) {
            (State::Running, State::Running) => {}
            (State::Running, target) => return Err(SchedulerError::NotRunning(target)),
            (state, _) => return Err(SchedulerError::NotRunning(state)),
        }

        let (mut ctxs, stores): (Vec<EventContext>, Vec<Arc<EventStore>>) = batch.into_iter().unzip();
        lock(&self.slots, "slot table")?.reserve(&mut ctxs)?;

        for (ctx, store) in ctxs.iter().zip(stores) {
            debug!(slot = ctx.slot(), event = ctx.evt(), "pushing event");
            let admit = Action::Admit {
                ctx: ctx.clone(),
                store,
            };
            if self.actions.send(admit).is_err() {
                warn!("dispatcher inbox closed, rolling back admission");
                let _pending = self.finished.lock()?;
                let mut table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
                for ctx in &ctxs {
                    table.release(ctx.slot());
                }
                self.finished.wake();
                return Err(SchedulerError::Stopped);
            }
        }

        drop(lifecycle);

        if let Ok(mut m) = self.metrics.write() {
            m.events_admitted += ctxs.len() as u64;
        }
        if ctxs.len() > 1 {
            info!(events = ctxs.len(), free = self.free_slots(), "batch admitted");
        }
        Ok(ctxs)
    }

    /// Wait for the next finished event and return its slot to the free set.
    ///
    /// Fails with [`SchedulerError::NoEventsInFlight`] instead of waiting
    /// forever.
    pub fn pop_finished_event(&self) -> Result<FinishedEvent, SchedulerError> {
        let mut pending = self.finished.lock()?;
        loop {
            if let Some(event) = pending.pop_front() {
                // Freed before the queue is unlocked, so other poppers never
                // count an event that is already taken.
                self.release_slot(&event)?;
                return Ok(event);
            }
            if self.in_flight() == 0 {
                return Err(SchedulerError::NoEventsInFlight);
            }
            pending = self.finished.wait(pending)?;
        }
    }

    /// Like [`pop_finished_event`](Self::pop_finished_event) but returns
    /// `Ok(None)` when no event has finished yet.
    pub fn try_pop_finished_event(&self) -> Result<Option<FinishedEvent>, SchedulerError> {
        let mut pending = self.finished.lock()?;
        let Some(event) = pending.pop_front() else {
            return Ok(None);
        };
        self.release_slot(&event)?;
        Ok(Some(event))
    }

    /// Called with the finished queue locked.
    fn release_slot(&self, event: &FinishedEvent) -> Result<(), SchedulerError> {
        let slot = event.context.slot();
        lock(&self.slots, "slot table")?.release(slot);
        self.finished.wake();
        debug!(
            slot,
            event = event.context.evt(),
            success = event.status.is_success(),
            "event popped"
        );
        Ok(())
    }
}
