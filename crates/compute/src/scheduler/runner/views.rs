use std::sync::{Arc, Mutex};

use eventide_core::EventContext;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::scheduler::plan::ExecutionPlan;
use crate::scheduler::slots::SlotTable;
use crate::scheduler::types::SchedulerError;

use super::core::lock;
use super::execution::Action;
use super::Scheduler;

/// Cloneable handle for opening views of running events, typically held by
/// the algorithm that decides which regions of an event need one.
#[derive(Clone)]
pub struct ViewScheduler {
    actions: UnboundedSender<Action>,
    plan: Arc<ExecutionPlan>,
    slots: Arc<Mutex<SlotTable>>,
}

impl ViewScheduler {
    /// Schedule the algorithms of view node `node` as a view of the event
    /// in `parent`.
    ///
    /// The view context gets the parent's event and slot and a fresh
    /// sub-slot; `view` may carry an event id or extension to pass along.
    /// The request is checked here and queued; it does not wait for the
    /// view to run. Views of views are rejected.
    pub fn schedule_event_view(
        &self,
        parent: &EventContext,
        node: &str,
        view: Option<EventContext>,
    ) -> Result<(), SchedulerError> {
        if self.plan.view_node(node).is_none() {
            return Err(SchedulerError::UnknownViewNode(node.to_string()));
        }
        if !parent.valid() {
            return Err(SchedulerError::InvalidContext(format!(
                "parent context {parent} is not valid"
            )));
        }
        if parent.uses_sub_slot() {
            return Err(SchedulerError::InvalidContext(format!(
                "parent context {parent} is itself a view"
            )));
        }
        if lock(&self.slots, "slot table")?.occupant(parent.slot()) != Some(parent.evt()) {
            return Err(SchedulerError::NotActive {
                slot: parent.slot(),
                event: parent.evt(),
            });
        }

        debug!(slot = parent.slot(), event = parent.evt(), node, "view requested");
        self.actions
            .send(Action::View {
                parent: parent.clone(),
                node: node.to_string(),
                view,
            })
            .map_err(|_| SchedulerError::Stopped)
    }
}

impl Scheduler {
    pub fn view_scheduler(&self) -> ViewScheduler {
        ViewScheduler {
            actions: self.actions.clone(),
            plan: Arc::clone(&self.plan),
            slots: Arc::clone(&self.slots),
        }
    }

    pub fn schedule_event_view(
        &self,
        parent: &EventContext,
        node: &str,
        view: Option<EventContext>,
    ) -> Result<(), SchedulerError> {
        self.view_scheduler().schedule_event_view(parent, node, view)
    }
}
