//! The dispatcher thread: the single owner of per-event scheduling state.
//!
//! Admissions, view requests and algorithm completions arrive as
//! [`Action`]s. After each one the dispatcher launches every algorithm whose
//! predecessors are done and whose instance and resources can be had without
//! waiting, retires finished events, and takes an occupancy sample if one is
//! due. Events are served oldest first.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use eventide_core::{ContextGuard, EventContext};
use eventide_dataflow::{AlgIndex, EventStore};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::algorithm::{AlgorithmError, Instance};
use crate::pool::ResourcePool;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::occupancy::{OccupancySampler, OccupancySnapshot, SlotOccupancy, SlotState};
use crate::scheduler::plan::ExecutionPlan;
use crate::scheduler::slots::SlotTable;
use crate::scheduler::types::{EventStatus, FinishedEvent};
use crate::suspend::InContext;

use super::queue::FinishedQueue;

pub(crate) enum Action {
    Admit {
        ctx: EventContext,
        store: Arc<EventStore>,
    },
    View {
        parent: EventContext,
        node: String,
        view: Option<EventContext>,
    },
    Done(Completion),
    Occupancy(Option<OccupancySampler>),
    /// Something was released outside the dispatcher; retry deferred work.
    Wake,
    Shutdown,
}

pub(crate) struct Completion {
    slot: usize,
    frame: usize,
    alg: AlgIndex,
    instance: Instance,
    outcome: Result<Duration, AlgorithmError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlgState {
    Waiting,
    Running,
    Done,
}

/// The main event or one of its views.
struct Frame {
    ctx: EventContext,
    store: Arc<EventStore>,
    /// Members in topological order.
    order: Vec<AlgIndex>,
    states: HashMap<AlgIndex, AlgState>,
}

impl Frame {
    fn new(ctx: EventContext, store: Arc<EventStore>, members: &[AlgIndex]) -> Self {
        Self {
            ctx,
            store,
            order: members.to_vec(),
            states: members.iter().map(|&m| (m, AlgState::Waiting)).collect(),
        }
    }

    fn count(&self, state: AlgState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    fn is_complete(&self) -> bool {
        self.states.values().all(|s| *s == AlgState::Done)
    }
}

pub(super) struct ActiveEvent {
    /// Admission order.
    seq: u64,
    /// `frames[0]` is the main event.
    frames: Vec<Frame>,
    failure: Option<EventStatus>,
}

impl ActiveEvent {
    fn main(&self) -> &Frame {
        &self.frames[0]
    }

    fn count(&self, state: AlgState) -> usize {
        self.frames.iter().map(|f| f.count(state)).sum()
    }

    /// Done when every frame is, or, after a failure, once nothing is
    /// running any more.
    fn is_finished(&self) -> bool {
        if self.failure.is_some() {
            self.count(AlgState::Running) == 0
        } else {
            self.frames.iter().all(Frame::is_complete)
        }
    }

    /// A view member falls back to the main frame for predecessors outside
    /// its own node.
    fn state_of(&self, frame: usize, idx: AlgIndex) -> Option<AlgState> {
        self.frames[frame]
            .states
            .get(&idx)
            .or_else(|| self.main().states.get(&idx))
            .copied()
    }
}

/// Everything a launched algorithm carries to its worker and back.
struct Job {
    slot: usize,
    frame: usize,
    alg: AlgIndex,
    name: String,
    ctx: EventContext,
    store: Arc<EventStore>,
    instance: Instance,
}

impl Job {
    fn finish(self, actions: &UnboundedSender<Action>, outcome: Result<Duration, AlgorithmError>) {
        let done = Completion {
            slot: self.slot,
            frame: self.frame,
            alg: self.alg,
            instance: self.instance,
            outcome,
        };
        if actions.send(Action::Done(done)).is_err() {
            debug!(algorithm = %self.name, "scheduler gone, completion dropped");
        }
    }
}

pub(crate) struct Dispatcher {
    pub(super) inbox: UnboundedReceiver<Action>,
    pub(super) actions: UnboundedSender<Action>,
    pub(super) finished: Arc<FinishedQueue>,
    pub(super) pool: Arc<ResourcePool>,
    pub(super) plan: Arc<ExecutionPlan>,
    pub(super) slots: Arc<Mutex<SlotTable>>,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
    pub(super) workers: Arc<rayon::ThreadPool>,
    pub(super) num_workers: usize,
    pub(super) runtime: Handle,
    /// Worker threads currently executing an algorithm.
    pub(super) busy: Arc<AtomicUsize>,
    pub(super) sampler: Option<OccupancySampler>,
    /// Events still processing, by slot.
    pub(super) active: BTreeMap<usize, ActiveEvent>,
    /// Finished events not yet popped, by slot.
    pub(super) retired: HashMap<usize, u64>,
    pub(super) next_seq: u64,
}

impl Dispatcher {
    /// Serve the inbox until told to shut down. Returns itself so the
    /// scheduler can restart it later.
    pub(super) fn run(mut self) -> Self {
        info!(workers = self.num_workers, "dispatcher started");
        while let Some(action) = self.inbox.blocking_recv() {
            match action {
                Action::Shutdown => break,
                Action::Admit { ctx, store } => self.admit(ctx, store),
                Action::View { parent, node, view } => self.open_view(&parent, &node, view),
                Action::Done(done) => self.complete(done),
                Action::Occupancy(sampler) => self.sampler = sampler,
                Action::Wake => {}
            }
            self.dispatch();
            self.retire();
            self.sample();
        }
        info!(active = self.active.len(), "dispatcher stopped");
        self
    }

    fn admit(&mut self, ctx: EventContext, store: Arc<EventStore>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = ctx.slot();
        self.retired.remove(&slot);
        debug!(slot, event = ctx.evt(), "event admitted");
        let main = Frame::new(ctx, store, self.plan.main());
        self.active.insert(
            slot,
            ActiveEvent {
                seq,
                frames: vec![main],
                failure: None,
            },
        );
    }

    fn open_view(&mut self, parent: &EventContext, node: &str, view: Option<EventContext>) {
        let Some(members) = self.plan.view_node(node) else {
            warn!(node, "view requested for unknown node");
            return;
        };
        let slot = parent.slot();
        let event = match self.active.get_mut(&slot) {
            Some(event) if event.main().ctx.evt() == parent.evt() => event,
            _ => {
                warn!(slot, event = parent.evt(), node, "view requested for an event that is no longer processing");
                return;
            }
        };
        if event.failure.is_some() {
            debug!(slot, event = parent.evt(), node, "event already failed, view dropped");
            return;
        }

        let sub = event.frames.len() - 1;
        let mut ctx = view.unwrap_or_else(|| parent.clone());
        ctx.set(parent.evt(), slot);
        ctx.set_sub_slot(sub);
        let store = Arc::new(EventStore::view(Arc::clone(&event.main().store)));
        debug!(slot, event = parent.evt(), sub, node, algorithms = members.len(), "view opened");
        event.frames.push(Frame::new(ctx, store, members));

        if let Ok(mut m) = self.metrics.write() {
            m.views_scheduled += 1;
        }
    }

    // ── Dispatch ──────────────────────────────────────────────

    fn dispatch(&mut self) {
        let mut order: Vec<(u64, usize)> = self
            .active
            .iter()
            .filter(|(_, e)| e.failure.is_none())
            .map(|(slot, e)| (e.seq, *slot))
            .collect();
        order.sort_unstable();

        for (_, slot) in order {
            for (frame, idx) in self.ready(slot) {
                if !matches!(self.active.get(&slot), Some(e) if e.failure.is_none()) {
                    break;
                }
                self.try_launch(slot, frame, idx);
            }
        }
    }

    /// Waiting algorithms of the event in `slot` whose predecessors are all
    /// done, as (frame, algorithm) pairs.
    fn ready(&self, slot: usize) -> Vec<(usize, AlgIndex)> {
        let Some(event) = self.active.get(&slot) else {
            return Vec::new();
        };
        let graph = self.plan.graph();
        let mut ready = Vec::new();
        for (f, frame) in event.frames.iter().enumerate() {
            for &idx in &frame.order {
                if frame.states.get(&idx) != Some(&AlgState::Waiting) {
                    continue;
                }
                let satisfied = graph
                    .predecessors(idx)
                    .iter()
                    .all(|&p| event.state_of(f, p) == Some(AlgState::Done));
                if satisfied {
                    ready.push((f, idx));
                }
            }
        }
        ready
    }

    fn try_launch(&mut self, slot: usize, frame: usize, idx: AlgIndex) {
        let name = self.plan.name_of(idx).to_string();
        let instance = match self.pool.acquire_algorithm(&name, false) {
            Ok(instance) => instance,
            Err(e) if e.is_contention() => {
                debug!(slot, algorithm = %name, reason = %e, "deferred");
                return;
            }
            Err(e) => {
                self.fail(slot, &name, e.to_string());
                return;
            }
        };

        let Some(f) = self.active.get_mut(&slot).and_then(|e| e.frames.get_mut(frame)) else {
            if let Err(e) = self.pool.release_algorithm(&name, &instance) {
                error!(algorithm = %name, error = %e, "failed to release algorithm instance");
            }
            return;
        };
        f.states.insert(idx, AlgState::Running);
        let job = Job {
            slot,
            frame,
            alg: idx,
            name,
            ctx: f.ctx.clone(),
            store: Arc::clone(&f.store),
            instance,
        };
        self.launch(job);
    }

    fn launch(&self, job: Job) {
        debug!(
            slot = job.slot,
            event = job.ctx.evt(),
            algorithm = %job.name,
            asynchronous = job.instance.is_asynchronous(),
            "dispatching"
        );
        let actions = self.actions.clone();
        match job.instance.clone() {
            Instance::Blocking(alg) => {
                let busy = Arc::clone(&self.busy);
                self.workers.spawn(move || {
                    busy.fetch_add(1, Ordering::Relaxed);
                    let started = Instant::now();
                    let result = {
                        let _guard = ContextGuard::enter(job.ctx.clone());
                        panic::catch_unwind(AssertUnwindSafe(|| alg.execute(&job.ctx, &job.store)))
                            .unwrap_or_else(|payload| Err(AlgorithmError::Panicked(panic_message(payload.as_ref()))))
                    };
                    busy.fetch_sub(1, Ordering::Relaxed);
                    job.finish(&actions, result.map(|()| started.elapsed()));
                });
            }
            Instance::Suspendable(alg) => {
                let ctx = job.ctx.clone();
                let store = Arc::clone(&job.store);
                let task = self.runtime.spawn(
                    async move {
                        let started = Instant::now();
                        alg.execute(&ctx, &store).await.map(|()| started.elapsed())
                    }
                    .in_context(job.ctx.clone()),
                );
                self.runtime.spawn(async move {
                    let outcome = task
                        .await
                        .unwrap_or_else(|e| Err(AlgorithmError::Panicked(e.to_string())));
                    job.finish(&actions, outcome);
                });
            }
        }
    }

    // ── Completion ────────────────────────────────────────────

    fn complete(&mut self, done: Completion) {
        let name = self.plan.name_of(done.alg).to_string();
        if let Err(e) = self.pool.release_algorithm(&name, &done.instance) {
            error!(algorithm = %name, error = %e, "failed to release algorithm instance");
        }

        if let Ok(mut m) = self.metrics.write() {
            let busy = self.busy.load(Ordering::Relaxed);
            m.worker_utilization = busy as f64 / self.num_workers.max(1) as f64;
            match &done.outcome {
                Ok(elapsed) => m.record_execution(&name, *elapsed),
                Err(_) => m.record_failure(&name),
            }
        }

        let Some(event) = self.active.get_mut(&done.slot) else {
            error!(slot = done.slot, algorithm = %name, "completion for a slot with no active event");
            return;
        };
        if let Some(frame) = event.frames.get_mut(done.frame) {
            frame.states.insert(done.alg, AlgState::Done);
        }
        match done.outcome {
            Ok(elapsed) => debug!(
                slot = done.slot,
                event = event.main().ctx.evt(),
                algorithm = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                "algorithm finished"
            ),
            Err(e) => self.fail(done.slot, &name, e.to_string()),
        }
    }

    /// Record the first failure of the event in `slot`.
    fn fail(&mut self, slot: usize, algorithm: &str, reason: String) {
        let Some(event) = self.active.get_mut(&slot) else {
            return;
        };
        warn!(slot, event = event.main().ctx.evt(), algorithm, reason = %reason, "algorithm failed");
        if event.failure.is_none() {
            event.failure = Some(EventStatus::Failed {
                algorithm: algorithm.to_string(),
                reason,
            });
        }
    }

    fn retire(&mut self) {
        let finished: Vec<usize> = self
            .active
            .iter()
            .filter(|(_, e)| e.is_finished())
            .map(|(slot, _)| *slot)
            .collect();

        for slot in finished {
            let Some(event) = self.active.remove(&slot) else {
                continue;
            };
            let status = event.failure.unwrap_or(EventStatus::Success);
            if let Ok(mut m) = self.metrics.write() {
                m.record_event(&status);
            }

            let mut frames = event.frames.into_iter();
            let Some(main) = frames.next() else {
                continue;
            };
            let evt = main.ctx.evt();
            debug!(slot, event = evt, success = status.is_success(), "event finished");
            self.retired.insert(slot, evt);

            self.finished.push(FinishedEvent {
                context: main.ctx,
                status,
                store: main.store,
                views: frames.map(|f| (f.ctx, f.store)).collect(),
            });
        }
    }

    // ── Occupancy ─────────────────────────────────────────────

    fn sample(&mut self) {
        let Some(sampler) = self.sampler.as_mut() else {
            return;
        };
        if !sampler.due(Instant::now()) {
            return;
        }
        let callback = sampler.callback();
        let snapshot = self.snapshot();
        self.runtime.spawn_blocking(move || callback(snapshot));
    }

    fn snapshot(&self) -> OccupancySnapshot {
        let table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slots = (0..table.capacity())
            .map(|slot| match (self.active.get(&slot), table.occupant(slot)) {
                (Some(event), _) => SlotOccupancy {
                    slot,
                    event: Some(event.main().ctx.evt()),
                    state: SlotState::Busy,
                    waiting: event.count(AlgState::Waiting),
                    running: event.count(AlgState::Running),
                    done: event.count(AlgState::Done),
                    views: event.frames.len() - 1,
                },
                (None, Some(evt)) => SlotOccupancy {
                    event: Some(evt),
                    state: if self.retired.get(&slot) == Some(&evt) {
                        SlotState::Finished
                    } else {
                        // Reserved, admission still queued.
                        SlotState::Busy
                    },
                    ..SlotOccupancy::free(slot)
                },
                (None, None) => SlotOccupancy::free(slot),
            })
            .collect();
        OccupancySnapshot {
            time: Utc::now(),
            slots,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
