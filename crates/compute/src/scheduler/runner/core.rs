use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;

use eventide_core::{ConcurrencyFlags, Lifecycle, SchedulerSection, State, Transition};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{error, info, warn};

use crate::pool::ResourcePool;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::occupancy::{OccupancySampler, OccupancySnapshot};
use crate::scheduler::plan::ExecutionPlan;
use crate::scheduler::slots::SlotTable;
use crate::scheduler::types::SchedulerError;

use super::execution::{Action, Dispatcher};
use super::queue::FinishedQueue;

/// The event scheduler. Owns the slot table, the worker pools and the
/// dispatcher thread; algorithm instances come from a shared
/// [`ResourcePool`].
pub struct Scheduler {
    pub(super) config: SchedulerSection,
    pub(super) pool: Arc<ResourcePool>,
    pub(super) plan: Arc<ExecutionPlan>,
    pub(super) lifecycle: Mutex<Lifecycle>,
    /// Slot occupancy, shared with the dispatcher and view schedulers.
    pub(super) slots: Arc<Mutex<SlotTable>>,
    /// Inbox of the dispatcher.
    pub(super) actions: UnboundedSender<Action>,
    pub(super) finished: Arc<FinishedQueue>,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
    /// Dispatcher state while the scheduler is not running.
    parked: Mutex<Option<Dispatcher>>,
    /// Dispatcher thread while the scheduler is running.
    actor: Mutex<Option<JoinHandle<Dispatcher>>>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl Scheduler {
    /// Build the execution plan from `pool` and bring the scheduler to
    /// INITIALIZED. The pool is configured and initialized first if needed.
    pub fn new(config: SchedulerSection, pool: Arc<ResourcePool>) -> Result<Self, SchedulerError> {
        if config.event_slots == 0 {
            return Err(SchedulerError::Config("event_slots must be > 0".into()));
        }
        let flags = config.concurrency_flags();
        if ConcurrencyFlags::install(flags).is_err() && ConcurrencyFlags::global() != flags {
            warn!(
                installed = ?ConcurrencyFlags::global(),
                scheduler = ?flags,
                "process concurrency flags do not describe this scheduler"
            );
        }
        pool.bring_up()?;
        let plan = Arc::new(ExecutionPlan::build(&pool, &config)?);

        let num_workers = config.resolved_worker_threads();
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("eventide-worker-{i}"))
            .build()
            .map_err(|e| SchedulerError::Executor(e.to_string()))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.async_threads.max(1))
            .thread_name("eventide-async")
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Executor(e.to_string()))?;

        let (actions, inbox) = mpsc::unbounded_channel();
        let finished = Arc::new(FinishedQueue::default());
        let wake = actions.clone();
        pool.on_release(move || wake.send(Action::Wake).is_ok());
        let slots = Arc::new(Mutex::new(SlotTable::new(config.event_slots)));
        let metrics = Arc::new(RwLock::new(SchedulerMetrics::default()));

        let dispatcher = Dispatcher {
            inbox,
            actions: actions.clone(),
            finished: Arc::clone(&finished),
            pool: Arc::clone(&pool),
            plan: Arc::clone(&plan),
            slots: Arc::clone(&slots),
            metrics: Arc::clone(&metrics),
            workers: Arc::new(workers),
            num_workers,
            runtime: runtime.handle().clone(),
            busy: Arc::new(AtomicUsize::new(0)),
            sampler: None,
            active: BTreeMap::new(),
            retired: HashMap::new(),
            next_seq: 0,
        };

        let mut lifecycle = Lifecycle::new();
        lifecycle.begin(Transition::Configure)?;
        lifecycle.commit();
        lifecycle.begin(Transition::Initialize)?;
        lifecycle.commit();

        info!(
            slots = config.event_slots,
            workers = num_workers,
            async_threads = config.async_threads.max(1),
            "scheduler initialized"
        );

        Ok(Self {
            config,
            pool,
            plan,
            lifecycle: Mutex::new(lifecycle),
            slots,
            actions,
            finished,
            metrics,
            parked: Mutex::new(Some(dispatcher)),
            actor: Mutex::new(None),
            runtime: Some(runtime),
        })
    }

    /// Start the pool's instances and the dispatcher thread.
    pub fn start(&self) -> Result<State, SchedulerError> {
        let state = self.transition(Transition::Start, || self.launch_dispatcher())?;
        info!("scheduler running");
        Ok(state)
    }

    /// Stop the dispatcher and the pool's instances. Every admitted event
    /// must have been popped first.
    pub fn stop(&self) -> Result<State, SchedulerError> {
        let state = self.transition(Transition::Stop, || {
            // Admission is closed from here on, so the count cannot grow.
            let in_flight = self.in_flight();
            if in_flight > 0 {
                return Err(SchedulerError::EventsInFlight(in_flight));
            }
            self.park_dispatcher()?;
            if self.pool.fsm_state() == State::Running {
                self.pool.stop()?;
            }
            Ok(())
        })?;
        info!("scheduler stopped");
        Ok(state)
    }

    /// Run `hook` between begin and commit without holding the lifecycle
    /// lock, so the target state is observable while it runs.
    fn transition(
        &self,
        transition: Transition,
        hook: impl FnOnce() -> Result<(), SchedulerError>,
    ) -> Result<State, SchedulerError> {
        let target = self.lock_lifecycle()?.begin(transition)?;
        let result = hook();
        let mut lifecycle = self.lock_lifecycle()?;
        match result {
            Ok(()) => {
                lifecycle.commit();
                Ok(target)
            }
            Err(e) => {
                warn!(transition = %transition, error = %e, "scheduler transition failed");
                lifecycle.abort();
                Err(e)
            }
        }
    }

    fn launch_dispatcher(&self) -> Result<(), SchedulerError> {
        if self.pool.fsm_state() == State::Initialized {
            self.pool.start()?;
        }
        let dispatcher = lock(&self.parked, "parked dispatcher")?
            .take()
            .ok_or(SchedulerError::Stopped)?;
        let handle = std::thread::Builder::new()
            .name("eventide-scheduler".into())
            .spawn(move || dispatcher.run())
            .map_err(|e| SchedulerError::Executor(e.to_string()))?;
        *lock(&self.actor, "dispatcher thread")? = Some(handle);
        Ok(())
    }

    fn park_dispatcher(&self) -> Result<(), SchedulerError> {
        let Some(handle) = lock(&self.actor, "dispatcher thread")?.take() else {
            return Ok(());
        };
        self.actions
            .send(Action::Shutdown)
            .map_err(|_| SchedulerError::Stopped)?;
        let dispatcher = handle
            .join()
            .map_err(|_| SchedulerError::Executor("dispatcher thread panicked".into()))?;
        *lock(&self.parked, "parked dispatcher")? = Some(dispatcher);
        Ok(())
    }

    /// Sample slot occupancy every `period_ms` milliseconds of scheduler
    /// activity. `0` samples on every state change; a negative period turns
    /// sampling off. The callback runs off the dispatcher thread.
    pub fn record_occupancy(
        &self,
        period_ms: i64,
        callback: impl Fn(OccupancySnapshot) + Send + Sync + 'static,
    ) -> Result<(), SchedulerError> {
        let sampler = OccupancySampler::new(period_ms, Arc::new(callback));
        info!(period_ms, enabled = sampler.is_some(), "occupancy sampling configured");
        self.actions
            .send(Action::Occupancy(sampler))
            .map_err(|_| SchedulerError::Stopped)
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn fsm_state(&self) -> State {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    pub fn target_fsm_state(&self) -> State {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .target_state()
    }

    /// Slots available for admission right now.
    pub fn free_slots(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).free()
    }

    /// Admitted events not yet popped, finished or not.
    pub fn in_flight(&self) -> usize {
        let table = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        table.capacity() - table.free()
    }

    pub fn config(&self) -> &SchedulerSection {
        &self.config
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>, SchedulerError> {
        lock(&self.lifecycle, "scheduler lifecycle")
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.fsm_state())
            .field("slots", &self.config.event_slots)
            .field("in_flight", &self.in_flight())
            .field("unpopped", &self.finished.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let handle = self
            .actor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if self.actions.send(Action::Shutdown).is_ok() && handle.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

pub(super) fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    what: &str,
) -> Result<MutexGuard<'a, T>, SchedulerError> {
    mutex
        .lock()
        .map_err(|e| SchedulerError::LockPoisoned(format!("{what}: {e}")))
}
