//! Algorithm instances and shared resources.
//!
//! The [`ResourcePool`] owns every algorithm instance (clones included) and
//! a set of named non-reentrant resources. All mutable "who holds what"
//! state sits in one ledger behind one mutex; the lock is only ever taken
//! for synchronous bookkeeping and is never held across an await. Blocking
//! acquisition waits on a condition variable that every release signals.

mod ledger;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use eventide_core::{AlgorithmOverride, CoreError, FrameworkConfig, Lifecycle, State, Transition};
use eventide_dataflow::PathFixer;
use tracing::{debug, info, warn};

use crate::algorithm::{Algorithm, AlgorithmError, AsyncAlgorithm, Instance};
use ledger::{Entry, Ledger, drive};

/// Error type for pool registration, acquisition and lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
    #[error("no free instance of '{name}' (cardinality {cardinality})")]
    NoFreeInstance { name: String, cardinality: usize },
    #[error("resource '{0}' is busy")]
    ResourceBusy(String),
    #[error("instance of '{0}' was not acquired from this pool")]
    NotAcquired(String),
    #[error("resource '{0}' is not held")]
    NotHeld(String),
    #[error("'{0}' is already registered")]
    Duplicate(String),
    #[error("sequence '{sequence}': {reason}")]
    Sequence { sequence: String, reason: String },
    #[error("cannot {operation} while the pool is {state}")]
    WrongState { operation: &'static str, state: State },
    #[error("{0} instance(s) still leased")]
    InUse(usize),
    #[error("could not create '{name}': {source}")]
    Factory { name: String, source: AlgorithmError },
    #[error("algorithm '{name}' failed during {transition}: {source}")]
    Hook {
        name: String,
        transition: Transition,
        source: AlgorithmError,
    },
    #[error(transparent)]
    Lifecycle(#[from] CoreError),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl PoolError {
    /// Contention results: the name exists but nothing is free right now.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::NoFreeInstance { .. } | Self::ResourceBusy(_))
    }
}

// ── Registration types ────────────────────────────────────────

type Factory = Arc<dyn Fn() -> Result<Instance, AlgorithmError> + Send + Sync>;

/// How to build an algorithm, how many clones may run at once, and which
/// shared resources each execution needs.
#[derive(Clone)]
pub struct AlgorithmSpec {
    name: String,
    cardinality: usize,
    resources: Vec<String>,
    factory: Factory,
}

impl AlgorithmSpec {
    /// Cardinality defaults to 1 (one non-reentrant instance).
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn() -> Result<Instance, AlgorithmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            cardinality: 1,
            resources: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn blocking<A, F>(name: impl Into<String>, make: F) -> Self
    where
        A: Algorithm + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::new(name, move || Ok(Instance::blocking(make())))
    }

    pub fn suspendable<A, F>(name: impl Into<String>, make: F) -> Self
    where
        A: AsyncAlgorithm + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::new(name, move || Ok(Instance::suspendable(make())))
    }

    /// Maximum concurrent clones; 0 means one shared, reentrant instance.
    pub fn with_cardinality(mut self, cardinality: usize) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        if !self.resources.contains(&resource) {
            self.resources.push(resource);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    fn apply(&mut self, o: &AlgorithmOverride) {
        if let Some(c) = o.cardinality {
            self.cardinality = c;
        }
        if let Some(r) = &o.resources {
            self.resources = r.clone();
        }
    }

    fn build(&self) -> Result<Instance, AlgorithmError> {
        (self.factory)()
    }
}

impl std::fmt::Debug for AlgorithmSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmSpec")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("resources", &self.resources)
            .finish()
    }
}

/// A named, ordered group of algorithms and nested sequences.
///
/// A view node is never run as part of the main event; its algorithms run
/// only inside views scheduled against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    name: String,
    members: Vec<String>,
    view_node: bool,
}

impl Sequence {
    pub fn new<S: Into<String>>(name: impl Into<String>, members: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
            view_node: false,
        }
    }

    pub fn view_node(mut self) -> Self {
        self.view_node = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn is_view_node(&self) -> bool {
        self.view_node
    }
}

// ── Pool ──────────────────────────────────────────────────────

/// Called after every release; returning false unregisters it.
type ReleaseListener = Box<dyn Fn() -> bool + Send + Sync>;

pub struct ResourcePool {
    ledger: Mutex<Ledger>,
    freed: Condvar,
    listeners: Mutex<Vec<ReleaseListener>>,
    lifecycle: Mutex<Lifecycle>,
    overrides: HashMap<String, AlgorithmOverride>,
    fixer: PathFixer,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourcePool {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            freed: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::new()),
            overrides: HashMap::new(),
            fixer: PathFixer::new("", eventide_dataflow::path::DEFAULT_ROOT),
        }
    }

    /// A pool applying the per-algorithm overrides and the data-path
    /// settings of `config`.
    pub fn from_config(config: &FrameworkConfig) -> Self {
        Self {
            overrides: config.algorithms.clone(),
            fixer: PathFixer::new(&config.data.root_in_store, &config.data.root_name),
            ..Self::new()
        }
    }

    /// Relocates every declared key when an instance is built.
    pub fn path_fixer(&self) -> &PathFixer {
        &self.fixer
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, Ledger>, PoolError> {
        self.ledger
            .lock()
            .map_err(|e| PoolError::LockPoisoned(format!("pool ledger: {e}")))
    }

    fn lock_lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>, PoolError> {
        self.lifecycle
            .lock()
            .map_err(|e| PoolError::LockPoisoned(format!("pool lifecycle: {e}")))
    }

    pub fn fsm_state(&self) -> State {
        self.lock_lifecycle().map_or(State::Offline, |l| l.state())
    }

    pub fn target_fsm_state(&self) -> State {
        self.lock_lifecycle().map_or(State::Offline, |l| l.target_state())
    }

    fn ensure_configurable(&self, operation: &'static str) -> Result<(), PoolError> {
        match self.fsm_state() {
            State::Offline | State::Configured => Ok(()),
            state => Err(PoolError::WrongState { operation, state }),
        }
    }

    // ── Registration ──────────────────────────────────────────

    /// Register an algorithm. Configured overrides replace the cardinality
    /// and resources declared in code.
    pub fn add_algorithm(&self, mut spec: AlgorithmSpec) -> Result<(), PoolError> {
        self.ensure_configurable("register algorithms")?;
        if let Some(o) = self.overrides.get(spec.name()) {
            spec.apply(o);
        }
        let mut ledger = self.lock_ledger()?;
        if ledger.contains(spec.name()) {
            return Err(PoolError::Duplicate(spec.name().to_string()));
        }
        for r in spec.resources() {
            ledger.resources.entry(r.clone()).or_insert(false);
        }
        info!(
            algorithm = %spec.name(),
            cardinality = spec.cardinality(),
            resources = ?spec.resources(),
            "registered algorithm"
        );
        ledger.order.push(spec.name().to_string());
        ledger.algorithms.insert(
            spec.name().to_string(),
            Entry {
                spec,
                clones: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn add_sequence(&self, sequence: Sequence) -> Result<(), PoolError> {
        self.ensure_configurable("register sequences")?;
        let mut ledger = self.lock_ledger()?;
        if ledger.contains(sequence.name()) {
            return Err(PoolError::Duplicate(sequence.name().to_string()));
        }
        ledger.order.push(sequence.name().to_string());
        ledger.sequences.insert(sequence.name().to_string(), sequence);
        Ok(())
    }

    /// Register a resource that no algorithm declares, for direct
    /// [`acquire_resource`](Self::acquire_resource) use.
    pub fn add_resource(&self, name: impl Into<String>) -> Result<(), PoolError> {
        self.lock_ledger()?.resources.entry(name.into()).or_insert(false);
        Ok(())
    }

    // ── Acquisition ───────────────────────────────────────────

    /// Lease an instance of `name` together with its declared resources.
    ///
    /// Without `blocking`, contention comes back as an error for which
    /// [`PoolError::is_contention`] holds and the ledger is unchanged.
    pub fn acquire_algorithm(&self, name: &str, blocking: bool) -> Result<Instance, PoolError> {
        let state = self.fsm_state();
        if !matches!(state, State::Initialized | State::Running) {
            return Err(PoolError::WrongState {
                operation: "acquire algorithms",
                state,
            });
        }
        let mut ledger = self.lock_ledger()?;
        loop {
            match ledger.try_acquire(name, state, &self.fixer) {
                Err(e) if blocking && e.is_contention() => {
                    debug!(algorithm = %name, reason = %e, "waiting for instance");
                    ledger = self
                        .freed
                        .wait(ledger)
                        .map_err(|e| PoolError::LockPoisoned(format!("pool ledger: {e}")))?;
                }
                other => return other,
            }
        }
    }

    pub fn release_algorithm(&self, name: &str, instance: &Instance) -> Result<(), PoolError> {
        self.lock_ledger()?.release(name, instance)?;
        self.notify_released();
        Ok(())
    }

    pub fn acquire_resource(&self, name: &str, blocking: bool) -> Result<(), PoolError> {
        let mut ledger = self.lock_ledger()?;
        loop {
            match ledger.try_acquire_resource(name) {
                Err(e) if blocking && e.is_contention() => {
                    debug!(resource = %name, "waiting for resource");
                    ledger = self
                        .freed
                        .wait(ledger)
                        .map_err(|e| PoolError::LockPoisoned(format!("pool ledger: {e}")))?;
                }
                other => return other,
            }
        }
    }

    /// Releasing a resource that is not held is reported, never counted.
    pub fn release_resource(&self, name: &str) -> Result<(), PoolError> {
        self.lock_ledger()?.release_resource(name)?;
        self.notify_released();
        Ok(())
    }

    /// Register a callback run after every release, for callers that poll
    /// with non-blocking acquisition instead of waiting. It stays registered
    /// while it returns true.
    pub fn on_release(&self, listener: impl Fn() -> bool + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    fn notify_released(&self) {
        self.freed.notify_all();
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|listener| listener());
    }

    pub fn is_resource_busy(&self, name: &str) -> Result<bool, PoolError> {
        self.lock_ledger()?
            .resources
            .get(name)
            .copied()
            .ok_or_else(|| PoolError::UnknownResource(name.to_string()))
    }

    // ── Enumeration ───────────────────────────────────────────

    /// Every registered algorithm, in registration order.
    pub fn get_flat_alg_list(&self) -> Result<Vec<String>, PoolError> {
        let ledger = self.lock_ledger()?;
        Ok(ledger
            .order
            .iter()
            .filter(|n| ledger.algorithms.contains_key(*n))
            .cloned()
            .collect())
    }

    /// Algorithms and sequences not owned by any sequence.
    pub fn get_top_alg_list(&self) -> Result<Vec<String>, PoolError> {
        let ledger = self.lock_ledger()?;
        Ok(ledger
            .order
            .iter()
            .filter(|n| ledger.parent_of(n).is_none())
            .cloned()
            .collect())
    }

    pub fn sequences(&self) -> Result<Vec<Sequence>, PoolError> {
        let ledger = self.lock_ledger()?;
        Ok(ledger
            .order
            .iter()
            .filter_map(|n| ledger.sequences.get(n))
            .cloned()
            .collect())
    }

    /// Algorithms reachable from `name` through nested sequences.
    pub fn algorithms_under(&self, name: &str) -> Result<Vec<String>, PoolError> {
        let mut out = Vec::new();
        self.lock_ledger()?.flatten(name, &mut out)?;
        Ok(out)
    }

    /// The nearest enclosing view node of `name`, if any.
    pub fn view_node_of(&self, name: &str) -> Result<Option<String>, PoolError> {
        let ledger = self.lock_ledger()?;
        let mut current = name.to_string();
        for _ in 0..=ledger.order.len() {
            match ledger.parent_of(&current) {
                Some(seq) if seq.is_view_node() => return Ok(Some(seq.name().to_string())),
                Some(seq) => current = seq.name().to_string(),
                None => return Ok(None),
            }
        }
        Err(PoolError::Sequence {
            sequence: current,
            reason: "sequence nesting is cyclic".into(),
        })
    }

    pub fn cardinality(&self, name: &str) -> Result<usize, PoolError> {
        self.lock_ledger()?
            .algorithms
            .get(name)
            .map(|e| e.spec.cardinality())
            .ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))
    }

    /// Number of instances built so far for `name`.
    pub fn instance_count(&self, name: &str) -> Result<usize, PoolError> {
        self.lock_ledger()?
            .algorithms
            .get(name)
            .map(|e| e.clones.len())
            .ok_or_else(|| PoolError::UnknownAlgorithm(name.to_string()))
    }

    /// The first instance of every algorithm, in registration order. These
    /// carry the dependency declarations the data-flow graph is built from.
    pub fn representatives(&self) -> Result<Vec<(String, Instance)>, PoolError> {
        let ledger = self.lock_ledger()?;
        Ok(ledger
            .order
            .iter()
            .filter_map(|n| ledger.algorithms.get(n).map(|e| (n, e)))
            .filter_map(|(n, e)| e.clones.first().map(|c| (n.clone(), c.instance.clone())))
            .collect())
    }

    // ── Lifecycle ─────────────────────────────────────────────

    fn transition(
        &self,
        transition: Transition,
        hook: impl FnOnce(&mut Ledger, State) -> Result<(), PoolError>,
    ) -> Result<State, PoolError> {
        let target = self.lock_lifecycle()?.begin(transition)?;
        info!(transition = %transition, target = %target, "pool transition");
        let result = self.lock_ledger().and_then(|mut l| hook(&mut *l, target));
        let mut lifecycle = self.lock_lifecycle()?;
        match result {
            Ok(()) => {
                lifecycle.commit();
                Ok(target)
            }
            Err(e) => {
                warn!(transition = %transition, error = %e, "pool transition failed");
                lifecycle.abort();
                Err(e)
            }
        }
    }

    /// Close registration after checking every sequence member exists and
    /// belongs to exactly one sequence.
    pub fn configure(&self) -> Result<State, PoolError> {
        self.transition(Transition::Configure, |ledger, _| validate_sequences(ledger))
    }

    /// Build the first instance of every algorithm and initialize it.
    pub fn initialize(&self) -> Result<State, PoolError> {
        let fixer = self.fixer.clone();
        self.transition(Transition::Initialize, |ledger, target| {
            let names = ledger.order.clone();
            for name in names {
                let Some(entry) = ledger.algorithms.get_mut(&name) else {
                    continue;
                };
                if entry.clones.is_empty() {
                    ledger.spawn_clone(&name, target, &fixer)?;
                } else {
                    for clone in &mut entry.clones {
                        drive(&name, clone, target)?;
                    }
                }
            }
            Ok(())
        })
    }

    pub fn start(&self) -> Result<State, PoolError> {
        self.transition(Transition::Start, drive_all)
    }

    /// Fails while any instance is still leased.
    pub fn stop(&self) -> Result<State, PoolError> {
        self.transition(Transition::Stop, |ledger, target| {
            let leased: usize = ledger.algorithms.values().map(Entry::leased).sum();
            if leased > 0 {
                return Err(PoolError::InUse(leased));
            }
            drive_all(ledger, target)
        })
    }

    pub fn finalize(&self) -> Result<State, PoolError> {
        self.transition(Transition::Finalize, drive_all)
    }

    /// Drop every instance.
    pub fn terminate(&self) -> Result<State, PoolError> {
        self.transition(Transition::Terminate, |ledger, target| {
            drive_all(ledger, target)?;
            for entry in ledger.algorithms.values_mut() {
                entry.clones.clear();
            }
            Ok(())
        })
    }

    /// Configure and initialize in one step, from whatever state below
    /// INITIALIZED the pool is in.
    pub fn bring_up(&self) -> Result<State, PoolError> {
        if self.fsm_state() == State::Offline {
            self.configure()?;
        }
        if self.fsm_state() == State::Configured {
            self.initialize()?;
        }
        Ok(self.fsm_state())
    }
}

fn drive_all(ledger: &mut Ledger, target: State) -> Result<(), PoolError> {
    for (name, entry) in ledger.algorithms.iter_mut() {
        for clone in &mut entry.clones {
            drive(name, clone, target)?;
        }
    }
    Ok(())
}

fn validate_sequences(ledger: &Ledger) -> Result<(), PoolError> {
    let mut parent: HashMap<&str, &str> = HashMap::new();
    for seq in ledger.order.iter().filter_map(|n| ledger.sequences.get(n)) {
        for member in seq.members() {
            if !ledger.contains(member) {
                return Err(PoolError::Sequence {
                    sequence: seq.name().to_string(),
                    reason: format!("unknown member '{member}'"),
                });
            }
            if let Some(other) = parent.insert(member.as_str(), seq.name()) {
                return Err(PoolError::Sequence {
                    sequence: seq.name().to_string(),
                    reason: format!("'{member}' is already a member of '{other}'"),
                });
            }
        }
    }
    // With one parent each, a cycle shows up as a walk longer than the
    // number of sequences.
    for start in ledger.sequences.keys() {
        let mut current = start.as_str();
        let mut steps = 0;
        while let Some(&p) = parent.get(current) {
            if p == start.as_str() || steps > ledger.sequences.len() {
                return Err(PoolError::Sequence {
                    sequence: start.clone(),
                    reason: "sequence nesting is cyclic".into(),
                });
            }
            current = p;
            steps += 1;
        }
    }
    Ok(())
}
