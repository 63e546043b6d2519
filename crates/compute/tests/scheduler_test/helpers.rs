use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eventide_compute::{
    Algorithm, AlgorithmError, AlgorithmSpec, Component, FinishedEvent, Scheduler, SchedulerError,
};
use eventide_core::{EventContext, SchedulerSection};
use eventide_dataflow::{DataHandleHolder, EventStore, HandleRegistry, ReadHandle, WriteHandle};

pub fn section(slots: usize, workers: usize) -> SchedulerSection {
    SchedulerSection {
        worker_threads: workers,
        event_slots: slots,
        async_threads: 2,
        ..Default::default()
    }
}

/// Run `events` events, topping the slots up whenever one frees.
pub fn run_events(scheduler: &Scheduler, events: u64) -> Vec<FinishedEvent> {
    let mut next = 0;
    let mut done = Vec::new();
    while next < events || scheduler.in_flight() > 0 {
        while next < events && scheduler.free_slots() > 0 {
            scheduler.push_new_event(EventContext::for_event(next)).unwrap();
            next += 1;
        }
        match scheduler.pop_finished_event() {
            Ok(event) => done.push(event),
            Err(SchedulerError::NoEventsInFlight) => {}
            Err(e) => panic!("pop failed: {e}"),
        }
    }
    done
}

/// Poll `cond` for up to two seconds.
pub fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Tracks how many callers are inside a section at once.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Reads `u64` inputs and writes their sum plus one, taking `work` to do so.
pub struct Worker {
    registry: HandleRegistry,
    inputs: Vec<ReadHandle<u64>>,
    output: Option<WriteHandle<u64>>,
    work: Duration,
    gauge: Arc<Gauge>,
}

impl DataHandleHolder for Worker {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for Worker {}

impl Algorithm for Worker {
    fn execute(&self, _ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        let mut sum = 0;
        for input in &self.inputs {
            sum += *input.get(store)?;
        }
        self.gauge.enter();
        std::thread::sleep(self.work);
        self.gauge.leave();
        if let Some(output) = &self.output {
            output.put(store, sum + 1)?;
        }
        Ok(())
    }
}

pub fn worker(
    name: &'static str,
    inputs: &'static [&'static str],
    output: Option<&'static str>,
    work: Duration,
    gauge: &Arc<Gauge>,
) -> AlgorithmSpec {
    let gauge = Arc::clone(gauge);
    AlgorithmSpec::blocking(name, move || {
        let registry = HandleRegistry::new(name);
        let inputs = inputs
            .iter()
            .map(|i| registry.declare_read::<u64>(*i).unwrap())
            .collect();
        let output = output.map(|o| registry.declare_write::<u64>(o).unwrap());
        Worker {
            registry,
            inputs,
            output,
            work,
            gauge: Arc::clone(&gauge),
        }
    })
}
