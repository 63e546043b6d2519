use std::sync::{Arc, OnceLock};
use std::time::Duration;

use eventide_compute::{
    Algorithm, AlgorithmError, AlgorithmSpec, Component, ResourcePool, Scheduler, SchedulerError,
    Sequence, ViewScheduler,
};
use eventide_core::{EventContext, State};
use eventide_dataflow::{DataHandleHolder, EventStore, HandleRegistry, ReadHandle, WriteHandle};

use crate::helpers::{Gauge, run_events, section, worker};

/// Opens one view of the "Regions" node per region it finds.
struct RegionSplitter {
    registry: HandleRegistry,
    hits: ReadHandle<u64>,
    views: Arc<OnceLock<ViewScheduler>>,
    regions: usize,
}

impl DataHandleHolder for RegionSplitter {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for RegionSplitter {}

impl Algorithm for RegionSplitter {
    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        self.hits.get(store)?;
        let views = self
            .views
            .get()
            .ok_or_else(|| AlgorithmError::View("no view scheduler".into()))?;
        for _ in 0..self.regions {
            views
                .schedule_event_view(ctx, "Regions", None)
                .map_err(|e| AlgorithmError::View(e.to_string()))?;
        }
        Ok(())
    }
}

/// Runs inside a view: records which sub-slot it served.
struct RegionFit {
    registry: HandleRegistry,
    hits: ReadHandle<u64>,
    fit: WriteHandle<u64>,
}

impl DataHandleHolder for RegionFit {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for RegionFit {}

impl Algorithm for RegionFit {
    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        let sub = ctx
            .sub_slot()
            .ok_or_else(|| AlgorithmError::failed("not running in a view"))?;
        let hits = *self.hits.get(store)?;
        self.fit.put(store, hits * 100 + sub as u64)?;
        Ok(())
    }
}

fn view_pool(regions: usize, views: &Arc<OnceLock<ViewScheduler>>) -> Arc<ResourcePool> {
    let pool = Arc::new(ResourcePool::new());
    pool.add_algorithm(worker("Raw", &[], Some("/Event/Hits"), Duration::ZERO, &Arc::default()))
        .unwrap();
    let views = Arc::clone(views);
    pool.add_algorithm(AlgorithmSpec::blocking("Splitter", move || {
        let registry = HandleRegistry::new("Splitter");
        RegionSplitter {
            hits: registry.declare_read("/Event/Hits").unwrap(),
            registry,
            views: Arc::clone(&views),
            regions,
        }
    }))
    .unwrap();
    pool.add_algorithm(
        AlgorithmSpec::blocking("RegionFit", || {
            let registry = HandleRegistry::new("RegionFit");
            RegionFit {
                hits: registry.declare_read("/Event/Hits").unwrap(),
                fit: registry.declare_write("/Event/Fit").unwrap(),
                registry,
            }
        })
        .with_cardinality(0),
    )
    .unwrap();
    pool.add_sequence(Sequence::new("Regions", ["RegionFit"]).view_node())
        .unwrap();
    pool
}

fn view_scheduler(regions: usize, slots: usize) -> Scheduler {
    let views = Arc::new(OnceLock::new());
    let scheduler = Scheduler::new(section(slots, 4), view_pool(regions, &views)).unwrap();
    assert!(views.set(scheduler.view_scheduler()).is_ok());
    scheduler.start().unwrap();
    scheduler
}

#[test]
fn view_node_algorithms_only_run_in_views() {
    let scheduler = view_scheduler(0, 2);
    let plan = scheduler.plan();
    assert_eq!(plan.main().len(), 2);
    assert_eq!(plan.view_node("Regions").map(<[_]>::len), Some(1));

    let done = run_events(&scheduler, 3);
    assert_eq!(done.len(), 3);
    for event in &done {
        assert!(event.status.is_success());
        assert!(event.views.is_empty());
        assert!(!event.store.contains(&"/Event/Fit".into()));
    }
    assert!(!scheduler.metrics().algorithms_executed.contains_key("RegionFit"));
}

#[test]
fn each_view_gets_a_sub_slot_and_its_own_store() {
    let scheduler = view_scheduler(3, 2);
    let done = run_events(&scheduler, 4);
    assert_eq!(done.len(), 4);

    for event in &done {
        assert!(event.status.is_success(), "{:?}", event.status);
        assert_eq!(event.views.len(), 3);
        // Products written inside a view stay in the view.
        assert!(!event.store.contains(&"/Event/Fit".into()));
        for (sub, (ctx, store)) in event.views.iter().enumerate() {
            assert_eq!(ctx.evt(), event.context.evt());
            assert_eq!(ctx.slot(), event.context.slot());
            assert_eq!(ctx.sub_slot(), Some(sub));
            // Hits come from the parent store; Raw writes 1.
            assert_eq!(*store.get::<u64>(&"/Event/Fit".into()).unwrap(), 100 + sub as u64);
        }
    }

    let metrics = scheduler.metrics();
    assert_eq!(metrics.views_scheduled, 12);
    assert_eq!(metrics.algorithms_executed["RegionFit"], 12);
}

#[test]
fn view_requests_are_validated() {
    let scheduler = view_scheduler(0, 2);
    let views = scheduler.view_scheduler();

    let err = views
        .schedule_event_view(&EventContext::new(1, 0), "Nowhere", None)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownViewNode(ref n) if n == "Nowhere"));

    let err = views
        .schedule_event_view(&EventContext::new(1, 0), "Regions", None)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotActive { slot: 0, event: 1 }));

    let err = views
        .schedule_event_view(&EventContext::for_event(1), "Regions", None)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidContext(_)));

    let mut nested = EventContext::new(1, 0);
    nested.set_sub_slot(0);
    let err = scheduler
        .schedule_event_view(&nested, "Regions", None)
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidContext(_)));
}

#[test]
fn main_event_cannot_depend_on_a_view_node() {
    let views = Arc::new(OnceLock::new());
    let pool = view_pool(1, &views);
    pool.add_algorithm(worker(
        "Summary",
        &["/Event/Fit"],
        None,
        Duration::ZERO,
        &Arc::<Gauge>::default(),
    ))
    .unwrap();
    let err = Scheduler::new(section(1, 1), Arc::clone(&pool)).unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, SchedulerError::Config(_)), "got: {msg}");
    assert!(msg.contains("Summary"), "got: {msg}");
    assert!(msg.contains("RegionFit"), "got: {msg}");
    assert!(msg.contains("Regions"), "got: {msg}");
    // The pool itself came up fine; only the plan was rejected.
    assert_eq!(pool.fsm_state(), State::Initialized);
}
