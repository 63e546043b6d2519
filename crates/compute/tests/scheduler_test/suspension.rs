use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventide_compute::suspend::{sleep_for, yield_now};
use eventide_compute::{
    AlgorithmError, AlgorithmSpec, AsyncAlgorithm, Component, EventStatus, ResourcePool, Scheduler,
};
use eventide_core::{EventContext, current_context};
use eventide_dataflow::{DataHandleHolder, EventStore, HandleRegistry, WriteHandle};

use crate::helpers::{Gauge, run_events, section, worker};

/// Waits on "remote" data several times, checking its context after each
/// resume, then writes the event number.
struct Fetcher {
    registry: HandleRegistry,
    out: WriteHandle<u64>,
    rounds: usize,
}

impl DataHandleHolder for Fetcher {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for Fetcher {}

#[async_trait]
impl AsyncAlgorithm for Fetcher {
    async fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        for round in 0..self.rounds {
            if round % 2 == 0 {
                yield_now().await?;
            } else {
                sleep_for(Duration::from_millis(1)).await?;
            }
            let now = current_context()
                .ok_or_else(|| AlgorithmError::failed("context missing after resume"))?;
            if !now.same_coordinates(ctx) {
                return Err(AlgorithmError::failed(format!("resumed as {now}, expected {ctx}")));
            }
        }
        self.out.put(store, ctx.evt())?;
        Ok(())
    }
}

fn fetcher(rounds: usize) -> AlgorithmSpec {
    AlgorithmSpec::suspendable("Fetcher", move || {
        let registry = HandleRegistry::new("Fetcher");
        Fetcher {
            out: registry.declare_write("/Event/Remote").unwrap(),
            registry,
            rounds,
        }
    })
    .with_cardinality(0)
}

#[test]
fn asynchronous_algorithms_keep_their_context() {
    let pool = Arc::new(ResourcePool::new());
    pool.add_algorithm(fetcher(6)).unwrap();
    pool.add_algorithm(
        worker("Merge", &["/Event/Remote"], Some("/Event/Merged"), Duration::ZERO, &Arc::<Gauge>::default())
            .with_cardinality(4),
    )
    .unwrap();

    let scheduler = Scheduler::new(section(6, 2), pool).unwrap();
    scheduler.start().unwrap();
    let done = run_events(&scheduler, 24);

    assert_eq!(done.len(), 24);
    for event in &done {
        assert_eq!(event.status, EventStatus::Success);
        let remote = event.store.get::<u64>(&"/Event/Remote".into()).unwrap();
        assert_eq!(*remote, event.context.evt());
        let merged = event.store.get::<u64>(&"/Event/Merged".into()).unwrap();
        assert_eq!(*merged, event.context.evt() + 1);
    }
    assert_eq!(scheduler.metrics().algorithms_executed["Fetcher"], 24);
}

#[test]
fn asynchronous_failure_fails_the_event() {
    struct Refuser {
        registry: HandleRegistry,
    }

    impl DataHandleHolder for Refuser {
        fn registry(&self) -> &HandleRegistry {
            &self.registry
        }
    }

    impl Component for Refuser {}

    #[async_trait]
    impl AsyncAlgorithm for Refuser {
        async fn execute(&self, _ctx: &EventContext, _store: &EventStore) -> Result<(), AlgorithmError> {
            yield_now().await?;
            Err(AlgorithmError::failed("remote said no"))
        }
    }

    let pool = Arc::new(ResourcePool::new());
    pool.add_algorithm(AlgorithmSpec::suspendable("Refuser", || Refuser {
        registry: HandleRegistry::new("Refuser"),
    }))
    .unwrap();
    let scheduler = Scheduler::new(section(1, 1), pool).unwrap();
    scheduler.start().unwrap();
    scheduler.push_new_event(EventContext::for_event(1)).unwrap();
    let done = scheduler.pop_finished_event().unwrap();
    assert_eq!(
        done.status,
        EventStatus::Failed {
            algorithm: "Refuser".into(),
            reason: "Algorithm failed: remote said no".into(),
        }
    );
}
