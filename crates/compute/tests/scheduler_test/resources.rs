use std::sync::Arc;
use std::time::Duration;

use eventide_compute::ResourcePool;
use eventide_compute::Scheduler;
use eventide_core::{ConcurrencyFlags, EventContext};

use crate::helpers::{Gauge, run_events, section, worker};

#[test]
fn shared_resource_serializes_its_users() {
    let gauge = Arc::new(Gauge::default());
    let pool = Arc::new(ResourcePool::new());
    let work = Duration::from_millis(2);
    pool.add_algorithm(
        worker("Geometry", &[], Some("/Event/Geo"), work, &gauge)
            .with_cardinality(4)
            .with_resource("GeoLib"),
    )
    .unwrap();
    pool.add_algorithm(
        worker("Material", &[], Some("/Event/Mat"), work, &gauge)
            .with_cardinality(4)
            .with_resource("GeoLib"),
    )
    .unwrap();

    let scheduler = Scheduler::new(section(4, 4), Arc::clone(&pool)).unwrap();
    scheduler.start().unwrap();
    let done = run_events(&scheduler, 8);

    assert!(done.iter().all(|e| e.status.is_success()));
    assert_eq!(gauge.total(), 16);
    assert_eq!(gauge.peak(), 1);
    assert!(!pool.is_resource_busy("GeoLib").unwrap());
}

#[test]
fn cardinality_caps_concurrent_instances() {
    let gauge = Arc::new(Gauge::default());
    let pool = Arc::new(ResourcePool::new());
    pool.add_algorithm(
        worker("Tracker", &[], Some("/Event/Tracks"), Duration::from_millis(3), &gauge)
            .with_cardinality(2),
    )
    .unwrap();

    let scheduler = Scheduler::new(section(4, 4), Arc::clone(&pool)).unwrap();
    scheduler.start().unwrap();
    let done = run_events(&scheduler, 10);

    assert_eq!(done.len(), 10);
    assert_eq!(gauge.total(), 10);
    assert!(gauge.peak() <= 2, "peak {}", gauge.peak());
    assert!(pool.instance_count("Tracker").unwrap() <= 2);
    assert_eq!(scheduler.metrics().algorithms_executed["Tracker"], 10);
}

#[test]
fn independent_events_overlap() {
    let gauge = Arc::new(Gauge::default());
    let pool = Arc::new(ResourcePool::new());
    pool.add_algorithm(
        worker("Slow", &[], None, Duration::from_millis(50), &gauge).with_cardinality(0),
    )
    .unwrap();

    let scheduler = Scheduler::new(section(4, 4), pool).unwrap();
    scheduler.start().unwrap();
    run_events(&scheduler, 4);
    assert!(gauge.peak() >= 2, "peak {}", gauge.peak());
}

#[test]
fn resource_released_outside_the_scheduler_resumes_waiting_events() {
    let gauge = Arc::new(Gauge::default());
    let pool = Arc::new(ResourcePool::new());
    pool.add_algorithm(
        worker("Geometry", &[], Some("/Event/Geo"), Duration::from_millis(1), &gauge)
            .with_resource("GeoLib"),
    )
    .unwrap();
    let scheduler = Scheduler::new(section(1, 2), Arc::clone(&pool)).unwrap();
    scheduler.start().unwrap();

    pool.acquire_resource("GeoLib", false).unwrap();
    scheduler.push_new_event(EventContext::for_event(1)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(scheduler.try_pop_finished_event().unwrap().is_none());
    assert_eq!(gauge.total(), 0);

    pool.release_resource("GeoLib").unwrap();
    let mut popped = None;
    for _ in 0..400 {
        popped = scheduler.try_pop_finished_event().unwrap();
        if popped.is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let done = popped.expect("event stalled after the resource was released");
    assert!(done.status.is_success());
    assert_eq!(gauge.total(), 1);
}

#[test]
fn scheduler_publishes_process_concurrency() {
    let pool = Arc::new(ResourcePool::new());
    let _scheduler = Scheduler::new(section(3, 2), pool).unwrap();

    // Whichever scheduler in this binary came first installed the flags.
    assert!(ConcurrencyFlags::is_installed());
    let flags = ConcurrencyFlags::global();
    assert!(flags.concurrent());
    assert!(flags.num_concurrent_events > 0);
    assert_eq!(flags.num_processes, 0);
}
