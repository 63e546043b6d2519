use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventide_compute::{OccupancySnapshot, ResourcePool, Scheduler, SlotState};
use eventide_core::EventContext;

use crate::helpers::{Gauge, run_events, section, wait_for, worker};

type Snapshots = Arc<Mutex<Vec<OccupancySnapshot>>>;

fn busy_scheduler(slots: usize) -> Scheduler {
    let gauge = Arc::new(Gauge::default());
    let pool = Arc::new(ResourcePool::new());
    let work = Duration::from_millis(3);
    pool.add_algorithm(worker("Unpack", &[], Some("/Event/Raw"), work, &gauge).with_cardinality(4))
        .unwrap();
    pool.add_algorithm(
        worker("Calibrate", &["/Event/Raw"], Some("/Event/Cal"), work, &gauge).with_cardinality(4),
    )
    .unwrap();
    let scheduler = Scheduler::new(section(slots, 4), pool).unwrap();
    scheduler.start().unwrap();
    scheduler
}

fn collector() -> (Snapshots, impl Fn(OccupancySnapshot) + Send + Sync + 'static) {
    let snapshots = Snapshots::default();
    let sink = Arc::clone(&snapshots);
    (snapshots, move |snap| sink.lock().unwrap().push(snap))
}

#[test]
fn zero_period_samples_every_change() {
    let scheduler = busy_scheduler(2);
    let (snapshots, callback) = collector();
    scheduler.record_occupancy(0, callback).unwrap();
    run_events(&scheduler, 6);

    // Each event causes at least admission plus two completions.
    assert!(wait_for(|| snapshots.lock().unwrap().len() >= 18));
    let snapshots = snapshots.lock().unwrap();
    assert!(snapshots.iter().all(|s| s.slots.len() == 2));
    assert!(snapshots.iter().any(|s| s.busy_slots() > 0));
    assert!(snapshots.iter().any(|s| s.running_algorithms() > 0));
    for snap in snapshots.iter() {
        for slot in &snap.slots {
            if slot.state == SlotState::Free {
                assert_eq!(slot.event, None);
                assert_eq!(slot.running, 0);
            } else {
                assert!(slot.event.is_some());
            }
        }
    }
}

#[test]
fn finished_but_unpopped_slots_show_as_finished() {
    let scheduler = busy_scheduler(2);
    let (snapshots, callback) = collector();
    scheduler.record_occupancy(0, callback).unwrap();
    scheduler.push_new_event(EventContext::for_event(5)).unwrap();

    let finished = |snaps: &Vec<OccupancySnapshot>| {
        snaps.iter().any(|s| {
            s.slots[0].state == SlotState::Finished && s.slots[0].event == Some(5)
        })
    };
    assert!(wait_for(|| finished(&*snapshots.lock().unwrap())));
    assert_eq!(scheduler.free_slots(), 1);
    scheduler.pop_finished_event().unwrap();
}

#[test]
fn long_period_throttles_sampling() {
    let scheduler = busy_scheduler(2);
    let (snapshots, callback) = collector();
    scheduler.record_occupancy(60_000, callback).unwrap();
    run_events(&scheduler, 4);
    assert!(wait_for(|| !snapshots.lock().unwrap().is_empty()));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(snapshots.lock().unwrap().len(), 1);
}

#[test]
fn negative_period_turns_sampling_off() {
    let scheduler = busy_scheduler(2);
    let (snapshots, callback) = collector();
    scheduler.record_occupancy(0, callback).unwrap();
    run_events(&scheduler, 2);
    scheduler.record_occupancy(-1, |_| {}).unwrap();

    // Let callbacks already handed off land before counting.
    std::thread::sleep(Duration::from_millis(100));
    let before = snapshots.lock().unwrap().len();
    assert!(before > 0);
    run_events(&scheduler, 3);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(snapshots.lock().unwrap().len(), before);
}
