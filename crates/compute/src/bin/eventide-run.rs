//! eventide-run: drive a small synthetic reconstruction chain through the
//! scheduler.
//!
//! Chain, per event:
//! - `Unpack` turns the preloaded raw seed into hits
//! - `Conditions` fetches a calibration gain (asynchronous, simulated latency)
//! - `Geometry` converts hits to positions while holding the `GeoLib` resource
//! - `Tracking` combines positions and gain, and opens one `Regions` view per
//!   detector region
//! - `RegionFit` runs inside each view
//!
//! Slots are kept full until `--events` events have finished; per-algorithm
//! metrics are printed as JSON at the end.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};

use eventide_compute::suspend::sleep_for;
use eventide_compute::{
    Algorithm, AlgorithmError, AlgorithmSpec, AsyncAlgorithm, Component, Instance, ResourcePool,
    Scheduler, SchedulerError, Sequence, ViewScheduler,
};
use eventide_core::{ConcurrencyFlags, EventContext, EventId, FrameworkConfig, load_dotenv};
use eventide_dataflow::{
    DataHandleHolder, DataObjID, DependencyError, EventStore, HandleRegistry, ReadHandle,
    WriteHandle,
};

const RAW: &str = "/Event/Raw";

// ── CLI ─────────────────────────────────────────────────────────────

/// Run synthetic events through the eventide scheduler.
#[derive(Parser, Debug)]
#[command(name = "eventide-run", version, about)]
struct Cli {
    /// Path to eventide.toml config file.
    #[arg(long, env = "EVENTIDE_CONFIG", default_value = "config/eventide.toml")]
    config: String,

    /// Number of events to process.
    #[arg(long, env = "EVENTIDE_EVENTS", default_value_t = 100)]
    events: u64,

    /// Occupancy sampling period in milliseconds (0 = every change, negative = off).
    #[arg(long, env = "EVENTIDE_OCCUPANCY_PERIOD_MS", default_value_t = -1, allow_negative_numbers = true)]
    occupancy_period_ms: i64,

    /// Run number stamped on every event.
    #[arg(long, default_value_t = 1)]
    run: u32,
}

// ── Algorithms ──────────────────────────────────────────────────────

struct Unpack {
    registry: HandleRegistry,
    raw: ReadHandle<u64>,
    hits: WriteHandle<Vec<u32>>,
}

impl DataHandleHolder for Unpack {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for Unpack {}

impl Algorithm for Unpack {
    fn execute(&self, _ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        let seed = *self.raw.get(store)?;
        // Cheap LCG, enough to vary hit counts between events.
        let mut x = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let count = 8 + (x % 24) as usize;
        let hits = (0..count)
            .map(|_| {
                x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
                (x >> 40) as u32 % 4096
            })
            .collect();
        self.hits.put(store, hits)?;
        Ok(())
    }
}

struct Conditions {
    registry: HandleRegistry,
    gain: WriteHandle<f64>,
    latency: Duration,
}

impl DataHandleHolder for Conditions {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for Conditions {}

#[async_trait]
impl AsyncAlgorithm for Conditions {
    async fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        sleep_for(self.latency).await?;
        let gain = 1.0 + (ctx.evt() % 7) as f64 * 0.01;
        self.gain.put(store, gain)?;
        Ok(())
    }
}

struct Geometry {
    registry: HandleRegistry,
    hits: ReadHandle<Vec<u32>>,
    positions: WriteHandle<Vec<f64>>,
}

impl DataHandleHolder for Geometry {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for Geometry {}

impl Algorithm for Geometry {
    fn execute(&self, _ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        let hits = self.hits.get(store)?;
        let positions = hits.iter().map(|h| f64::from(*h) * 0.25).collect();
        self.positions.put(store, positions)?;
        Ok(())
    }
}

struct Tracking {
    registry: HandleRegistry,
    positions: ReadHandle<Vec<f64>>,
    gain: ReadHandle<f64>,
    tracks: WriteHandle<usize>,
    views: Arc<OnceLock<ViewScheduler>>,
}

impl DataHandleHolder for Tracking {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for Tracking {}

impl Algorithm for Tracking {
    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        let positions = self.positions.get(store)?;
        let gain = *self.gain.get(store)?;
        let tracks = positions.iter().filter(|p| **p * gain > 512.0).count() / 2;
        self.tracks.put(store, tracks)?;

        let views = self
            .views
            .get()
            .ok_or_else(|| AlgorithmError::View("view scheduler not attached".into()))?;
        let regions = 1 + (ctx.evt() % 3) as usize;
        for _ in 0..regions {
            views
                .schedule_event_view(ctx, "Regions", None)
                .map_err(|e| AlgorithmError::View(e.to_string()))?;
        }
        Ok(())
    }
}

struct RegionFit {
    registry: HandleRegistry,
    positions: ReadHandle<Vec<f64>>,
    fit: WriteHandle<f64>,
}

impl DataHandleHolder for RegionFit {
    fn registry(&self) -> &HandleRegistry {
        &self.registry
    }
}

impl Component for RegionFit {}

impl Algorithm for RegionFit {
    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<(), AlgorithmError> {
        let positions = self.positions.get(store)?;
        let region = ctx.sub_slot().unwrap_or_default();
        let selected: Vec<f64> = positions
            .iter()
            .skip(region)
            .step_by(3)
            .copied()
            .collect();
        let mean = if selected.is_empty() {
            0.0
        } else {
            selected.iter().sum::<f64>() / selected.len() as f64
        };
        self.fit.put(store, mean)?;
        Ok(())
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

fn declare_failed(e: DependencyError) -> AlgorithmError {
    AlgorithmError::failed(e.to_string())
}

fn register(pool: &ResourcePool, views: &Arc<OnceLock<ViewScheduler>>) -> Result<(), SchedulerError> {
    pool.add_algorithm(
        AlgorithmSpec::new("Unpack", || {
            let registry = HandleRegistry::new("Unpack");
            Ok(Instance::blocking(Unpack {
                raw: registry.declare_read(RAW).map_err(declare_failed)?,
                hits: registry.declare_write("/Event/Hits").map_err(declare_failed)?,
                registry,
            }))
        })
        .with_cardinality(2),
    )?;
    pool.add_algorithm(
        AlgorithmSpec::new("Conditions", || {
            let registry = HandleRegistry::new("Conditions");
            let gain = registry.declare_write("/Event/Gain").map_err(declare_failed)?;
            Ok(Instance::suspendable(Conditions {
                registry,
                gain,
                latency: Duration::from_millis(2),
            }))
        })
        .with_cardinality(0),
    )?;
    pool.add_algorithm(
        AlgorithmSpec::new("Geometry", || {
            let registry = HandleRegistry::new("Geometry");
            let hits = registry.declare_read("/Event/Hits").map_err(declare_failed)?;
            let positions = registry
                .declare_write("/Event/Positions")
                .map_err(declare_failed)?;
            Ok(Instance::blocking(Geometry {
                registry,
                hits,
                positions,
            }))
        })
        .with_cardinality(4)
        .with_resource("GeoLib"),
    )?;
    let views = Arc::clone(views);
    pool.add_algorithm(AlgorithmSpec::new("Tracking", move || {
        let registry = HandleRegistry::new("Tracking");
        Ok(Instance::blocking(Tracking {
            positions: registry.declare_read("/Event/Positions").map_err(declare_failed)?,
            gain: registry.declare_read("/Event/Gain").map_err(declare_failed)?,
            tracks: registry.declare_write("/Event/Tracks").map_err(declare_failed)?,
            views: Arc::clone(&views),
            registry,
        }))
    }))?;
    pool.add_algorithm(
        AlgorithmSpec::new("RegionFit", || {
            let registry = HandleRegistry::new("RegionFit");
            Ok(Instance::blocking(RegionFit {
                positions: registry.declare_read("/Event/Positions").map_err(declare_failed)?,
                fit: registry.declare_write("/Event/RegionFit").map_err(declare_failed)?,
                registry,
            }))
        })
        .with_cardinality(0),
    )?;
    pool.add_sequence(Sequence::new("Regions", ["RegionFit"]).view_node())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load config (fall back to defaults if file not found)
    let mut config = match FrameworkConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded eventide config");
            cfg
        }
        Err(e) => {
            warn!(error = %e, path = %cli.config, "failed to load config, using defaults");
            let mut cfg = FrameworkConfig::default();
            cfg.apply_env_overrides();
            cfg.validate()?;
            cfg
        }
    };
    if !config.scheduler.preloaded.iter().any(|p| p == RAW) {
        config.scheduler.preloaded.push(RAW.to_string());
    }
    config.log_summary();
    ConcurrencyFlags::install(config.scheduler.concurrency_flags())?;

    let pool = Arc::new(ResourcePool::from_config(&config));
    let views = Arc::new(OnceLock::new());
    register(&pool, &views)?;
    info!(top = ?pool.get_top_alg_list()?, flat = ?pool.get_flat_alg_list()?, "algorithms registered");

    let scheduler = Scheduler::new(config.scheduler.clone(), Arc::clone(&pool))?;
    if views.set(scheduler.view_scheduler()).is_err() {
        anyhow::bail!("view scheduler attached twice");
    }
    scheduler.start()?;

    if cli.occupancy_period_ms >= 0 {
        scheduler.record_occupancy(cli.occupancy_period_ms, |snap| {
            info!(
                busy = snap.busy_slots(),
                running = snap.running_algorithms(),
                slots = snap.slots.len(),
                "occupancy"
            );
        })?;
    }

    let started = Instant::now();
    let raw = pool.path_fixer().fix_id(&DataObjID::new(RAW));
    let mut next = 0;
    let (mut succeeded, mut failed) = (0u64, 0u64);
    while next < cli.events || scheduler.in_flight() > 0 {
        while next < cli.events && scheduler.free_slots() > 0 {
            let mut ctx = EventContext::for_event(next);
            ctx.set_event_id(EventId::new(cli.run, next));
            scheduler.push_new_event_with(ctx, |store| store.put(&raw, next ^ 0x5eed))?;
            next += 1;
        }
        let done = scheduler.pop_finished_event()?;
        if done.status.is_success() {
            succeeded += 1;
        } else {
            failed += 1;
            warn!(event = done.context.evt(), status = ?done.status, "event failed");
        }
    }
    let elapsed = started.elapsed();

    info!(
        events = cli.events,
        succeeded,
        failed,
        elapsed_ms = elapsed.as_millis() as u64,
        "run complete"
    );
    scheduler.stop()?;

    println!("{}", serde_json::to_string_pretty(&scheduler.metrics())?);
    Ok(())
}
