//! End-to-end scenarios that run an engine until its queue drains.
//!
//! Scenarios use a [`MemoryQueueStore`] and the engine's background worker,
//! so they need a tokio runtime. Run them with paused time to keep long
//! backoffs and circuit timeouts instant.

use offsync_engine::{EngineConfig, HealthReport, RemoteBoundary, SyncEngine, SyncMetrics};
use offsync_protocol::{Action, MutationKind};
use offsync_store::MemoryQueueStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const KINDS: [MutationKind; 5] = [
    MutationKind::Session,
    MutationKind::Answer,
    MutationKind::Statistics,
    MutationKind::Progress,
    MutationKind::PinOperation,
];

/// What a scenario run observed.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Items enqueued.
    pub enqueued: usize,
    /// True if the queue drained before the timeout.
    pub flushed: bool,
    /// Items left in the dead-letter set.
    pub dead_letters: usize,
    /// Engine metrics at the end of the run.
    pub metrics: SyncMetrics,
    /// Engine health at the end of the run.
    pub health: HealthReport,
    /// Time from the first enqueue until the queue drained or the timeout hit.
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Enqueued: {}", self.enqueued);
        println!("Flushed: {}", self.flushed);
        println!("Delivered: {}", self.metrics.successes);
        println!("Dead letters: {}", self.dead_letters);
        println!("Success rate: {:.2}%", self.metrics.success_rate);
        println!("Circuit trips: {}", self.metrics.circuit_trips);
        println!("Health: {}", self.health.status);
        println!("Elapsed: {:?}", self.elapsed);
    }
}

/// Enqueues a batch of items against a remote and waits for the queue to drain.
#[derive(Debug, Clone)]
pub struct Scenario {
    items: usize,
    config: EngineConfig,
    timeout: Duration,
}

impl Scenario {
    /// Creates a scenario with `items` items and the default engine configuration.
    pub fn new(items: usize) -> Self {
        Self {
            items,
            config: EngineConfig::default(),
            timeout: Duration::from_secs(3600),
        }
    }

    /// Sets the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how long to wait for the queue to drain.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the scenario against `remote`.
    ///
    /// Payloads are the item's index as big-endian `u32`; kinds rotate
    /// through the built-in mutation kinds.
    pub async fn run<R: RemoteBoundary>(&self, remote: R) -> ScenarioReport {
        let store = Arc::new(MemoryQueueStore::new());
        let engine = SyncEngine::builder(remote, Arc::clone(&store))
            .config(self.config.clone())
            .start()
            .expect("Scenario must run inside a tokio runtime");

        let started = Instant::now();
        for i in 0..self.items {
            let kind = KINDS[i % KINDS.len()].clone();
            let index = u32::try_from(i).unwrap_or(u32::MAX);
            engine
                .enqueue(kind, Action::Create, index.to_be_bytes().to_vec())
                .expect("Failed to enqueue");
        }

        let flushed = engine.wait_until_empty(self.timeout).await.is_ok();
        let elapsed = started.elapsed();
        let dead_letters = engine
            .dead_letter_items()
            .expect("Failed to read dead letters")
            .len();
        let report = ScenarioReport {
            enqueued: self.items,
            flushed,
            dead_letters,
            metrics: engine.metrics(),
            health: engine.health_status(),
            elapsed,
        };
        engine.shutdown().await;
        report
    }
}
