//! Sync telemetry: event log, counters, latency and health scoring.
//!
//! The collector only observes. Nothing in the engine reads it to make a
//! decision, so a misconfigured collector can skew reports but never
//! delivery.

use crate::config::TelemetryConfig;
use offsync_protocol::{ItemId, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Category of a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    /// An item entered the queue.
    Enqueued,
    /// An item was delivered.
    Success,
    /// A delivery attempt failed.
    Failure,
    /// A failed item was scheduled for another attempt.
    Retry,
    /// An item moved to the dead-letter set.
    DeadLetter,
    /// Local and remote versions of a record differed.
    Conflict,
    /// The circuit breaker opened.
    CircuitOpened,
    /// The circuit breaker closed after a successful probe.
    CircuitClosed,
    /// The remote rejected the credentials.
    ReauthRequired,
    /// The queue store failed.
    StorageError,
    /// The queue drained completely.
    QueueEmptied,
}

impl fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncEventKind::Enqueued => "enqueued",
            SyncEventKind::Success => "success",
            SyncEventKind::Failure => "failure",
            SyncEventKind::Retry => "retry",
            SyncEventKind::DeadLetter => "dead_letter",
            SyncEventKind::Conflict => "conflict",
            SyncEventKind::CircuitOpened => "circuit_opened",
            SyncEventKind::CircuitClosed => "circuit_closed",
            SyncEventKind::ReauthRequired => "reauth_required",
            SyncEventKind::StorageError => "storage_error",
            SyncEventKind::QueueEmptied => "queue_emptied",
        })
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    /// Event category.
    pub kind: SyncEventKind,
    /// Item the event concerns, if any.
    pub item_id: Option<ItemId>,
    /// Free-form description.
    pub details: String,
    /// Error message, for failures.
    pub error: Option<String>,
    /// Wall-clock time of the event.
    pub timestamp: Timestamp,
    /// Monotonic time of the event.
    pub at: Instant,
}

impl SyncEvent {
    /// Creates an event stamped with the current time.
    pub fn new(kind: SyncEventKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            item_id: None,
            details: details.into(),
            error: None,
            timestamp: Timestamp::now(),
            at: Instant::now(),
        }
    }

    /// Attaches the item the event concerns.
    pub fn with_item(mut self, id: ItemId) -> Self {
        self.item_id = Some(id);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Latency percentiles over the sample window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LatencyPercentiles {
    /// Median latency.
    pub p50: Duration,
    /// 95th percentile.
    pub p95: Duration,
    /// 99th percentile.
    pub p99: Duration,
    /// Samples the percentiles were computed from.
    pub samples: usize,
}

/// Queue backlog statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QueueSizeStats {
    /// Most recent backlog.
    pub current: usize,
    /// Largest backlog seen.
    pub peak: usize,
    /// Mean over the sample window.
    pub average: f64,
}

/// Derived sync metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMetrics {
    /// Delivery attempts (successes plus failures).
    pub attempts: u64,
    /// Delivered items.
    pub successes: u64,
    /// Failed attempts.
    pub failures: u64,
    /// Resolutions where the versions differed.
    pub conflicts: u64,
    /// Items scheduled for another attempt.
    pub retries: u64,
    /// Items moved to the dead-letter set.
    pub dead_letters: u64,
    /// Times the circuit opened.
    pub circuit_trips: u64,
    /// Latency percentiles.
    pub latency: LatencyPercentiles,
    /// Successes per attempt, in percent. 100 when nothing was attempted.
    pub success_rate: f64,
    /// Deliveries per minute over the throughput window.
    pub throughput_per_minute: f64,
    /// Queue backlog statistics.
    pub queue: QueueSizeStats,
    /// Wall-clock time of the last delivery.
    pub last_success_at: Option<Timestamp>,
}

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Everything within thresholds.
    Healthy,
    /// Working, but slower or less reliable than it should be.
    Degraded,
    /// Not delivering.
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

/// Health status with the reasons behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Worst status of all rules.
    pub status: HealthStatus,
    /// One recommendation per rule that fired.
    pub recommendations: Vec<String>,
    /// Success rate at the time of the report.
    pub success_rate: f64,
    /// Backlog the report was computed for.
    pub backlog: usize,
    /// Whether the circuit was open.
    pub circuit_open: bool,
}

#[derive(Debug)]
struct TelemetryState {
    events: VecDeque<SyncEvent>,
    latencies: VecDeque<Duration>,
    queue_sizes: VecDeque<usize>,
    success_times: VecDeque<Instant>,
    attempts: u64,
    successes: u64,
    failures: u64,
    conflicts: u64,
    retries: u64,
    dead_letters: u64,
    circuit_trips: u64,
    current_queue: usize,
    peak_queue: usize,
    last_success: Option<(Instant, Timestamp)>,
    started_at: Instant,
}

impl TelemetryState {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            latencies: VecDeque::new(),
            queue_sizes: VecDeque::new(),
            success_times: VecDeque::new(),
            attempts: 0,
            successes: 0,
            failures: 0,
            conflicts: 0,
            retries: 0,
            dead_letters: 0,
            circuit_trips: 0,
            current_queue: 0,
            peak_queue: 0,
            last_success: None,
            started_at: Instant::now(),
        }
    }

    fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            100.0
        } else {
            self.successes as f64 / self.attempts as f64 * 100.0
        }
    }

    fn prune_success_times(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.success_times.front() {
            if now.saturating_duration_since(*front) > window {
                self.success_times.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Records sync events and derives metrics and health from them.
///
/// Safe to share between the engine and any number of readers.
#[derive(Debug)]
pub struct TelemetryCollector {
    config: TelemetryConfig,
    state: Mutex<TelemetryState>,
}

impl TelemetryCollector {
    /// Creates an empty collector.
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TelemetryState::new()),
        }
    }

    /// Returns the collector's configuration.
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Records an event of `kind`.
    pub fn record_event(
        &self,
        kind: SyncEventKind,
        details: impl Into<String>,
        error: Option<String>,
    ) {
        let mut event = SyncEvent::new(kind, details);
        event.error = error;
        self.record(event);
    }

    /// Records a prepared event.
    pub fn record(&self, event: SyncEvent) {
        let mut state = self.state.lock();
        match event.kind {
            SyncEventKind::Success => {
                state.attempts += 1;
                state.successes += 1;
                state.last_success = Some((event.at, event.timestamp));
                state.success_times.push_back(event.at);
                state.prune_success_times(event.at, self.config.throughput_window);
            }
            SyncEventKind::Failure => {
                state.attempts += 1;
                state.failures += 1;
            }
            SyncEventKind::Retry => state.retries += 1,
            SyncEventKind::DeadLetter => state.dead_letters += 1,
            SyncEventKind::Conflict => state.conflicts += 1,
            SyncEventKind::CircuitOpened => state.circuit_trips += 1,
            SyncEventKind::Enqueued
            | SyncEventKind::CircuitClosed
            | SyncEventKind::ReauthRequired
            | SyncEventKind::StorageError
            | SyncEventKind::QueueEmptied => {}
        }

        if state.events.len() == self.config.max_events {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }

    /// Records the latency of a delivery.
    pub fn record_latency(&self, latency: Duration) {
        let mut state = self.state.lock();
        if state.latencies.len() == self.config.max_latency_samples {
            state.latencies.pop_front();
        }
        state.latencies.push_back(latency);
    }

    /// Records the current queue backlog.
    pub fn record_queue_size(&self, size: usize) {
        let mut state = self.state.lock();
        state.current_queue = size;
        state.peak_queue = state.peak_queue.max(size);
        if state.queue_sizes.len() == self.config.max_queue_samples {
            state.queue_sizes.pop_front();
        }
        state.queue_sizes.push_back(size);
    }

    /// Returns up to `limit` most recent events, oldest first.
    pub fn recent_events(&self, limit: usize) -> Vec<SyncEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    /// Computes the current metrics.
    pub fn metrics(&self) -> SyncMetrics {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.prune_success_times(now, self.config.throughput_window);

        let window_minutes = self.config.throughput_window.as_secs_f64() / 60.0;
        let throughput_per_minute = if window_minutes > 0.0 {
            state.success_times.len() as f64 / window_minutes
        } else {
            0.0
        };

        let average = if state.queue_sizes.is_empty() {
            0.0
        } else {
            state.queue_sizes.iter().sum::<usize>() as f64 / state.queue_sizes.len() as f64
        };

        SyncMetrics {
            attempts: state.attempts,
            successes: state.successes,
            failures: state.failures,
            conflicts: state.conflicts,
            retries: state.retries,
            dead_letters: state.dead_letters,
            circuit_trips: state.circuit_trips,
            latency: percentiles(state.latencies.iter().copied().collect()),
            success_rate: state.success_rate(),
            throughput_per_minute,
            queue: QueueSizeStats {
                current: state.current_queue,
                peak: state.peak_queue,
                average,
            },
            last_success_at: state.last_success.map(|(_, ts)| ts),
        }
    }

    /// Scores health for the given backlog and circuit state.
    ///
    /// Rules are independent and the worst status wins:
    ///
    /// - open circuit: unhealthy
    /// - success rate below the unhealthy threshold: unhealthy
    /// - a backlog with no success inside the stall window: unhealthy
    /// - success rate below the degraded threshold: degraded
    /// - backlog above the threshold: degraded
    ///
    /// Rate rules only apply once an attempt has been recorded.
    pub fn health_status(&self, backlog: usize, circuit_open: bool) -> HealthReport {
        let now = Instant::now();
        let state = self.state.lock();
        let rate = state.success_rate();
        let attempted = state.attempts > 0;

        let mut status = HealthStatus::Healthy;
        let mut recommendations = Vec::new();
        let mut flag = |level: HealthStatus, advice: String| {
            status = status.max(level);
            recommendations.push(advice);
        };

        if circuit_open {
            flag(
                HealthStatus::Unhealthy,
                "circuit breaker is open: the remote service is failing, deliveries resume after the next probe".into(),
            );
        }
        if attempted && rate < self.config.unhealthy_success_rate {
            flag(
                HealthStatus::Unhealthy,
                format!("success rate is {rate:.1}%: check connectivity and remote service status"),
            );
        } else if attempted && rate < self.config.degraded_success_rate {
            flag(
                HealthStatus::Degraded,
                format!("success rate is {rate:.1}%: intermittent failures are slowing delivery"),
            );
        }

        let since = state
            .last_success
            .map_or(state.started_at, |(at, _)| at.max(state.started_at));
        if attempted && backlog > 0 && now.saturating_duration_since(since) > self.config.stall_window {
            flag(
                HealthStatus::Unhealthy,
                format!(
                    "no successful sync in the last {}s with {backlog} items waiting",
                    self.config.stall_window.as_secs()
                ),
            );
        }
        if backlog > self.config.backlog_threshold {
            flag(
                HealthStatus::Degraded,
                format!(
                    "backlog of {backlog} items exceeds {}: delivery is falling behind",
                    self.config.backlog_threshold
                ),
            );
        }

        HealthReport {
            status,
            recommendations,
            success_rate: rate,
            backlog,
            circuit_open,
        }
    }

    /// Clears every counter, sample and event.
    pub fn reset(&self) {
        *self.state.lock() = TelemetryState::new();
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}

fn percentiles(mut samples: Vec<Duration>) -> LatencyPercentiles {
    if samples.is_empty() {
        return LatencyPercentiles::default();
    }
    samples.sort_unstable();
    LatencyPercentiles {
        p50: percentile(&samples, 50.0),
        p95: percentile(&samples, 95.0),
        p99: percentile(&samples, 99.0),
        samples: samples.len(),
    }
}

/// Rank interpolation over sorted samples: rank = p/100 * (n - 1).
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let low = sorted[lower].as_secs_f64();
    let high = sorted[upper].as_secs_f64();
    Duration::from_secs_f64(low + (high - low) * (rank - lower as f64))
}
