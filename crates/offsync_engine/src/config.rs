//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for a sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry and backoff policy.
    pub retry: RetryConfig,
    /// Circuit breaker policy.
    pub circuit: CircuitBreakerConfig,
    /// Telemetry limits and health thresholds.
    pub telemetry: TelemetryConfig,
    /// Upper bound on a single delivery attempt.
    pub attempt_timeout: Duration,
    /// Interval of the worker's periodic wake-up.
    pub tick_interval: Duration,
    /// Capacity of the engine event channel.
    pub event_capacity: usize,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            telemetry: TelemetryConfig::default(),
            attempt_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(30),
            event_capacity: 256,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Sets the telemetry configuration.
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Sets the periodic wake-up interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// The delay before retry `n` is `base_delay * multiplier^n`, capped at
/// `max_delay`, then spread by up to `jitter` in either direction.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts after which an item is dead-lettered.
    pub max_retries: u32,
    /// Delay unit of the exponential schedule.
    pub base_delay: Duration,
    /// Maximum delay before jitter.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Relative jitter, 0.25 means ±25%.
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with the default schedule.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1 are raised to 1.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the relative jitter, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Disables jitter.
    pub fn without_jitter(self) -> Self {
        self.with_jitter(0.0)
    }

    /// Un-jittered delay before the retry of an item that failed `retry_count` times.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Delay before a retry, with random jitter applied.
    pub fn jittered_delay(&self, retry_count: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.apply_jitter(self.delay_for_retry(retry_count), unit)
    }

    /// Spreads `delay` by `unit * jitter`, where `unit` is in `-1.0..=1.0`.
    pub fn apply_jitter(&self, delay: Duration, unit: f64) -> Duration {
        let factor = 1.0 + self.jitter.clamp(0.0, 1.0) * unit.clamp(-1.0, 1.0);
        Duration::try_from_secs_f64((delay.as_secs_f64() * factor).max(0.0)).unwrap_or(delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// How consecutive failures decay after a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureDecay {
    /// Forget all failures.
    Reset,
    /// Halve the failure count.
    #[default]
    Halve,
    /// Subtract a fixed amount.
    Decrement(u32),
}

impl FailureDecay {
    /// Applies the decay to a failure count.
    #[must_use]
    pub fn apply(self, failures: u32) -> u32 {
        match self {
            FailureDecay::Reset => 0,
            FailureDecay::Halve => failures / 2,
            FailureDecay::Decrement(n) => failures.saturating_sub(n),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
    /// Decay of the failure count on success.
    pub decay: FailureDecay,
}

impl CircuitBreakerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            decay: FailureDecay::default(),
        }
    }

    /// Sets the failure threshold. A threshold of 0 is raised to 1.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the reset timeout.
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets the failure decay.
    pub fn with_decay(mut self, decay: FailureDecay) -> Self {
        self.decay = decay;
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for telemetry collection and health scoring.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Events kept in the ring buffer.
    pub max_events: usize,
    /// Latency samples kept for percentiles.
    pub max_latency_samples: usize,
    /// Queue-size samples kept for averages.
    pub max_queue_samples: usize,
    /// Window over which throughput is measured.
    pub throughput_window: Duration,
    /// A backlog with no success inside this window is unhealthy.
    pub stall_window: Duration,
    /// Backlog above which the engine is degraded.
    pub backlog_threshold: usize,
    /// Success rate (percent) below which the engine is degraded.
    pub degraded_success_rate: f64,
    /// Success rate (percent) below which the engine is unhealthy.
    pub unhealthy_success_rate: f64,
}

impl TelemetryConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_events: 1000,
            max_latency_samples: 100,
            max_queue_samples: 1000,
            throughput_window: Duration::from_secs(60),
            stall_window: Duration::from_secs(5 * 60),
            backlog_threshold: 100,
            degraded_success_rate: 90.0,
            unhealthy_success_rate: 50.0,
        }
    }

    /// Sets the event ring buffer size.
    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = max.max(1);
        self
    }

    /// Sets the latency sample window.
    pub fn with_max_latency_samples(mut self, max: usize) -> Self {
        self.max_latency_samples = max.max(1);
        self
    }

    /// Sets the backlog threshold.
    pub fn with_backlog_threshold(mut self, threshold: usize) -> Self {
        self.backlog_threshold = threshold;
        self
    }

    /// Sets the stall window.
    pub fn with_stall_window(mut self, window: Duration) -> Self {
        self.stall_window = window;
        self
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
