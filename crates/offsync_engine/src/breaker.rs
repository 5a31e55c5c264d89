//! Circuit breaker guarding the remote boundary.

use crate::config::CircuitBreakerConfig;
use tokio::time::Instant;

/// Snapshot of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    /// True while deliveries are blocked.
    pub is_open: bool,
    /// Failures since the last decay.
    pub consecutive_failures: u32,
    /// When the circuit last opened.
    pub opened_at: Option<Instant>,
    /// When the next probe is allowed while open.
    pub next_probe_at: Option<Instant>,
    /// True while the single post-timeout probe is outstanding.
    pub probing: bool,
}

/// Decision for a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The circuit is closed.
    Allowed,
    /// The circuit just closed after its timeout; this attempt is the probe.
    Probe,
    /// The circuit is open until `retry_at`.
    Rejected {
        /// When a probe becomes possible.
        retry_at: Instant,
    },
}

/// What a recorded outcome did to the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No state change worth reporting.
    None,
    /// The circuit opened.
    Opened {
        /// When a probe becomes possible.
        next_probe_at: Instant,
    },
    /// A probe succeeded and the circuit is closed for good.
    Closed,
}

/// Counts consecutive failures and blocks delivery once they reach a threshold.
///
/// After `reset_timeout` the next admission closes the circuit optimistically
/// and lets one probe through. A failed probe opens the circuit again at
/// once; a successful one keeps it closed.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState {
                is_open: false,
                consecutive_failures: 0,
                opened_at: None,
                next_probe_at: None,
                probing: false,
            },
        }
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Returns true while deliveries are blocked.
    pub fn is_open(&self) -> bool {
        self.state.is_open
    }

    /// Decides whether a delivery may start at `now`.
    pub fn admit(&mut self, now: Instant) -> Admission {
        if !self.state.is_open {
            return Admission::Allowed;
        }
        match self.state.next_probe_at {
            Some(retry_at) if now < retry_at => Admission::Rejected { retry_at },
            _ => {
                self.state.is_open = false;
                self.state.probing = true;
                Admission::Probe
            }
        }
    }

    /// Records a delivered item.
    pub fn record_success(&mut self) -> Transition {
        self.state.consecutive_failures = self.config.decay.apply(self.state.consecutive_failures);
        if self.state.probing {
            self.state.probing = false;
            self.state.opened_at = None;
            self.state.next_probe_at = None;
            return Transition::Closed;
        }
        Transition::None
    }

    /// Records a failed attempt of any kind.
    pub fn record_failure(&mut self, now: Instant) -> Transition {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        let failed_probe = std::mem::take(&mut self.state.probing);

        if failed_probe || self.state.consecutive_failures >= self.config.failure_threshold {
            let next_probe_at = now + self.config.reset_timeout;
            self.state.is_open = true;
            self.state.opened_at = Some(now);
            self.state.next_probe_at = Some(next_probe_at);
            return Transition::Opened { next_probe_at };
        }
        Transition::None
    }

    /// Forgets the failure count without touching an open circuit.
    pub fn reset_failures(&mut self) {
        self.state.consecutive_failures = 0;
    }

    /// Returns the breaker to its initial closed state.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}
