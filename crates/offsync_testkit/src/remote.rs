//! Remotes that fail on purpose.

use async_trait::async_trait;
use offsync_engine::{RemoteBoundary, RemoteError};
use offsync_protocol::Action;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A remote that fails on a schedule, at a seeded rate, or always.
///
/// Every call counts toward the schedule regardless of the mutation kind.
#[derive(Debug)]
pub struct FlakyRemote {
    fail_every: Option<u64>,
    failure_rate: f64,
    rng: Mutex<StdRng>,
    error: RemoteError,
    latency: Duration,
    calls: AtomicU64,
    failures: AtomicU64,
    delivered: Mutex<Vec<Vec<u8>>>,
}

impl FlakyRemote {
    /// Creates a remote that accepts every call.
    pub fn new() -> Self {
        Self {
            fail_every: None,
            failure_rate: 0.0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            error: RemoteError::Network("simulated outage".into()),
            latency: Duration::ZERO,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Creates a remote that rejects every call with `error`.
    pub fn always_failing(error: RemoteError) -> Self {
        Self::new().with_error(error).with_failure_rate(1.0, 0)
    }

    /// Fails every `n`th call, counting from one.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    /// Fails calls at random with probability `rate`, drawn from a seeded generator.
    pub fn with_failure_rate(mut self, rate: f64, seed: u64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Sets the error returned by failing calls.
    pub fn with_error(mut self, error: RemoteError) -> Self {
        self.error = error;
        self
    }

    /// Sets the simulated latency of every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns the number of calls made.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of calls that failed.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Returns the payloads of accepted calls, in order.
    pub fn delivered(&self) -> Vec<Vec<u8>> {
        self.delivered.lock().clone()
    }

    async fn attempt(&self, payload: &[u8]) -> Result<(), RemoteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scheduled = self.fail_every.is_some_and(|n| call % n == 0);
        let random = self.failure_rate > 0.0 && self.rng.lock().gen_bool(self.failure_rate);
        if scheduled || random {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(self.error.clone());
        }

        self.delivered.lock().push(payload.to_vec());
        Ok(())
    }
}

impl Default for FlakyRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBoundary for FlakyRemote {
    async fn sync_session(&self, _action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.attempt(payload).await
    }

    async fn submit_answer(&self, _action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.attempt(payload).await
    }

    async fn sync_statistics(&self, _action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.attempt(payload).await
    }

    async fn sync_progress(&self, _action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.attempt(payload).await
    }

    async fn sync_pin_operation(&self, _action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.attempt(payload).await
    }

    async fn sync_custom(
        &self,
        _name: &str,
        _action: Action,
        payload: &[u8],
    ) -> Result<(), RemoteError> {
        self.attempt(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_on_schedule() {
        let remote = FlakyRemote::new().failing_every(3);
        let mut outcomes = Vec::new();
        for i in 0..6u8 {
            outcomes.push(remote.submit_answer(Action::Create, &[i]).await.is_ok());
        }
        assert_eq!(outcomes, vec![true, true, false, true, true, false]);
        assert_eq!(remote.failure_count(), 2);
        assert_eq!(remote.delivered(), vec![vec![0], vec![1], vec![3], vec![4]]);
    }

    #[tokio::test]
    async fn seeded_rate_is_repeatable() {
        async fn run(seed: u64) -> Vec<bool> {
            let remote = FlakyRemote::new().with_failure_rate(0.5, seed);
            let mut outcomes = Vec::new();
            for _ in 0..32 {
                outcomes.push(remote.sync_progress(Action::Update, b"x").await.is_ok());
            }
            outcomes
        }
        assert_eq!(run(7).await, run(7).await);
    }

    #[tokio::test]
    async fn always_failing_returns_its_error() {
        let remote = FlakyRemote::always_failing(RemoteError::server(500, "boom"));
        let err = remote.sync_session(Action::Create, b"").await.unwrap_err();
        assert_eq!(err, RemoteError::server(500, "boom"));
        assert!(remote.delivered().is_empty());
    }
}
