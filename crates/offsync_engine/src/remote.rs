//! The remote boundary the engine delivers mutations to.

use async_trait::async_trait;
use offsync_protocol::{Action, MutationKind, QueueItem};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// How the engine reacts to a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Network trouble or a server fault; retried with backoff.
    Transient,
    /// The server asked the client to slow down; retried after its hint.
    RateLimited,
    /// Credentials were rejected; delivery stops until re-authentication.
    Authentication,
    /// The server rejected the payload; the item is dead-lettered.
    Permanent,
}

impl FailureClass {
    /// Returns true if the item stays in the queue for another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::RateLimited)
    }
}

/// A failed call to the remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never reached the server or the connection dropped.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-style status code.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The server is throttling the client.
    #[error("rate limited")]
    RateLimited {
        /// How long the server asked the client to wait.
        retry_after: Option<Duration>,
    },

    /// The payload was rejected as invalid.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl RemoteError {
    /// Creates a server error.
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Classifies the error.
    ///
    /// Server statuses map like HTTP: 401 and 403 are authentication
    /// failures, 429 is rate limiting, 408 and 5xx are transient, and any
    /// other status is a permanent rejection.
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => FailureClass::Transient,
            RemoteError::Authentication(_) => FailureClass::Authentication,
            RemoteError::RateLimited { .. } => FailureClass::RateLimited,
            RemoteError::Validation(_) => FailureClass::Permanent,
            RemoteError::Server { status, .. } => match status {
                401 | 403 => FailureClass::Authentication,
                429 => FailureClass::RateLimited,
                408 | 500..=599 => FailureClass::Transient,
                _ => FailureClass::Permanent,
            },
        }
    }

    /// Wait hint from the server, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Client for the remote authority, one operation per mutation kind.
///
/// Implementations wrap the concrete transport (HTTP, RPC). The engine
/// bounds every call with its own timeout, so implementations need not.
#[async_trait]
pub trait RemoteBoundary: Send + Sync + 'static {
    /// Delivers a study session update.
    async fn sync_session(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError>;

    /// Delivers an answer submission.
    async fn submit_answer(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError>;

    /// Delivers aggregated statistics.
    async fn sync_statistics(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError>;

    /// Delivers a progress delta.
    async fn sync_progress(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError>;

    /// Delivers a pin or unpin operation.
    async fn sync_pin_operation(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError>;

    /// Delivers an application-defined mutation kind.
    async fn sync_custom(
        &self,
        name: &str,
        action: Action,
        payload: &[u8],
    ) -> Result<(), RemoteError>;
}

#[async_trait]
impl<R: RemoteBoundary + ?Sized> RemoteBoundary for Arc<R> {
    async fn sync_session(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        (**self).sync_session(action, payload).await
    }

    async fn submit_answer(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        (**self).submit_answer(action, payload).await
    }

    async fn sync_statistics(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        (**self).sync_statistics(action, payload).await
    }

    async fn sync_progress(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        (**self).sync_progress(action, payload).await
    }

    async fn sync_pin_operation(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        (**self).sync_pin_operation(action, payload).await
    }

    async fn sync_custom(
        &self,
        name: &str,
        action: Action,
        payload: &[u8],
    ) -> Result<(), RemoteError> {
        (**self).sync_custom(name, action, payload).await
    }
}

/// Routes an item to the remote operation for its kind.
pub async fn dispatch<R: RemoteBoundary + ?Sized>(
    remote: &R,
    item: &QueueItem,
) -> Result<(), RemoteError> {
    let payload = item.payload.as_slice();
    match &item.kind {
        MutationKind::Session => remote.sync_session(item.action, payload).await,
        MutationKind::Answer => remote.submit_answer(item.action, payload).await,
        MutationKind::Statistics => remote.sync_statistics(item.action, payload).await,
        MutationKind::Progress => remote.sync_progress(item.action, payload).await,
        MutationKind::PinOperation => remote.sync_pin_operation(item.action, payload).await,
        MutationKind::Custom(name) => remote.sync_custom(name, item.action, payload).await,
    }
}

/// One call observed by [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// Kind the call was routed for.
    pub kind: MutationKind,
    /// Action of the item.
    pub action: Action,
    /// Payload of the item.
    pub payload: Vec<u8>,
    /// When the call started.
    pub at: Instant,
}

/// A scriptable remote for testing.
///
/// Each call pops the next scripted result, falling back to the default
/// result (success unless changed) once the script is empty.
#[derive(Debug)]
pub struct MockRemote {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    default: Mutex<Result<(), RemoteError>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MockRemote {
    /// Creates a mock that accepts everything immediately.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(Ok(())),
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock that fails every call with `error`.
    pub fn failing(error: RemoteError) -> Self {
        let mock = Self::new();
        mock.set_default(Err(error));
        mock
    }

    /// Queues a result for an upcoming call.
    pub fn push_result(&self, result: Result<(), RemoteError>) {
        self.script.lock().push_back(result);
    }

    /// Queues several results in order.
    pub fn push_results(&self, results: impl IntoIterator<Item = Result<(), RemoteError>>) {
        self.script.lock().extend(results);
    }

    /// Sets the result used once the script is empty.
    pub fn set_default(&self, result: Result<(), RemoteError>) {
        *self.default.lock() = result;
    }

    /// Sets the simulated latency of every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    async fn respond(
        &self,
        kind: MutationKind,
        action: Action,
        payload: &[u8],
    ) -> Result<(), RemoteError> {
        self.calls.lock().push(RemoteCall {
            kind,
            action,
            payload: payload.to_vec(),
            at: Instant::now(),
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.default.lock().clone())
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBoundary for MockRemote {
    async fn sync_session(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.respond(MutationKind::Session, action, payload).await
    }

    async fn submit_answer(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.respond(MutationKind::Answer, action, payload).await
    }

    async fn sync_statistics(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.respond(MutationKind::Statistics, action, payload).await
    }

    async fn sync_progress(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.respond(MutationKind::Progress, action, payload).await
    }

    async fn sync_pin_operation(&self, action: Action, payload: &[u8]) -> Result<(), RemoteError> {
        self.respond(MutationKind::PinOperation, action, payload).await
    }

    async fn sync_custom(
        &self,
        name: &str,
        action: Action,
        payload: &[u8],
    ) -> Result<(), RemoteError> {
        self.respond(MutationKind::Custom(name.to_string()), action, payload)
            .await
    }
}
