//! The sync engine: queue ownership, drain loop and outcome routing.

use crate::breaker::{Admission, CircuitBreaker, CircuitState, Transition};
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EngineEvent, EventBus};
use crate::network::NetworkSignal;
use crate::remote::{dispatch, FailureClass, RemoteBoundary, RemoteError};
use crate::telemetry::{HealthReport, SyncEvent, SyncEventKind, SyncMetrics, TelemetryCollector};
use offsync_protocol::{
    resolve, resolve_batch, Action, BatchResolution, ConflictResolution, DeadLetterItem,
    DeadLetterReason, ItemId, ItemPatch, ItemStatus, Keyed, MutationKind, QueueItem, Timestamp,
    Versioned,
};
use offsync_store::{QueueStore, StoreError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest an item is held back by backoff or a server wait hint.
const MAX_SCHEDULED_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Why a drain pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every item was delivered or dead-lettered.
    Empty,
    /// The engine is paused.
    Paused,
    /// The network is unavailable.
    Offline,
    /// The remote rejected the credentials; call `resume` after re-authenticating.
    AwaitingReauth,
    /// The circuit is open.
    CircuitOpen {
        /// When the next probe is allowed.
        retry_at: Instant,
    },
    /// Another drain pass is running.
    AlreadyDraining,
    /// The engine is shutting down.
    ShuttingDown,
}

/// Snapshot of the live queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStatus {
    /// Items waiting for their first or next attempt.
    pub pending: usize,
    /// Items being delivered right now.
    pub in_flight: usize,
    /// Items whose last attempt failed.
    pub failed: usize,
    /// All live items.
    pub total: usize,
    /// True while the circuit is open.
    pub circuit_open: bool,
    /// Items and dead letters whose store write is still outstanding.
    pub memory_only: usize,
    /// True while paused by the caller.
    pub paused: bool,
    /// True while the network is available.
    pub online: bool,
    /// True while blocked on re-authentication.
    pub awaiting_reauth: bool,
}

/// A queued item and the bookkeeping the store does not see.
#[derive(Debug, Clone)]
struct Entry {
    item: QueueItem,
    /// The store has a copy of the item.
    persisted: bool,
    /// The store's copy is out of date.
    dirty: bool,
    /// Earliest time of the next attempt.
    not_before: Option<Instant>,
}

impl Entry {
    fn fresh(item: QueueItem, persisted: bool) -> Self {
        Self {
            item,
            persisted,
            dirty: false,
            not_before: None,
        }
    }

    /// An item loaded from the store. Backoff resumes from the persisted attempt time.
    fn restored(item: QueueItem, config: &EngineConfig) -> Self {
        let not_before = match item.last_attempt_at {
            Some(at) if item.retry_count > 0 => {
                let delay = config.retry.delay_for_retry(item.retry_count);
                let elapsed = Timestamp::now().saturating_since(at);
                delay
                    .checked_sub(elapsed)
                    .and_then(|rest| Instant::now().checked_add(rest.min(MAX_SCHEDULED_WAIT)))
            }
            _ => None,
        };
        Self {
            item,
            persisted: true,
            dirty: false,
            not_before,
        }
    }

    fn is_memory_only(&self) -> bool {
        !self.persisted || self.dirty
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Entry>,
    in_flight: Option<Entry>,
    unsettled_dead: Vec<DeadLetterItem>,
    unsettled_removals: Vec<ItemId>,
    needs_reload: bool,
    needs_settle: bool,
}

impl QueueState {
    fn backlog(&self) -> usize {
        self.items.len() + usize::from(self.in_flight.is_some())
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared<R, S> {
    config: EngineConfig,
    remote: R,
    store: S,
    telemetry: Arc<TelemetryCollector>,
    network: NetworkSignal,
    queue: Mutex<QueueState>,
    breaker: Mutex<CircuitBreaker>,
    events: EventBus,
    backlog: watch::Sender<usize>,
    wake: Notify,
    interrupt: Notify,
    draining: AtomicBool,
    paused: AtomicBool,
    auth_blocked: AtomicBool,
    stopping: AtomicBool,
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder<R, S> {
    remote: R,
    store: S,
    config: EngineConfig,
    network: NetworkSignal,
    telemetry: Option<Arc<TelemetryCollector>>,
}

impl<R: RemoteBoundary, S: QueueStore + 'static> SyncEngineBuilder<R, S> {
    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the network availability signal.
    pub fn network(mut self, network: impl Into<NetworkSignal>) -> Self {
        self.network = network.into();
        self
    }

    /// Shares an existing telemetry collector.
    pub fn telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds an engine without a background worker.
    ///
    /// Nothing is delivered until [`SyncEngine::drain`] is called.
    pub fn build(self) -> SyncEngine<R, S> {
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(TelemetryCollector::new(self.config.telemetry.clone())));

        let mut queue = QueueState::default();
        match self.store.load_pending() {
            Ok(items) => {
                info!(items = items.len(), "restored queue from store");
                queue.items = items
                    .into_iter()
                    .map(|item| Entry::restored(item, &self.config))
                    .collect();
            }
            Err(err) => {
                warn!(error = %err, "could not load queue from store, will retry");
                telemetry.record(
                    SyncEvent::new(SyncEventKind::StorageError, "load_pending")
                        .with_error(err.to_string()),
                );
                queue.needs_reload = true;
            }
        }

        let backlog = queue.backlog();
        telemetry.record_queue_size(backlog);
        let (backlog_tx, _) = watch::channel(backlog);

        let shared = Shared {
            breaker: Mutex::new(CircuitBreaker::new(self.config.circuit.clone())),
            events: EventBus::new(self.config.event_capacity),
            config: self.config,
            remote: self.remote,
            store: self.store,
            telemetry,
            network: self.network,
            queue: Mutex::new(queue),
            backlog: backlog_tx,
            wake: Notify::new(),
            interrupt: Notify::new(),
            draining: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            auth_blocked: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        };

        SyncEngine {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// Builds the engine and spawns its worker on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn start(self) -> SyncResult<SyncEngine<R, S>> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let engine = self.build();

        let worker = handle.spawn(run_worker(Arc::clone(&engine.shared)));
        let watcher = handle.spawn(watch_network(
            Arc::clone(&engine.shared),
            engine.shared.network.clone(),
        ));
        *engine.worker.lock() = Some(worker);
        *engine.watcher.lock() = Some(watcher);
        Ok(engine)
    }
}

/// Offline-first sync engine.
///
/// Owns the in-memory queue and the circuit breaker. Items are persisted on
/// [`enqueue`](SyncEngine::enqueue) and delivered in FIFO order by a single
/// drain loop; failed items go to the tail of the queue.
///
/// # Example
///
/// ```rust
/// use offsync_engine::{MockRemote, SyncEngine};
/// use offsync_protocol::{Action, MutationKind};
/// use offsync_store::MemoryQueueStore;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = SyncEngine::builder(MockRemote::new(), MemoryQueueStore::new()).start()?;
/// engine.enqueue(MutationKind::Answer, Action::Create, b"{\"card\":7}".to_vec())?;
/// engine.wait_until_empty(Duration::from_secs(5)).await?;
/// assert_eq!(engine.metrics().successes, 1);
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine<R: RemoteBoundary, S: QueueStore + 'static> {
    shared: Arc<Shared<R, S>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteBoundary, S: QueueStore + 'static> SyncEngine<R, S> {
    /// Starts building an engine for `remote` backed by `store`.
    pub fn builder(remote: R, store: S) -> SyncEngineBuilder<R, S> {
        SyncEngineBuilder {
            remote,
            store,
            config: EngineConfig::default(),
            network: NetworkSignal::always_online(),
            telemetry: None,
        }
    }

    /// Queues a mutation for delivery and returns its id.
    ///
    /// Never waits for delivery. If the store rejects the write the item is
    /// kept in memory and the write is retried on the next drain pass.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn enqueue(
        &self,
        kind: MutationKind,
        action: Action,
        payload: impl Into<Vec<u8>>,
    ) -> SyncResult<ItemId> {
        self.shared.enqueue(QueueItem::new(kind, action, payload.into()))
    }

    /// Runs one drain pass in the calling task.
    pub async fn drain(&self) -> DrainOutcome {
        self.shared.drain().await
    }

    /// Returns counts of live items and the engine's gates.
    pub fn queue_status(&self) -> QueueStatus {
        let shared = &self.shared;
        let mut status = {
            let q = shared.queue.lock();
            let mut status = QueueStatus::default();
            for entry in &q.items {
                match entry.item.status {
                    ItemStatus::Failed => status.failed += 1,
                    ItemStatus::Pending | ItemStatus::InFlight => status.pending += 1,
                }
            }
            status.in_flight = usize::from(q.in_flight.is_some());
            status.total = status.pending + status.failed + status.in_flight;
            status.memory_only = q
                .items
                .iter()
                .chain(q.in_flight.iter())
                .filter(|e| e.is_memory_only())
                .count()
                + q.unsettled_dead.len();
            status
        };
        status.circuit_open = shared.breaker.lock().is_open();
        status.paused = shared.paused.load(Ordering::Acquire);
        status.online = shared.network.is_online();
        status.awaiting_reauth = shared.auth_blocked.load(Ordering::Acquire);
        status
    }

    /// Returns the current sync metrics.
    pub fn metrics(&self) -> SyncMetrics {
        self.shared.telemetry.metrics()
    }

    /// Scores the engine's health.
    pub fn health_status(&self) -> HealthReport {
        let backlog = self.shared.queue.lock().backlog();
        let circuit_open = self.shared.breaker.lock().is_open();
        self.shared.telemetry.health_status(backlog, circuit_open)
    }

    /// Returns the shared telemetry collector.
    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.shared.telemetry
    }

    /// Clears all telemetry.
    pub fn reset_metrics(&self) {
        self.shared.telemetry.reset();
    }

    /// Returns a snapshot of the circuit breaker.
    pub fn circuit_state(&self) -> CircuitState {
        self.shared.breaker.lock().state()
    }

    /// Returns the number of live items.
    pub fn backlog(&self) -> usize {
        *self.shared.backlog.borrow()
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Resets every failed item to pending with a fresh retry budget, closes
    /// the circuit and triggers a drain. Returns the number of items reset.
    pub fn retry_all(&self) -> usize {
        let shared = &self.shared;
        let mut reset = 0;
        {
            let mut q = shared.queue.lock();
            let mut write_failed = None;
            for entry in q.items.iter_mut().filter(|e| e.item.status == ItemStatus::Failed) {
                entry.item.status = ItemStatus::Pending;
                entry.item.retry_count = 0;
                entry.item.last_error = None;
                entry.not_before = None;
                reset += 1;

                if entry.persisted && !entry.dirty {
                    let patch = ItemPatch::new()
                        .with_status(ItemStatus::Pending)
                        .with_retry_count(0)
                        .clearing_error();
                    if let Err(err) = shared.store.update(entry.item.id, &patch) {
                        entry.dirty = true;
                        write_failed = Some(err);
                    }
                }
            }
            if let Some(err) = write_failed {
                q.needs_settle = true;
                shared.storage_failed(&err, "retry_all");
            }
        }
        shared.breaker.lock().reset();
        info!(items = reset, "retrying all failed items");
        shared.interrupt.notify_waiters();
        shared.wake.notify_one();
        reset
    }

    /// Stops delivery at the next safe point until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        self.shared.interrupt.notify_waiters();
        info!("sync paused");
    }

    /// Resumes delivery, also clearing a re-authentication block.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.auth_blocked.store(false, Ordering::Release);
        self.shared.wake.notify_one();
        info!("sync resumed");
    }

    /// Waits until the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::FlushTimeout`] if items remain after `timeout`.
    pub async fn wait_until_empty(&self, timeout: Duration) -> SyncResult<()> {
        let mut rx = self.shared.backlog.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SyncError::ShutDown),
            Err(_) => Err(SyncError::FlushTimeout {
                timeout,
                remaining: self.backlog(),
            }),
        }
    }

    /// Triggers a drain and waits for the queue to empty.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ShutDown`] after shutdown, or
    /// [`SyncError::FlushTimeout`] if items remain after `timeout`.
    pub async fn sync_now(&self, timeout: Duration) -> SyncResult<()> {
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(SyncError::ShutDown);
        }
        self.shared.wake.notify_one();
        self.wait_until_empty(timeout).await
    }

    /// Returns every dead letter, including ones still waiting for a store write.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn dead_letter_items(&self) -> SyncResult<Vec<DeadLetterItem>> {
        let mut items = self.shared.store.dead_letter_items()?;
        items.extend(self.shared.queue.lock().unsettled_dead.iter().cloned());
        Ok(items)
    }

    /// Deletes every dead letter and returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the purge.
    pub fn purge_dead_letters(&self) -> SyncResult<usize> {
        let stored = self.shared.store.purge_dead_letters()?;
        let unsettled = std::mem::take(&mut self.shared.queue.lock().unsettled_dead).len();
        info!(purged = stored + unsettled, "dead letters purged");
        Ok(stored + unsettled)
    }

    /// Resolves a local and a remote version and records the conflict.
    pub fn resolve_conflict<T>(&self, local: T, remote: T) -> ConflictResolution<T>
    where
        T: Versioned + Serialize,
    {
        let resolution = resolve(local, remote);
        if resolution.had_conflict() {
            self.shared.telemetry.record_event(
                SyncEventKind::Conflict,
                format!(
                    "winner={:?} fields={}",
                    resolution.winner, resolution.conflict_count
                ),
                None,
            );
        }
        resolution
    }

    /// Resolves two collections by key and records one conflict per differing pair.
    pub fn resolve_conflicts<T>(&self, local: Vec<T>, remote: Vec<T>) -> BatchResolution<T>
    where
        T: Versioned + Keyed + Serialize,
    {
        let batch = resolve_batch(local, remote);
        for entry in batch.resolved.iter().filter(|e| e.conflict_count > 0) {
            self.shared.telemetry.record_event(
                SyncEventKind::Conflict,
                format!(
                    "key={:?} winner={:?} fields={}",
                    entry.key, entry.winner, entry.conflict_count
                ),
                None,
            );
        }
        batch
    }

    /// Stops the worker after the current delivery settles.
    ///
    /// Queued items stay in the store for the next engine.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        shared.stopping.store(true, Ordering::Release);
        shared.interrupt.notify_waiters();
        shared.wake.notify_one();

        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        info!("sync engine shut down");
    }
}

impl<R: RemoteBoundary, S: QueueStore + 'static> Drop for SyncEngine<R, S> {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::Release);
        for task in [self.worker.lock().take(), self.watcher.lock().take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl<R: RemoteBoundary, S: QueueStore + 'static> Shared<R, S> {
    fn enqueue(&self, item: QueueItem) -> SyncResult<ItemId> {
        if self.stopping.load(Ordering::Acquire) {
            return Err(SyncError::ShutDown);
        }
        let id = item.id;
        let kind = item.kind.clone();
        {
            let mut q = self.queue.lock();
            let persisted = match self.store.append(&item) {
                Ok(_) => true,
                Err(err) => {
                    q.needs_settle = true;
                    self.storage_failed(&err, "append");
                    false
                }
            };
            q.items.push_back(Entry::fresh(item, persisted));
            self.publish_backlog(&q);
        }

        self.telemetry
            .record(SyncEvent::new(SyncEventKind::Enqueued, kind.as_str()).with_item(id));
        debug!(item_id = %id, kind = %kind, "item enqueued");
        self.wake.notify_one();
        Ok(id)
    }

    async fn drain(&self) -> DrainOutcome {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            return DrainOutcome::AlreadyDraining;
        };

        loop {
            if self.stopping.load(Ordering::Acquire) {
                return DrainOutcome::ShuttingDown;
            }
            self.settle_storage();
            if let Some(outcome) = self.gate() {
                return outcome;
            }

            let now = Instant::now();
            let ready_at = {
                let q = self.queue.lock();
                match q.items.front() {
                    None => return DrainOutcome::Empty,
                    Some(entry) => entry.not_before.filter(|at| *at > now),
                }
            };

            {
                let breaker = self.breaker.lock();
                let state = breaker.state();
                if let (true, Some(retry_at)) = (state.is_open, state.next_probe_at) {
                    if now < retry_at {
                        return DrainOutcome::CircuitOpen { retry_at };
                    }
                }
            }

            if let Some(at) = ready_at {
                self.wait_until(at).await;
                continue;
            }

            let admission = self.breaker.lock().admit(now);
            if let Admission::Rejected { retry_at } = admission {
                return DrainOutcome::CircuitOpen { retry_at };
            }
            if admission == Admission::Probe {
                info!("circuit reset timeout elapsed, probing remote");
            }

            let Some(item) = self.begin_attempt() else {
                continue;
            };

            let started = Instant::now();
            let result = match tokio::time::timeout(
                self.config.attempt_timeout,
                dispatch(&self.remote, &item),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout),
            };
            self.finish_attempt(result, started.elapsed());
        }
    }

    fn gate(&self) -> Option<DrainOutcome> {
        if self.paused.load(Ordering::Acquire) {
            Some(DrainOutcome::Paused)
        } else if !self.network.is_online() {
            Some(DrainOutcome::Offline)
        } else if self.auth_blocked.load(Ordering::Acquire) {
            Some(DrainOutcome::AwaitingReauth)
        } else {
            None
        }
    }

    /// Sleeps until `deadline` unless paused, stopped or taken offline first.
    async fn wait_until(&self, deadline: Instant) {
        let interrupted = self.interrupt.notified();
        tokio::pin!(interrupted);
        interrupted.as_mut().enable();

        if self.stopping.load(Ordering::Acquire) || self.gate().is_some() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = interrupted => {}
        }
    }

    /// Moves the head item in flight and returns a copy to deliver.
    fn begin_attempt(&self) -> Option<QueueItem> {
        let mut q = self.queue.lock();
        let mut entry = q.items.pop_front()?;
        entry.item.status = ItemStatus::InFlight;
        entry.item.last_attempt_at = Some(Timestamp::now());
        entry.not_before = None;

        if entry.persisted && !entry.dirty {
            let patch = ItemPatch::new()
                .with_status(ItemStatus::InFlight)
                .with_last_attempt_at(Timestamp::now());
            if let Err(err) = self.store.update(entry.item.id, &patch) {
                entry.dirty = true;
                q.needs_settle = true;
                self.storage_failed(&err, "update");
            }
        }

        debug!(
            item_id = %entry.item.id,
            kind = %entry.item.kind,
            retry_count = entry.item.retry_count,
            "delivering item"
        );
        let item = entry.item.clone();
        q.in_flight = Some(entry);
        Some(item)
    }

    fn finish_attempt(&self, result: Result<(), RemoteError>, latency: Duration) {
        let Some(entry) = self.queue.lock().in_flight.take() else {
            return;
        };
        match result {
            Ok(()) => self.on_delivered(entry, latency),
            Err(err) => self.on_failed(entry, err),
        }
    }

    fn on_delivered(&self, entry: Entry, latency: Duration) {
        let id = entry.item.id;
        self.telemetry.record_latency(latency);
        self.telemetry
            .record(SyncEvent::new(SyncEventKind::Success, entry.item.kind.as_str()).with_item(id));

        let transition = self.breaker.lock().record_success();
        if transition == Transition::Closed {
            self.circuit_closed();
        }

        let mut q = self.queue.lock();
        if entry.persisted {
            if let Err(err) = self.store.remove(id) {
                q.unsettled_removals.push(id);
                q.needs_settle = true;
                self.storage_failed(&err, "remove");
            }
        }
        self.publish_backlog(&q);
        debug!(item_id = %id, latency_ms = latency.as_millis() as u64, "item delivered");
    }

    fn on_failed(&self, mut entry: Entry, err: RemoteError) {
        let class = err.class();
        let id = entry.item.id;
        let message = err.to_string();
        self.telemetry.record(
            SyncEvent::new(SyncEventKind::Failure, entry.item.kind.as_str())
                .with_item(id)
                .with_error(message.clone()),
        );

        let now = Instant::now();
        if let Transition::Opened { next_probe_at } = self.breaker.lock().record_failure(now) {
            self.circuit_opened(next_probe_at);
        }

        if class == FailureClass::Authentication {
            warn!(
                item_id = %id,
                error = %message,
                "remote rejected credentials, waiting for re-authentication"
            );
            entry.item.status = ItemStatus::Pending;
            self.auth_blocked.store(true, Ordering::Release);
            {
                let mut q = self.queue.lock();
                self.persist_entry(&mut q, &mut entry);
                q.items.push_front(entry);
                self.publish_backlog(&q);
            }
            self.telemetry.record(
                SyncEvent::new(SyncEventKind::ReauthRequired, "authentication failed")
                    .with_item(id)
                    .with_error(message.clone()),
            );
            self.events.emit(EngineEvent::ReauthRequired {
                item_id: id,
                message,
            });
            return;
        }

        entry.item.retry_count = entry.item.retry_count.saturating_add(1);
        entry.item.status = ItemStatus::Failed;
        entry.item.last_error = Some(message.clone());

        let reason = if class == FailureClass::Permanent {
            Some(DeadLetterReason::Rejected)
        } else if entry.item.retry_count >= self.config.retry.max_retries {
            Some(DeadLetterReason::ExhaustedRetries)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.dead_letter(entry, reason);
            return;
        }

        let retry_count = entry.item.retry_count;
        let backoff = self.config.retry.jittered_delay(retry_count);
        let wait = err
            .retry_after()
            .map_or(backoff, |hint| hint.max(backoff))
            .min(MAX_SCHEDULED_WAIT);
        entry.not_before = now.checked_add(wait);
        debug!(
            item_id = %id,
            retry_count,
            wait_ms = wait.as_millis() as u64,
            error = %message,
            "delivery failed, requeued"
        );

        let mut q = self.queue.lock();
        self.persist_entry(&mut q, &mut entry);
        q.items.push_back(entry);
        self.publish_backlog(&q);
        drop(q);
        self.telemetry.record(
            SyncEvent::new(SyncEventKind::Retry, format!("retry {retry_count}")).with_item(id),
        );
    }

    fn dead_letter(&self, entry: Entry, reason: DeadLetterReason) {
        let id = entry.item.id;
        let mut q = self.queue.lock();
        if let Err(err) = self.store.move_to_dead_letter(&entry.item, reason) {
            q.unsettled_dead.push(DeadLetterItem::new(entry.item, reason));
            q.needs_settle = true;
            self.storage_failed(&err, "move_to_dead_letter");
        }

        warn!(item_id = %id, reason = %reason, "item moved to dead letters");
        self.telemetry.record(
            SyncEvent::new(SyncEventKind::DeadLetter, reason.to_string()).with_item(id),
        );
        self.events.emit(EngineEvent::ItemDeadLettered { item_id: id, reason });
        self.publish_backlog(&q);
    }

    /// Writes the entry's current state to the store, or marks it for a later write.
    fn persist_entry(&self, q: &mut QueueState, entry: &mut Entry) {
        if !entry.persisted {
            return;
        }
        match self.store.update(entry.item.id, &ItemPatch::snapshot_of(&entry.item)) {
            Ok(()) => entry.dirty = false,
            Err(err) => {
                entry.dirty = true;
                q.needs_settle = true;
                self.storage_failed(&err, "update");
            }
        }
    }

    /// Retries outstanding store writes and puts an orphaned in-flight item back.
    fn settle_storage(&self) {
        let mut q = self.queue.lock();

        if let Some(mut orphan) = q.in_flight.take() {
            debug!(item_id = %orphan.item.id, "returning interrupted item to the head");
            orphan.item.status = ItemStatus::Pending;
            orphan.dirty = orphan.persisted;
            q.items.push_front(orphan);
            q.needs_settle = true;
        }

        if q.needs_reload {
            match self.store.load_pending() {
                Ok(stored) => {
                    // Items delivered or dead-lettered while the store was down are
                    // still live on disk until their writes settle.
                    let known: HashSet<ItemId> = q
                        .items
                        .iter()
                        .map(|e| e.item.id)
                        .chain(q.unsettled_removals.iter().copied())
                        .chain(q.unsettled_dead.iter().map(|d| d.item.id))
                        .collect();
                    let restored: Vec<Entry> = stored
                        .into_iter()
                        .filter(|item| !known.contains(&item.id))
                        .map(|item| Entry::restored(item, &self.config))
                        .collect();
                    info!(items = restored.len(), "restored queue from store");
                    for entry in restored.into_iter().rev() {
                        q.items.push_front(entry);
                    }
                    q.needs_reload = false;
                    self.publish_backlog(&q);
                }
                Err(err) => {
                    self.storage_failed(&err, "load_pending");
                    return;
                }
            }
        }

        if !q.needs_settle {
            return;
        }

        let mut first_error = None;
        for entry in q.items.iter_mut().filter(|e| e.is_memory_only()) {
            let written = if entry.persisted {
                match self.store.update(entry.item.id, &ItemPatch::snapshot_of(&entry.item)) {
                    Err(StoreError::NotFound(_)) => self.store.append(&entry.item).map(|_| ()),
                    other => other,
                }
            } else {
                self.store.append(&entry.item).map(|_| ())
            };
            match written {
                Ok(()) => {
                    entry.persisted = true;
                    entry.dirty = false;
                }
                Err(err) => {
                    first_error = Some(err);
                    break;
                }
            }
        }

        let removals = std::mem::take(&mut q.unsettled_removals);
        for id in removals {
            if let Err(err) = self.store.remove(id) {
                q.unsettled_removals.push(id);
                first_error.get_or_insert(err);
            }
        }

        let dead = std::mem::take(&mut q.unsettled_dead);
        for letter in dead {
            if let Err(err) = self.store.move_to_dead_letter(&letter.item, letter.reason) {
                q.unsettled_dead.push(letter);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => self.storage_failed(&err, "settle"),
            None => {
                q.needs_settle = false;
                info!("queue store caught up with memory");
            }
        }
    }

    fn storage_failed(&self, err: &StoreError, operation: &str) {
        warn!(error = %err, operation, "queue store write failed, holding items in memory");
        self.telemetry.record(
            SyncEvent::new(SyncEventKind::StorageError, operation).with_error(err.to_string()),
        );
        self.events.emit(EngineEvent::StorageDegraded {
            message: err.to_string(),
        });
    }

    fn circuit_opened(&self, next_probe_at: Instant) {
        let wait = next_probe_at.saturating_duration_since(Instant::now());
        warn!(probe_in_ms = wait.as_millis() as u64, "circuit breaker opened");
        self.telemetry
            .record_event(SyncEventKind::CircuitOpened, "consecutive failures", None);
        self.events.emit(EngineEvent::CircuitOpened { next_probe_at });
    }

    fn circuit_closed(&self) {
        info!("circuit breaker closed after successful probe");
        self.telemetry
            .record_event(SyncEventKind::CircuitClosed, "probe succeeded", None);
        self.events.emit(EngineEvent::CircuitClosed);
    }

    fn publish_backlog(&self, q: &QueueState) {
        let backlog = q.backlog();
        let previous = self.backlog.send_replace(backlog);
        self.telemetry.record_queue_size(backlog);
        if previous > 0 && backlog == 0 {
            self.telemetry
                .record_event(SyncEventKind::QueueEmptied, "queue drained", None);
            self.events.emit(EngineEvent::QueueEmptied);
        }
    }

    fn set_online(&self, online: bool) {
        if online {
            info!("network available, resuming delivery");
            self.breaker.lock().reset_failures();
            self.wake.notify_one();
        } else {
            info!("network unavailable, delivery suspended");
            self.interrupt.notify_waiters();
        }
    }
}

async fn run_worker<R: RemoteBoundary, S: QueueStore + 'static>(shared: Arc<Shared<R, S>>) {
    let period = shared.config.tick_interval;
    let mut tick = tokio::time::interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let outcome = shared.drain().await;
        debug!(?outcome, "drain pass finished");
        if outcome == DrainOutcome::ShuttingDown || shared.stopping.load(Ordering::Acquire) {
            break;
        }

        let probe_at = match outcome {
            DrainOutcome::CircuitOpen { retry_at } => Some(retry_at),
            _ => None,
        };
        let probe = async {
            match probe_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shared.wake.notified() => {}
            _ = tick.tick() => {}
            _ = probe => {}
        }
    }
}

async fn watch_network<R: RemoteBoundary, S: QueueStore + 'static>(
    shared: Arc<Shared<R, S>>,
    mut network: NetworkSignal,
) {
    loop {
        let online = network.changed().await;
        if shared.stopping.load(Ordering::Acquire) {
            break;
        }
        shared.set_online(online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;

    #[test]
    fn drain_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = DrainGuard::acquire(&flag).unwrap();
        assert!(DrainGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(DrainGuard::acquire(&flag).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn restored_entry_waits_out_remaining_backoff() {
        let config = EngineConfig::default().with_retry(RetryConfig::default().without_jitter());

        let fresh = QueueItem::new(MutationKind::Answer, Action::Create, vec![]);
        assert!(Entry::restored(fresh.clone(), &config).not_before.is_none());

        let mut failed = fresh;
        failed.retry_count = 1;
        failed.last_attempt_at = Some(Timestamp::now());
        let entry = Entry::restored(failed.clone(), &config);
        let wait = entry.not_before.unwrap() - Instant::now();
        assert!(wait <= Duration::from_secs(2));
        assert!(wait > Duration::from_secs(1));

        failed.last_attempt_at = Some(Timestamp::from_millis(0));
        assert!(Entry::restored(failed, &config).not_before.is_none());
    }
}
