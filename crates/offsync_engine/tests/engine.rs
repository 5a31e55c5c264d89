//! Integration tests for the sync engine against a scripted remote.

use offsync_engine::{
    network_channel, CircuitBreakerConfig, DrainOutcome, EngineConfig, EngineEvent, HealthStatus,
    MockRemote, RemoteError, RetryConfig, SyncEngine, SyncError,
};
use offsync_protocol::{
    Action, DeadLetterReason, ItemStatus, Keyed, MutationKind, QueueItem, Timestamp, Versioned,
    Winner,
};
use offsync_store::{FileQueueStore, JournalOptions, MemoryQueueStore, QueueStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type TestEngine = SyncEngine<Arc<MockRemote>, Arc<MemoryQueueStore>>;

fn config() -> EngineConfig {
    EngineConfig::default().with_retry(RetryConfig::default().without_jitter())
}

fn engine_with(
    remote: &Arc<MockRemote>,
    store: &Arc<MemoryQueueStore>,
    config: EngineConfig,
) -> TestEngine {
    SyncEngine::builder(Arc::clone(remote), Arc::clone(store))
        .config(config)
        .build()
}

fn payloads(remote: &MockRemote) -> Vec<Vec<u8>> {
    remote.calls().into_iter().map(|c| c.payload).collect()
}

#[tokio::test]
async fn delivers_in_enqueue_order() {
    let remote = Arc::new(MockRemote::new());
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    engine.enqueue(MutationKind::Session, Action::Update, vec![2]).unwrap();
    engine.enqueue(MutationKind::Progress, Action::Delete, vec![3]).unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(engine.queue_status().pending, 3);

    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(payloads(&remote), vec![vec![1], vec![2], vec![3]]);

    let kinds: Vec<_> = remote.calls().into_iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![MutationKind::Answer, MutationKind::Session, MutationKind::Progress]
    );
    assert!(store.is_empty());
    assert_eq!(engine.metrics().successes, 3);
    assert_eq!(engine.queue_status().total, 0);
}

#[tokio::test(start_paused = true)]
async fn dead_letters_after_retry_budget() {
    let remote = Arc::new(MockRemote::failing(RemoteError::Network("unreachable".into())));
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());
    let mut events = engine.subscribe();

    let id = engine.enqueue(MutationKind::Answer, Action::Create, vec![7]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(remote.call_count(), 3);

    let dead = engine.dead_letter_items().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id(), id);
    assert_eq!(dead[0].reason, DeadLetterReason::ExhaustedRetries);
    assert_eq!(dead[0].item.retry_count, 3);
    assert_eq!(dead[0].original_kind, MutationKind::Answer);
    assert!(dead[0].item.last_error.as_deref().unwrap().contains("unreachable"));

    let metrics = engine.metrics();
    assert_eq!(metrics.failures, 3);
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.dead_letters, 1);
    assert_eq!(metrics.success_rate, 0.0);

    assert_eq!(
        events.try_recv().unwrap(),
        EngineEvent::ItemDeadLettered {
            item_id: id,
            reason: DeadLetterReason::ExhaustedRetries
        }
    );
    assert_eq!(events.try_recv().unwrap(), EngineEvent::QueueEmptied);
}

#[tokio::test(start_paused = true)]
async fn backoff_spaces_out_attempts() {
    let remote = Arc::new(MockRemote::new());
    remote.push_results([
        Err(RemoteError::Timeout),
        Err(RemoteError::server(503, "unavailable")),
    ]);
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    engine.enqueue(MutationKind::Statistics, Action::Update, vec![1]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);

    let calls = remote.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[1].at - calls[0].at >= Duration::from_secs(2));
    assert!(calls[2].at - calls[1].at >= Duration::from_secs(4));
    assert_eq!(engine.metrics().successes, 1);
    assert!(engine.dead_letter_items().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limit_hint_extends_backoff() {
    let remote = Arc::new(MockRemote::new());
    remote.push_result(Err(RemoteError::RateLimited {
        retry_after: Some(Duration::from_secs(20)),
    }));
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);

    let calls = remote.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].at - calls[0].at >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn unbounded_rate_limit_hint_is_capped() {
    let remote = Arc::new(MockRemote::new());
    remote.push_result(Err(RemoteError::RateLimited {
        retry_after: Some(Duration::MAX),
    }));
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);

    let calls = remote.calls();
    assert_eq!(calls.len(), 2);
    let waited = calls[1].at - calls[0].at;
    assert!(waited >= Duration::from_secs(24 * 60 * 60));
    assert!(waited < Duration::from_secs(24 * 60 * 60 + 1));
}

#[tokio::test]
async fn rejected_payload_is_dead_lettered_at_once() {
    let remote = Arc::new(MockRemote::new());
    remote.push_result(Err(RemoteError::Validation("missing card id".into())));
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    engine.enqueue(MutationKind::Answer, Action::Create, vec![2]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);

    assert_eq!(remote.call_count(), 2);
    let dead = engine.dead_letter_items().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::Rejected);
    assert_eq!(dead[0].item.payload, vec![1]);
    assert!(!engine.circuit_state().is_open);
}

#[tokio::test]
async fn rejected_payloads_trip_circuit() {
    let remote = Arc::new(MockRemote::failing(RemoteError::Validation("schema".into())));
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    for i in 0..8u8 {
        engine.enqueue(MutationKind::Answer, Action::Create, vec![i]).unwrap();
    }
    assert!(matches!(engine.drain().await, DrainOutcome::CircuitOpen { .. }));

    assert_eq!(remote.call_count(), 5);
    let circuit = engine.circuit_state();
    assert!(circuit.is_open);
    assert_eq!(circuit.consecutive_failures, 5);
    assert_eq!(engine.dead_letter_items().unwrap().len(), 5);
    assert_eq!(engine.queue_status().pending, 3);
}

#[tokio::test]
async fn auth_failure_blocks_until_resume() {
    let remote = Arc::new(MockRemote::new());
    remote.push_result(Err(RemoteError::server(401, "token expired")));
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());
    let mut events = engine.subscribe();

    let first = engine.enqueue(MutationKind::Session, Action::Update, vec![1]).unwrap();
    engine.enqueue(MutationKind::Session, Action::Update, vec![2]).unwrap();

    assert_eq!(engine.drain().await, DrainOutcome::AwaitingReauth);
    assert_eq!(remote.call_count(), 1);

    let status = engine.queue_status();
    assert!(status.awaiting_reauth);
    assert_eq!(status.pending, 2);
    let stored = store.get(first).unwrap();
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.status, ItemStatus::Pending);

    assert!(matches!(
        events.try_recv().unwrap(),
        EngineEvent::ReauthRequired { item_id, .. } if item_id == first
    ));
    assert_eq!(engine.drain().await, DrainOutcome::AwaitingReauth);
    assert_eq!(remote.call_count(), 1);

    engine.resume();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(payloads(&remote), vec![vec![1], vec![1], vec![2]]);
    assert_eq!(engine.circuit_state().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_blocks_until_single_probe() {
    let remote = Arc::new(MockRemote::failing(RemoteError::Network("down".into())));
    let store = Arc::new(MemoryQueueStore::new());
    let config = config()
        .with_retry(RetryConfig::new(10).without_jitter())
        .with_circuit(
            CircuitBreakerConfig::new()
                .with_failure_threshold(5)
                .with_reset_timeout(Duration::from_secs(30)),
        );
    let engine = SyncEngine::builder(Arc::clone(&remote), Arc::clone(&store))
        .config(config)
        .start()
        .unwrap();

    for i in 0..5u8 {
        engine.enqueue(MutationKind::Answer, Action::Create, vec![i]).unwrap();
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(remote.call_count(), 5);
    assert!(engine.circuit_state().is_open);
    assert!(engine.queue_status().circuit_open);
    assert_eq!(engine.health_status().status, HealthStatus::Unhealthy);

    tokio::time::sleep(Duration::from_secs(28)).await;
    assert_eq!(remote.call_count(), 5);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(remote.call_count(), 6);
    assert!(engine.circuit_state().is_open);

    tokio::time::sleep(Duration::from_secs(27)).await;
    assert_eq!(remote.call_count(), 6);
    assert_eq!(engine.metrics().circuit_trips, 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn successful_probe_closes_circuit() {
    let remote = Arc::new(MockRemote::new());
    remote.push_result(Err(RemoteError::Network("blip".into())));
    let store = Arc::new(MemoryQueueStore::new());
    let config = config().with_circuit(
        CircuitBreakerConfig::new()
            .with_failure_threshold(1)
            .with_reset_timeout(Duration::from_secs(30)),
    );
    let engine = engine_with(&remote, &store, config);
    let mut events = engine.subscribe();

    engine.enqueue(MutationKind::Progress, Action::Update, vec![1]).unwrap();
    let retry_at = match engine.drain().await {
        DrainOutcome::CircuitOpen { retry_at } => retry_at,
        other => panic!("expected open circuit, got {other:?}"),
    };
    assert!(matches!(events.try_recv().unwrap(), EngineEvent::CircuitOpened { .. }));
    assert_eq!(engine.queue_status().failed, 1);

    tokio::time::sleep_until(retry_at).await;
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(events.try_recv().unwrap(), EngineEvent::CircuitClosed);
    assert!(!engine.circuit_state().is_open);
    assert_eq!(remote.call_count(), 2);
}

#[tokio::test]
async fn pause_stops_delivery() {
    let remote = Arc::new(MockRemote::new());
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    engine.pause();
    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Paused);
    assert_eq!(remote.call_count(), 0);
    assert!(engine.queue_status().paused);

    engine.resume();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(remote.call_count(), 1);
}

#[tokio::test]
async fn offline_gates_delivery() {
    let (online, signal) = network_channel(false);
    let remote = Arc::new(MockRemote::new());
    let engine = SyncEngine::builder(Arc::clone(&remote), MemoryQueueStore::new())
        .network(signal)
        .build();

    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Offline);
    assert!(!engine.queue_status().online);

    online.send(true).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(remote.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn coming_online_starts_delivery() {
    let (online, signal) = network_channel(false);
    let remote = Arc::new(MockRemote::new());
    let engine = SyncEngine::builder(Arc::clone(&remote), MemoryQueueStore::new())
        .network(signal)
        .start()
        .unwrap();

    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(remote.call_count(), 0);

    online.send(true).unwrap();
    engine.wait_until_empty(Duration::from_secs(5)).await.unwrap();
    assert_eq!(remote.call_count(), 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn online_transition_resets_failure_count() {
    let (online, signal) = network_channel(true);
    let remote = Arc::new(MockRemote::failing(RemoteError::Network("down".into())));
    let config = config().with_circuit(CircuitBreakerConfig::new().with_failure_threshold(1));
    let engine = SyncEngine::builder(Arc::clone(&remote), MemoryQueueStore::new())
        .config(config)
        .network(signal)
        .start()
        .unwrap();

    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.circuit_state().consecutive_failures, 1);
    assert!(engine.circuit_state().is_open);

    online.send(false).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    online.send(true).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let circuit = engine.circuit_state();
    assert_eq!(circuit.consecutive_failures, 0);
    assert!(circuit.is_open);
    assert_eq!(remote.call_count(), 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn interrupted_drain_returns_item_to_head() {
    let remote = Arc::new(MockRemote::new());
    remote.set_latency(Duration::from_secs(10));
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());

    let first = engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    engine.enqueue(MutationKind::Answer, Action::Create, vec![2]).unwrap();

    let cut_short = tokio::time::timeout(Duration::from_secs(1), engine.drain()).await;
    assert!(cut_short.is_err());
    assert_eq!(engine.queue_status().in_flight, 1);
    assert_eq!(store.get(first).unwrap().status, ItemStatus::InFlight);

    remote.set_latency(Duration::ZERO);
    engine.pause();
    assert_eq!(engine.drain().await, DrainOutcome::Paused);
    let status = engine.queue_status();
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.pending, 2);
    let stored = store.get(first).unwrap();
    assert_eq!(stored.status, ItemStatus::Pending);
    assert_eq!(stored.retry_count, 0);

    engine.resume();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(payloads(&remote), vec![vec![1], vec![1], vec![2]]);
    assert!(store.is_empty());
}

#[tokio::test]
async fn store_outage_keeps_items_in_memory() {
    let remote = Arc::new(MockRemote::new());
    let store = Arc::new(MemoryQueueStore::new());
    let engine = engine_with(&remote, &store, config());
    let mut events = engine.subscribe();

    engine.pause();
    store.set_unavailable(true);
    let id = engine.enqueue(MutationKind::Answer, Action::Create, vec![9]).unwrap();
    assert_eq!(engine.queue_status().memory_only, 1);
    assert!(matches!(
        events.try_recv().unwrap(),
        EngineEvent::StorageDegraded { .. }
    ));

    store.set_unavailable(false);
    assert_eq!(engine.drain().await, DrainOutcome::Paused);
    assert_eq!(engine.queue_status().memory_only, 0);
    assert_eq!(store.get(id).unwrap().payload, vec![9]);

    engine.resume();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert!(store.is_empty());
    assert_eq!(payloads(&remote), vec![vec![9]]);
}

#[tokio::test]
async fn delivered_item_is_not_reloaded_after_outage() {
    let remote = Arc::new(MockRemote::new());
    let store = Arc::new(MemoryQueueStore::new());
    store.set_unavailable(true);
    let engine = engine_with(&remote, &store, config());

    store.set_unavailable(false);
    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    store.set_unavailable(true);
    assert_eq!(engine.drain().await, DrainOutcome::Empty);

    store.set_unavailable(false);
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(payloads(&remote), vec![vec![1]]);
    assert!(store.is_empty());
    assert_eq!(engine.queue_status().memory_only, 0);
}

#[tokio::test]
async fn dead_letter_is_not_reloaded_after_outage() {
    let remote = Arc::new(MockRemote::failing(RemoteError::Validation("bad".into())));
    let store = Arc::new(MemoryQueueStore::new());
    store.set_unavailable(true);
    let engine = engine_with(&remote, &store, config());

    store.set_unavailable(false);
    let id = engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    store.set_unavailable(true);
    assert_eq!(engine.drain().await, DrainOutcome::Empty);

    store.set_unavailable(false);
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(remote.call_count(), 1);
    assert!(store.is_empty());

    let dead = engine.dead_letter_items().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id(), id);
    assert_eq!(store.dead_letter_count().unwrap(), 1);
}

#[tokio::test]
async fn retry_all_resets_failed_items() {
    let remote = Arc::new(MockRemote::failing(RemoteError::Network("down".into())));
    let store = Arc::new(MemoryQueueStore::new());
    let config = config().with_circuit(CircuitBreakerConfig::new().with_failure_threshold(1));
    let engine = engine_with(&remote, &store, config);

    let id = engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    assert!(matches!(engine.drain().await, DrainOutcome::CircuitOpen { .. }));
    assert_eq!(store.get(id).unwrap().retry_count, 1);
    assert_eq!(store.get(id).unwrap().status, ItemStatus::Failed);

    assert_eq!(engine.retry_all(), 1);
    let stored = store.get(id).unwrap();
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.status, ItemStatus::Pending);
    assert!(stored.last_error.is_none());
    assert!(!engine.circuit_state().is_open);

    remote.set_default(Ok(()));
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
}

#[tokio::test(start_paused = true)]
async fn slow_remote_times_out() {
    let remote = Arc::new(MockRemote::new());
    remote.set_latency(Duration::from_secs(20));
    let store = Arc::new(MemoryQueueStore::new());
    let config = config()
        .with_retry(RetryConfig::new(1))
        .with_attempt_timeout(Duration::from_secs(10));
    let engine = engine_with(&remote, &store, config);

    let started = Instant::now();
    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert!(started.elapsed() < Duration::from_secs(20));

    let dead = engine.dead_letter_items().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].item.last_error.as_deref(), Some("request timed out"));
}

#[tokio::test(start_paused = true)]
async fn one_item_in_flight_at_a_time() {
    let remote = Arc::new(MockRemote::new());
    remote.set_latency(Duration::from_millis(100));
    let engine = SyncEngine::builder(Arc::clone(&remote), MemoryQueueStore::new())
        .start()
        .unwrap();

    for i in 0..4u8 {
        engine.enqueue(MutationKind::Answer, Action::Create, vec![i]).unwrap();
    }
    engine.sync_now(Duration::from_secs(10)).await.unwrap();

    let calls = remote.calls();
    assert_eq!(calls.len(), 4);
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(100));
    }
    assert_eq!(engine.metrics().latency.samples, 4);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flush_timeout_reports_remaining() {
    let engine = SyncEngine::builder(MockRemote::new(), MemoryQueueStore::new()).build();
    engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();

    match engine.wait_until_empty(Duration::from_secs(1)).await {
        Err(SyncError::FlushTimeout { remaining, .. }) => assert_eq!(remaining, 1),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let engine = SyncEngine::builder(MockRemote::new(), MemoryQueueStore::new())
        .start()
        .unwrap();
    engine.shutdown().await;

    assert!(matches!(
        engine.enqueue(MutationKind::Answer, Action::Create, vec![1]),
        Err(SyncError::ShutDown)
    ));
    assert!(matches!(
        engine.sync_now(Duration::from_secs(1)).await,
        Err(SyncError::ShutDown)
    ));
}

#[test]
fn start_requires_runtime() {
    let result = SyncEngine::builder(MockRemote::new(), MemoryQueueStore::new()).start();
    assert!(matches!(result, Err(SyncError::NoRuntime)));
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MockRemote::new());

    {
        let store = FileQueueStore::open_dir(dir.path(), JournalOptions::default()).unwrap();
        let engine = SyncEngine::builder(Arc::clone(&remote), store).build();
        engine.enqueue(MutationKind::Answer, Action::Create, vec![1]).unwrap();
        engine.enqueue(MutationKind::PinOperation, Action::Delete, vec![2]).unwrap();
    }

    let store = FileQueueStore::open_dir(dir.path(), JournalOptions::default()).unwrap();
    let engine = SyncEngine::builder(Arc::clone(&remote), store).build();
    assert_eq!(engine.backlog(), 2);
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert_eq!(payloads(&remote), vec![vec![1], vec![2]]);
}

#[tokio::test(start_paused = true)]
async fn restored_item_resumes_backoff() {
    let store = Arc::new(MemoryQueueStore::new());
    let mut item = QueueItem::new(MutationKind::Answer, Action::Create, vec![1]);
    item.retry_count = 2;
    item.status = ItemStatus::Failed;
    item.last_attempt_at = Some(Timestamp::now());
    store.append(&item).unwrap();

    let remote = Arc::new(MockRemote::new());
    let engine = engine_with(&remote, &store, config());

    let started = Instant::now();
    assert_eq!(engine.drain().await, DrainOutcome::Empty);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(remote.call_count(), 1);
}

#[derive(Debug, Clone, Serialize)]
struct Note {
    id: u32,
    body: String,
    updated_at: Timestamp,
}

impl Versioned for Note {
    fn last_modified(&self) -> Timestamp {
        self.updated_at
    }
}

impl Keyed for Note {
    type Key = u32;

    fn key(&self) -> u32 {
        self.id
    }
}

fn note(id: u32, body: &str, updated_at: u64) -> Note {
    Note {
        id,
        body: body.into(),
        updated_at: Timestamp::from_millis(updated_at),
    }
}

#[tokio::test]
async fn conflicts_are_counted() {
    let engine = SyncEngine::builder(MockRemote::new(), MemoryQueueStore::new()).build();

    let resolution = engine.resolve_conflict(note(1, "draft", 10), note(1, "final", 20));
    assert_eq!(resolution.winner, Winner::Remote);
    assert_eq!(resolution.resolved.body, "final");
    assert_eq!(engine.metrics().conflicts, 1);

    let same = engine.resolve_conflict(note(1, "same", 10), note(1, "same", 10));
    assert!(!same.had_conflict());
    assert_eq!(engine.metrics().conflicts, 1);

    let batch = engine.resolve_conflicts(
        vec![note(1, "a", 30), note(2, "b", 10)],
        vec![note(1, "a2", 20), note(2, "b2", 40), note(3, "c", 5)],
    );
    assert_eq!(batch.items.len(), 3);
    assert_eq!(engine.metrics().conflicts, 3);
}
