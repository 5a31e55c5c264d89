//! Property-based test generators using proptest.

use offsync_engine::RemoteError;
use offsync_protocol::{Action, MutationKind, QueueItem};
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for generating mutation kinds, including custom ones.
pub fn mutation_kind_strategy() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        Just(MutationKind::Session),
        Just(MutationKind::Answer),
        Just(MutationKind::Statistics),
        Just(MutationKind::Progress),
        Just(MutationKind::PinOperation),
        prop::string::string_regex("[a-z][a-z_]{0,15}")
            .expect("Invalid regex")
            .prop_map(MutationKind::Custom),
    ]
}

/// Strategy for generating actions.
pub fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![Just(Action::Create), Just(Action::Update), Just(Action::Delete)]
}

/// Strategy for generating opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for generating fresh queue items.
pub fn queue_item_strategy() -> impl Strategy<Value = QueueItem> {
    (mutation_kind_strategy(), action_strategy(), payload_strategy())
        .prop_map(|(kind, action, payload)| QueueItem::new(kind, action, payload))
}

/// Strategy for generating remote errors of every class.
pub fn remote_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        Just(RemoteError::Network("connection reset".into())),
        Just(RemoteError::Timeout),
        (500u16..600).prop_map(|status| RemoteError::server(status, "server fault")),
        (400u16..500).prop_map(|status| RemoteError::server(status, "client fault")),
        (0u64..60).prop_map(|secs| RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
        }),
        Just(RemoteError::Validation("invalid payload".into())),
        Just(RemoteError::Authentication("token expired".into())),
    ]
}

/// Strategy for generating delivery outcomes that never need re-authentication.
///
/// Successes are weighted so most scripts eventually drain.
pub fn delivery_result_strategy() -> impl Strategy<Value = Result<(), RemoteError>> {
    prop_oneof![
        4 => Just(Ok(())),
        2 => Just(Err(RemoteError::Network("connection reset".into()))),
        1 => Just(Err(RemoteError::server(503, "unavailable"))),
        1 => Just(Err(RemoteError::RateLimited { retry_after: None })),
        1 => Just(Err(RemoteError::Validation("invalid payload".into()))),
    ]
}
