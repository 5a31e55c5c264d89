//! # offsync Testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - Fixtures for temporary journal stores
//! - Property-based test generators using proptest
//! - Remotes that fail on a schedule or at a seeded rate
//! - Load and outage scenarios for the sync engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offsync_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn survives_flaky_network() {
//!     let remote = FlakyRemote::new().failing_every(10);
//!     let report = Scenario::new(100).run(remote).await;
//!     assert_eq!(report.dead_letters, 0);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;
pub mod scenario;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
    pub use crate::scenario::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::*;
pub use scenario::*;
