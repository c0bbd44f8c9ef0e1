//! Test utilities for FReD
//!
//! Fixtures, a recording peer client, a store that fails on demand and an
//! in-process cluster wired through the internal handlers.

pub mod failing_store;
pub mod fixtures;
pub mod loopback;
pub mod recording_client;

pub use failing_store::FailingStore;
pub use fixtures::*;
pub use loopback::{ClusterNode, LoopbackClient, LoopbackCluster};
pub use recording_client::{Call, RecordingClient};
