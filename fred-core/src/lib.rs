//! FReD node core
//!
//! Causally versioned keygroup storage with replication to peer nodes:
//! - `core_store`: versioned reads/writes over a pluggable backend
//! - `core_replication`: replica membership, relay and bootstrap
//! - `core_handler`: client- and peer-facing entry points

pub mod config;
pub mod core_handler;
pub mod core_replication;
pub mod core_store;
pub mod core_types;
pub mod logging;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use core_handler::{ExternalHandler, InternalHandler};
pub use core_types::{FredError, FredResult};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
