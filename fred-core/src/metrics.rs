//! Metric names and descriptions
//!
//! Recording goes through the `metrics` facade; whichever recorder the
//! embedding binary installs receives the values.

use metrics::describe_counter;

pub const STORE_WRITES: &str = "fred.store.writes";
pub const STORE_CONFLICTS: &str = "fred.store.conflicts";
pub const STORE_PRUNE_FAILURES: &str = "fred.store.prune_failures";
pub const STORE_REMOTE_DISCARDED: &str = "fred.store.remote_discarded";
pub const REPLICATION_RELAYS: &str = "fred.replication.relays";
pub const REPLICATION_RELAY_FAILURES: &str = "fred.replication.relay_failures";

/// Register descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(STORE_WRITES, "Versioned writes and tombstones applied locally");
    describe_counter!(STORE_CONFLICTS, "Conditional writes rejected for a stale version");
    describe_counter!(STORE_PRUNE_FAILURES, "Superseded rows that could not be deleted");
    describe_counter!(STORE_REMOTE_DISCARDED, "Remote versions already covered locally");
    describe_counter!(REPLICATION_RELAYS, "Messages sent to peer replicas");
    describe_counter!(REPLICATION_RELAY_FAILURES, "Messages to peer replicas that failed");
}
