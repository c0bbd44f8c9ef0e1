/*
    Shared data model for the store and replication layers
*/

pub mod errors;
pub mod types;
pub mod vector_clock;

pub use errors::{ErrorKind, FredError, FredResult};
pub use types::{
    validate_item_id, Expiry, Item, KeygroupName, Node, NodeId, Trigger,
};
pub use vector_clock::{ClockOrdering, VectorClock};
