/*
    Replication subsystem - replica membership and fan-out to peers
*/

pub mod client;
pub mod name_service;
pub mod replication_service;

pub use client::Client;
pub use name_service::{MemoryNameService, NameService};
pub use replication_service::{Keygroup, ReplicationService};

#[cfg(test)]
mod tests;
