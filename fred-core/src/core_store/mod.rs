/*
    Store subsystem - causally versioned storage on top of a pluggable backend
*/

pub mod backend;
pub mod memory_store;
pub mod store_service;
pub mod version_cache;

pub use backend::Store;
pub use memory_store::MemoryStore;
pub use store_service::StoreService;
pub use version_cache::{LiveSet, VersionCache};

#[cfg(test)]
mod tests;
