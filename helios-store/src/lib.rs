//! Helios coordination client
//!
//! Typed access to the hierarchical coordination store that holds all
//! authoritative Helios state. The store server is an external
//! collaborator; this crate defines the contract ([`CoordinationStore`]),
//! the error taxonomy, retry with capped exponential backoff, a typed JSON
//! client, and the in-process [`MemoryStore`] driver used for embedded
//! deployments and tests.

pub mod client;
pub mod error;
pub mod memory;
pub mod retry;
pub mod store;

pub use client::StoreClient;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use store::{
    CoordinationStore, CreateMode, SessionEvent, StoreOp, WatchEvent, WatchKind,
};
