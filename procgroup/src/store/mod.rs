//! Coordination store consumed by process groups.
//!
//! The store is the only channel processes share before a communicator
//! exists. Process groups use it exclusively for the unique-id rendezvous.

mod memory;

pub use memory::MemoryStore;

use futures::future::BoxFuture;

use crate::error::Result;

/// Process-wide key/value store with a blocking `get`.
pub trait Store: Send + Sync {
    /// Publish `value` under `key`, waking any pending `get` for it.
    fn set<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Wait until `key` exists and return its value.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}
