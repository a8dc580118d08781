use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use super::Store;
use crate::error::{ProcessGroupError, Result};

/// In-process [`Store`] shared by every simulated process of a test or a
/// single-host job.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    changed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking lookup.
    pub fn try_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("memory store"))?;
        Ok(entries.get(key).cloned())
    }
}

impl Store for MemoryStore {
    fn set<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            {
                let mut entries = self
                    .entries
                    .lock()
                    .map_err(|_| ProcessGroupError::LockPoisoned("memory store"))?;
                entries.insert(key.to_owned(), value.to_vec());
            }
            self.changed.notify_waiters();
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            loop {
                // Register interest before checking so a `set` landing between
                // the check and the await is not missed.
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(value) = self.try_get(key)? {
                    return Ok(value);
                }
                notified.await;
            }
        })
    }
}
