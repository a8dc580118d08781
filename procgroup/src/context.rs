use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::comm::CommBackend;
use crate::config::ProcessGroupConfig;
use crate::device::DeviceRuntime;
use crate::error::{ProcessGroupError, Result};

/// Process-wide state shared by every [`ProcessGroup`](crate::ProcessGroup)
/// of one process.
///
/// Create one at process start and hand it to each group. It owns the device
/// runtime, the communication library, the group-id counter and the table of
/// unique-id exchanges performed per group. Dropping the last reference tears
/// it down.
pub struct CommContext {
    runtime: Arc<dyn DeviceRuntime>,
    backend: Arc<dyn CommBackend>,
    config: ProcessGroupConfig,
    tracking: Mutex<GroupTracking>,
}

#[derive(Default)]
struct GroupTracking {
    next_group: u64,
    /// group id -> number of unique ids exchanged so far.
    exchanges: HashMap<String, u64>,
}

impl CommContext {
    pub fn new(
        runtime: Arc<dyn DeviceRuntime>,
        backend: Arc<dyn CommBackend>,
        config: ProcessGroupConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            backend,
            config,
            tracking: Mutex::new(GroupTracking::default()),
        })
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    pub fn backend(&self) -> &Arc<dyn CommBackend> {
        &self.backend
    }

    pub fn config(&self) -> &ProcessGroupConfig {
        &self.config
    }

    /// Number of process groups currently registered.
    pub fn live_groups(&self) -> usize {
        self.tracking.lock().map(|t| t.exchanges.len()).unwrap_or(0)
    }

    /// Assign the next construction-order group id.
    ///
    /// Every process must construct its groups in the same order for the ids
    /// to agree.
    pub(crate) fn register_next_group(&self) -> Result<String> {
        let mut t = self.lock_tracking()?;
        let id = loop {
            let candidate = t.next_group.to_string();
            t.next_group += 1;
            if !t.exchanges.contains_key(&candidate) {
                break candidate;
            }
        };
        t.exchanges.insert(id.clone(), 0);
        Ok(id)
    }

    /// Register a caller-chosen group id agreed on by all processes.
    pub(crate) fn register_group(&self, group_id: &str) -> Result<()> {
        let mut t = self.lock_tracking()?;
        if t.exchanges.contains_key(group_id) {
            return Err(ProcessGroupError::DuplicateGroupId {
                group_id: group_id.to_owned(),
            });
        }
        t.exchanges.insert(group_id.to_owned(), 0);
        Ok(())
    }

    pub(crate) fn release_group(&self, group_id: &str) {
        match self.tracking.lock() {
            Ok(mut t) => {
                t.exchanges.remove(group_id);
            }
            Err(_) => tracing::warn!(group_id, "group tracking lock poisoned on release"),
        }
    }

    /// Claim the next exchange number for `group_id`. Each claim yields a
    /// distinct, never reused store key suffix.
    pub(crate) fn next_exchange(&self, group_id: &str) -> Result<u64> {
        let mut t = self.lock_tracking()?;
        let count = t.exchanges.entry(group_id.to_owned()).or_insert(0);
        let current = *count;
        *count += 1;
        Ok(current)
    }

    fn lock_tracking(&self) -> Result<std::sync::MutexGuard<'_, GroupTracking>> {
        self.tracking
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("group tracking"))
    }
}
