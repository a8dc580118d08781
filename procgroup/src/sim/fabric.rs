use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{ProcessGroupError, Result};
use crate::types::{UNIQUE_ID_BYTES, UniqueId};

const ID_TAG: &[u8; 8] = b"simfabid";

struct Clique {
    world_size: usize,
    members: HashSet<usize>,
}

/// One collective in flight: every participant's send buffer, in rank order.
struct Rendezvous {
    parts: Vec<Option<Vec<u8>>>,
    arrived: usize,
    complete: Option<Arc<Vec<Vec<u8>>>>,
    departed: usize,
}

/// The interconnect shared by every simulated process of a job.
///
/// Communicators that opened against the same unique id form a clique. Each
/// collective a clique runs is matched across members by its per-communicator
/// sequence number; a member's stream blocks in [`exchange`](Self::exchange)
/// until all members have contributed.
pub struct SimFabric {
    next_id: AtomicU64,
    timeout: Duration,
    cliques: Mutex<HashMap<UniqueId, Clique>>,
    ops: Mutex<HashMap<(UniqueId, u64), Rendezvous>>,
    arrivals: Condvar,
}

impl SimFabric {
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Fabric whose collectives fail if peers do not arrive within `timeout`.
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            timeout,
            cliques: Mutex::new(HashMap::new()),
            ops: Mutex::new(HashMap::new()),
            arrivals: Condvar::new(),
        })
    }

    pub(crate) fn unique_id(&self) -> UniqueId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; UNIQUE_ID_BYTES];
        bytes[..8].copy_from_slice(ID_TAG);
        bytes[8..16].copy_from_slice(&n.to_le_bytes());
        UniqueId::new(bytes)
    }

    pub(crate) fn join(&self, id: &UniqueId, world_size: usize, rank: usize) -> Result<()> {
        if rank >= world_size {
            return Err(ProcessGroupError::comm(format!(
                "invalid rank {rank} for world size {world_size}"
            )));
        }
        let mut cliques = self.lock_cliques()?;
        let clique = cliques.entry(id.clone()).or_insert_with(|| Clique {
            world_size,
            members: HashSet::new(),
        });
        if clique.world_size != world_size {
            return Err(ProcessGroupError::comm(format!(
                "world size mismatch: {id:?} has {} members, joining with {world_size}",
                clique.world_size
            )));
        }
        if !clique.members.insert(rank) {
            return Err(ProcessGroupError::comm(format!(
                "rank {rank} already joined {id:?}"
            )));
        }
        Ok(())
    }

    pub(crate) fn leave(&self, id: &UniqueId, rank: usize) {
        let Ok(mut cliques) = self.cliques.lock() else {
            tracing::warn!("sim fabric lock poisoned on leave");
            return;
        };
        if let Some(clique) = cliques.get_mut(id) {
            clique.members.remove(&rank);
            if clique.members.is_empty() {
                cliques.remove(id);
            }
        }
    }

    /// Number of cliques with at least one open communicator.
    pub fn live_cliques(&self) -> usize {
        self.cliques.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Contribute `data` to collective `seq` of clique `id` and block until
    /// every member has contributed. Returns all contributions in rank order.
    pub(crate) fn exchange(
        &self,
        id: &UniqueId,
        seq: u64,
        rank: usize,
        world_size: usize,
        data: Vec<u8>,
    ) -> Result<Arc<Vec<Vec<u8>>>> {
        let key = (id.clone(), seq);
        let mut ops = self.lock_ops()?;

        let slot = ops.entry(key.clone()).or_insert_with(|| Rendezvous {
            parts: vec![None; world_size],
            arrived: 0,
            complete: None,
            departed: 0,
        });
        if slot.parts.len() != world_size || rank >= world_size || slot.parts[rank].is_some() {
            return Err(ProcessGroupError::comm(format!(
                "mismatched collective {seq} on {id:?}: rank {rank} of {world_size}"
            )));
        }
        slot.parts[rank] = Some(data);
        slot.arrived += 1;
        if slot.arrived == world_size {
            let parts = slot.parts.iter_mut().map(|p| p.take().unwrap_or_default()).collect();
            slot.complete = Some(Arc::new(parts));
            self.arrivals.notify_all();
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let slot = ops
                .get_mut(&key)
                .ok_or_else(|| ProcessGroupError::comm(format!("collective {seq} vanished")))?;
            if let Some(all) = slot.complete.clone() {
                slot.departed += 1;
                if slot.departed == world_size {
                    ops.remove(&key);
                }
                return Ok(all);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ProcessGroupError::comm(format!(
                    "collective {seq} timed out: {} of {world_size} ranks arrived",
                    slot.arrived
                )));
            }
            ops = self
                .arrivals
                .wait_timeout(ops, deadline - now)
                .map_err(|_| ProcessGroupError::LockPoisoned("sim fabric"))?
                .0;
        }
    }

    fn lock_cliques(&self) -> Result<MutexGuard<'_, HashMap<UniqueId, Clique>>> {
        self.cliques
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim fabric"))
    }

    fn lock_ops(&self) -> Result<MutexGuard<'_, HashMap<(UniqueId, u64), Rendezvous>>> {
        self.ops
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim fabric"))
    }
}
