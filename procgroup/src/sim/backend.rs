use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use super::element::reduce_into;
use super::fabric::SimFabric;
use super::runtime::{SimRuntime, Task};
use crate::comm::CommBackend;
use crate::device::DeviceRuntime;
use crate::error::{ProcessGroupError, Result};
use crate::types::{CommHandle, DataType, DeviceIndex, ReduceOp, StreamHandle, UniqueId};

struct SimComm {
    clique: UniqueId,
    rank: usize,
    world_size: usize,
    device: DeviceIndex,
    /// Collectives issued so far; matches this call with its peers'.
    next_seq: u64,
}

#[derive(Default)]
struct PendingGroup {
    depth: usize,
    launches: Vec<(StreamHandle, Task)>,
}

#[derive(Clone, Copy)]
enum SimOp {
    AllReduce(ReduceOp),
    Broadcast { root: usize },
    Reduce { op: ReduceOp, root: usize },
    AllGather,
}

impl SimOp {
    /// What this rank's receive buffer holds afterwards, or `None` to leave
    /// it untouched.
    fn apply(self, parts: &[Vec<u8>], rank: usize, dtype: DataType) -> Result<Option<Vec<u8>>> {
        match self {
            SimOp::AllReduce(op) => reduce_all(parts, dtype, op).map(Some),
            SimOp::Broadcast { root } => Ok(Some(parts[root].clone())),
            SimOp::Reduce { op, root } if rank == root => reduce_all(parts, dtype, op).map(Some),
            SimOp::Reduce { .. } => Ok(None),
            SimOp::AllGather => Ok(Some(parts.concat())),
        }
    }
}

fn reduce_all(parts: &[Vec<u8>], dtype: DataType, op: ReduceOp) -> Result<Vec<u8>> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| ProcessGroupError::comm("reduction over an empty clique"))?;
    let mut acc = first.clone();
    for part in rest {
        reduce_into(&mut acc, part, dtype, op)?;
    }
    Ok(acc)
}

/// Communication library over a [`SimFabric`], for one simulated process.
///
/// Collectives are queued as stream work that reads the send buffer when the
/// stream reaches it, meets the peers on the fabric, and writes the receive
/// buffer. Calls made inside a group bracket are held back and launched
/// together when the outermost bracket closes.
pub struct SimBackend {
    runtime: Arc<SimRuntime>,
    fabric: Arc<SimFabric>,
    next_comm: AtomicU64,
    comms: Mutex<HashMap<u64, SimComm>>,
    groups: Mutex<HashMap<ThreadId, PendingGroup>>,
    comms_opened: AtomicUsize,
}

impl SimBackend {
    pub fn new(runtime: Arc<SimRuntime>, fabric: Arc<SimFabric>) -> Self {
        Self {
            runtime,
            fabric,
            next_comm: AtomicU64::new(1),
            comms: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            comms_opened: AtomicUsize::new(0),
        }
    }

    /// Group brackets currently open on the calling thread.
    pub fn group_depth(&self) -> usize {
        self.groups
            .lock()
            .ok()
            .and_then(|g| g.get(&thread::current().id()).map(|p| p.depth))
            .unwrap_or(0)
    }

    /// Communicators opened over the backend's lifetime.
    pub fn comms_opened(&self) -> usize {
        self.comms_opened.load(Ordering::SeqCst)
    }

    pub fn live_comms(&self) -> usize {
        self.comms.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lock_comms(&self) -> Result<MutexGuard<'_, HashMap<u64, SimComm>>> {
        self.comms
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim communicators"))
    }

    fn lock_groups(&self) -> Result<MutexGuard<'_, HashMap<ThreadId, PendingGroup>>> {
        self.groups
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("sim group state"))
    }

    fn launch(&self, stream: StreamHandle, task: Task) -> Result<()> {
        {
            let mut groups = self.lock_groups()?;
            if let Some(pending) = groups.get_mut(&thread::current().id()) {
                pending.launches.push((stream, task));
                return Ok(());
            }
        }
        self.runtime.enqueue(stream, task)
    }

    #[allow(clippy::too_many_arguments)]
    fn issue(
        &self,
        op: SimOp,
        send_ptr: u64,
        recv_ptr: u64,
        send_bytes: usize,
        dtype: DataType,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()> {
        let (clique, rank, world_size, seq) = {
            let mut comms = self.lock_comms()?;
            let c = comms
                .get_mut(&comm.0)
                .ok_or_else(|| ProcessGroupError::comm(format!("unknown communicator {}", comm.0)))?;
            if let SimOp::Broadcast { root } | SimOp::Reduce { root, .. } = op
                && root >= c.world_size
            {
                return Err(ProcessGroupError::comm(format!(
                    "invalid root {root} for world size {}",
                    c.world_size
                )));
            }
            let seq = c.next_seq;
            c.next_seq += 1;
            (c.clique.clone(), c.rank, c.world_size, seq)
        };

        let fabric = Arc::clone(&self.fabric);
        let memory = self.runtime.memory();
        self.launch(
            stream,
            Box::new(move || {
                let send = memory.read(send_ptr, send_bytes)?;
                let parts = fabric.exchange(&clique, seq, rank, world_size, send)?;
                match op.apply(&parts, rank, dtype)? {
                    Some(out) => memory.write(recv_ptr, &out),
                    None => Ok(()),
                }
            }),
        )
    }
}

impl CommBackend for SimBackend {
    fn unique_id(&self) -> Result<UniqueId> {
        Ok(self.fabric.unique_id())
    }

    fn init_rank(
        &self,
        id: &UniqueId,
        world_size: usize,
        rank: usize,
        device: DeviceIndex,
    ) -> Result<CommHandle> {
        if device >= self.runtime.device_count() {
            return Err(ProcessGroupError::comm(format!(
                "invalid device {device} for communicator"
            )));
        }
        self.fabric.join(id, world_size, rank)?;
        let handle = self.next_comm.fetch_add(1, Ordering::Relaxed);
        self.lock_comms()?.insert(
            handle,
            SimComm {
                clique: id.clone(),
                rank,
                world_size,
                device,
                next_seq: 0,
            },
        );
        self.comms_opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(rank, world_size, device, "sim communicator opened");
        Ok(CommHandle(handle))
    }

    fn destroy(&self, comm: CommHandle) -> Result<()> {
        let c = self
            .lock_comms()?
            .remove(&comm.0)
            .ok_or_else(|| ProcessGroupError::comm(format!("unknown communicator {}", comm.0)))?;
        self.fabric.leave(&c.clique, c.rank);
        tracing::debug!(rank = c.rank, device = c.device, "sim communicator destroyed");
        Ok(())
    }

    fn group_start(&self) -> Result<()> {
        self.lock_groups()?
            .entry(thread::current().id())
            .or_default()
            .depth += 1;
        Ok(())
    }

    fn group_end(&self) -> Result<()> {
        let launches = {
            let mut groups = self.lock_groups()?;
            let tid = thread::current().id();
            let pending = groups
                .get_mut(&tid)
                .ok_or_else(|| ProcessGroupError::comm("group_end without matching group_start"))?;
            pending.depth -= 1;
            if pending.depth > 0 {
                return Ok(());
            }
            groups.remove(&tid).map(|p| p.launches).unwrap_or_default()
        };
        for (stream, task) in launches {
            self.runtime.enqueue(stream, task)?;
        }
        Ok(())
    }

    unsafe fn all_reduce(
        &self,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()> {
        let bytes = count * dtype.size_in_bytes();
        self.issue(SimOp::AllReduce(op), send_ptr, recv_ptr, bytes, dtype, comm, stream)
    }

    unsafe fn broadcast(
        &self,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
        root: usize,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()> {
        let bytes = count * dtype.size_in_bytes();
        self.issue(SimOp::Broadcast { root }, send_ptr, recv_ptr, bytes, dtype, comm, stream)
    }

    unsafe fn reduce(
        &self,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: usize,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()> {
        let bytes = count * dtype.size_in_bytes();
        self.issue(SimOp::Reduce { op, root }, send_ptr, recv_ptr, bytes, dtype, comm, stream)
    }

    unsafe fn all_gather(
        &self,
        send_ptr: u64,
        recv_ptr: u64,
        send_count: usize,
        dtype: DataType,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()> {
        let bytes = send_count * dtype.size_in_bytes();
        self.issue(SimOp::AllGather, send_ptr, recv_ptr, bytes, dtype, comm, stream)
    }
}
