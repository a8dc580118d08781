use std::collections::HashMap;
use std::ffi::{c_char, c_void};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cudarc::nccl::safe::Id;
use cudarc::nccl::{group_end, group_start, result as nccl, sys};
use procgroup::{
    CommBackend, CommHandle, DataType, DeviceIndex, ProcessGroupError, ReduceOp, Result,
    StreamHandle, UNIQUE_ID_BYTES, UniqueId,
};

use crate::error::{NcclBackendError, nccl_failed};
use crate::runtime::CudaRuntime;
use crate::types::{to_nccl_dtype, to_nccl_op};

#[derive(Clone, Copy)]
struct RawComm {
    comm: sys::ncclComm_t,
    device: DeviceIndex,
}

// SAFETY: ncclComm_t is thread-safe per NCCL documentation when used with
// proper stream synchronization; every launch goes through a stream.
unsafe impl Send for RawComm {}
unsafe impl Sync for RawComm {}

/// NCCL implementation of [`CommBackend`].
///
/// Communicators live in a handle table and are destroyed on
/// [`destroy`](CommBackend::destroy); any still open when the backend drops
/// are aborted.
pub struct NcclBackend {
    runtime: Arc<CudaRuntime>,
    next_comm: AtomicU64,
    comms: Mutex<HashMap<u64, RawComm>>,
}

impl NcclBackend {
    pub fn new(runtime: Arc<CudaRuntime>) -> Self {
        Self {
            runtime,
            next_comm: AtomicU64::new(1),
            comms: Mutex::new(HashMap::new()),
        }
    }

    /// Number of communicators currently open.
    pub fn live_comms(&self) -> usize {
        self.comms.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lock_comms(&self) -> Result<MutexGuard<'_, HashMap<u64, RawComm>>> {
        self.comms
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("nccl communicators"))
    }

    fn comm(&self, handle: CommHandle) -> Result<sys::ncclComm_t> {
        self.lock_comms()?
            .get(&handle.0)
            .map(|raw| raw.comm)
            .ok_or_else(|| {
                NcclBackendError::UnknownHandle {
                    kind: "communicator",
                    handle: handle.0,
                }
                .into()
            })
    }

    fn take_comm(&self, handle: CommHandle) -> Result<RawComm> {
        self.lock_comms()?.remove(&handle.0).ok_or_else(|| {
            NcclBackendError::UnknownHandle {
                kind: "communicator",
                handle: handle.0,
            }
            .into()
        })
    }

    fn cu_stream(&self, stream: StreamHandle) -> Result<sys::cudaStream_t> {
        Ok(self.runtime.stream(stream)?.cu_stream() as sys::cudaStream_t)
    }
}

fn id_to_sys(id: &UniqueId) -> sys::ncclUniqueId {
    let mut internal = [0 as c_char; UNIQUE_ID_BYTES];
    for (dst, &b) in internal.iter_mut().zip(id.as_bytes()) {
        *dst = b as c_char;
    }
    sys::ncclUniqueId { internal }
}

impl CommBackend for NcclBackend {
    fn unique_id(&self) -> Result<UniqueId> {
        let id = Id::new().map_err(nccl_failed("ncclGetUniqueId"))?;
        let mut bytes = [0u8; UNIQUE_ID_BYTES];
        for (dst, &c) in bytes.iter_mut().zip(id.internal()) {
            *dst = c as u8;
        }
        Ok(UniqueId::new(bytes))
    }

    fn init_rank(
        &self,
        id: &UniqueId,
        world_size: usize,
        rank: usize,
        device: DeviceIndex,
    ) -> Result<CommHandle> {
        let mut comm = MaybeUninit::uninit();
        unsafe {
            nccl::comm_init_rank(comm.as_mut_ptr(), world_size as i32, id_to_sys(id), rank as i32)
                .map_err(nccl_failed("ncclCommInitRank"))?;
        }
        let comm = unsafe { comm.assume_init() };
        let handle = self.next_comm.fetch_add(1, Ordering::Relaxed);
        self.lock_comms()?.insert(handle, RawComm { comm, device });
        tracing::debug!(rank, world_size, device, "nccl communicator initialized");
        Ok(CommHandle(handle))
    }

    fn destroy(&self, comm: CommHandle) -> Result<()> {
        let raw = self.take_comm(comm)?;
        unsafe {
            nccl::comm_destroy(raw.comm).map_err(nccl_failed("ncclCommDestroy"))?;
        }
        Ok(())
    }

    fn group_start(&self) -> Result<()> {
        group_start().map_err(nccl_failed("ncclGroupStart"))?;
        Ok(())
    }

    fn group_end(&self) -> Result<()> {
        group_end().map_err(nccl_failed("ncclGroupEnd"))?;
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
        let comm = self.comm(comm)?;
        let stream = self.cu_stream(stream)?;
        unsafe {
            nccl::all_reduce(
                send_ptr as *const c_void,
                recv_ptr as *mut c_void,
                count,
                to_nccl_dtype(dtype),
                to_nccl_op(op),
                comm,
                stream,
            )
            .map_err(nccl_failed("ncclAllReduce"))?;
        }
        Ok(())
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
        let comm = self.comm(comm)?;
        let stream = self.cu_stream(stream)?;
        unsafe {
            nccl::broadcast(
                send_ptr as *const c_void,
                recv_ptr as *mut c_void,
                count,
                to_nccl_dtype(dtype),
                root as i32,
                comm,
                stream,
            )
            .map_err(nccl_failed("ncclBroadcast"))?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
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
        let comm = self.comm(comm)?;
        let stream = self.cu_stream(stream)?;
        unsafe {
            nccl::reduce(
                send_ptr as *const c_void,
                recv_ptr as *mut c_void,
                count,
                to_nccl_dtype(dtype),
                to_nccl_op(op),
                root as i32,
                comm,
                stream,
            )
            .map_err(nccl_failed("ncclReduce"))?;
        }
        Ok(())
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
        let comm = self.comm(comm)?;
        let stream = self.cu_stream(stream)?;
        unsafe {
            nccl::all_gather(
                send_ptr as *const c_void,
                recv_ptr as *mut c_void,
                send_count,
                to_nccl_dtype(dtype),
                comm,
                stream,
            )
            .map_err(nccl_failed("ncclAllGather"))?;
        }
        Ok(())
    }
}

impl Drop for NcclBackend {
    fn drop(&mut self) {
        let Ok(comms) = self.comms.get_mut() else {
            return;
        };
        for (handle, raw) in comms.drain() {
            tracing::warn!(comm = handle, device = raw.device, "aborting communicator left open");
            unsafe {
                // comm_abort does not wait on outstanding work.
                let _ = nccl::comm_abort(raw.comm);
            }
        }
    }
}
