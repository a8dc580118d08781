use crate::error::Result;
use crate::types::{CommHandle, DataType, DeviceIndex, ReduceOp, StreamHandle, UniqueId};

/// The collective communication library consumed by process groups.
///
/// Ranks passed here are global ranks in the flattened
/// `process_rank * devices_per_process + local_index` space. Collective calls
/// only enqueue work on `stream`; completion is observed through device
/// events.
pub trait CommBackend: Send + Sync {
    /// Generate a fresh communication-context identifier. Only the root
    /// process of a rendezvous calls this.
    fn unique_id(&self) -> Result<UniqueId>;

    /// Open this participant's communicator on `device`.
    fn init_rank(
        &self,
        id: &UniqueId,
        world_size: usize,
        rank: usize,
        device: DeviceIndex,
    ) -> Result<CommHandle>;

    fn destroy(&self, comm: CommHandle) -> Result<()>;

    /// Open a grouped bracket; calls until the matching `group_end` are
    /// batched into one launch.
    fn group_start(&self) -> Result<()>;

    fn group_end(&self) -> Result<()>;

    /// # Safety
    /// Both pointers must be valid device addresses on the communicator's
    /// device for `count * dtype.size_in_bytes()` bytes until the work retires.
    #[allow(clippy::too_many_arguments)]
    unsafe fn all_reduce(
        &self,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()>;

    /// Copy `count` elements from global rank `root` to every participant.
    ///
    /// # Safety
    /// Both pointers must be valid device addresses for `count` elements until
    /// the work retires.
    #[allow(clippy::too_many_arguments)]
    unsafe fn broadcast(
        &self,
        send_ptr: u64,
        recv_ptr: u64,
        count: usize,
        dtype: DataType,
        root: usize,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()>;

    /// Reduce into global rank `root`; other receivers are left untouched.
    ///
    /// # Safety
    /// Both pointers must be valid device addresses for `count` elements until
    /// the work retires.
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
    ) -> Result<()>;

    /// # Safety
    /// - `send_ptr`: `send_count * dtype.size_in_bytes()` bytes.
    /// - `recv_ptr`: `send_count * world_size * dtype.size_in_bytes()` bytes.
    unsafe fn all_gather(
        &self,
        send_ptr: u64,
        recv_ptr: u64,
        send_count: usize,
        dtype: DataType,
        comm: CommHandle,
        stream: StreamHandle,
    ) -> Result<()>;
}

/// Run `f` inside a `group_start`/`group_end` bracket.
///
/// The bracket is always closed, even when `f` fails; `f`'s error wins over a
/// `group_end` error.
pub fn grouped<T>(backend: &dyn CommBackend, f: impl FnOnce() -> Result<T>) -> Result<T> {
    backend.group_start()?;
    let out = f();
    let end = backend.group_end();
    let value = out?;
    end?;
    Ok(value)
}
