use super::validate::{global_root, validate};
use super::{BroadcastOptions, Launch};
use crate::buffer::DeviceBuffer;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::work::WorkHandle;

impl ProcessGroup {
    /// In-place broadcast of buffer `opts.root_tensor` on process
    /// `opts.root_rank` into every buffer of every process.
    pub async fn broadcast<B: DeviceBuffer>(
        &self,
        buffers: &[B],
        opts: BroadcastOptions,
    ) -> Result<WorkHandle> {
        validate(buffers, buffers, 1, self.context().runtime().device_count())?;
        let root = global_root(opts.root_rank, opts.root_tensor, self.size(), buffers.len())?;
        self.collective("broadcast", buffers, buffers, 1, |backend, l: &Launch| {
            // SAFETY: in-place on a validated buffer of `count` elements.
            unsafe {
                backend.broadcast(l.send_ptr, l.recv_ptr, l.count, l.dtype, root, l.comm, l.stream)
            }
        })
        .await
    }
}
