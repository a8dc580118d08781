use super::validate::{global_root, validate};
use super::{Launch, ReduceOptions};
use crate::buffer::DeviceBuffer;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::work::WorkHandle;

impl ProcessGroup {
    /// Reduce every buffer of every process into buffer `opts.root_tensor`
    /// of process `opts.root_rank`. Other buffers keep their contents.
    pub async fn reduce<B: DeviceBuffer>(&self, buffers: &[B], opts: ReduceOptions) -> Result<WorkHandle> {
        validate(buffers, buffers, 1, self.context().runtime().device_count())?;
        let root = global_root(opts.root_rank, opts.root_tensor, self.size(), buffers.len())?;
        let op = opts.reduce_op;
        self.collective("reduce", buffers, buffers, 1, |backend, l: &Launch| {
            // SAFETY: in-place on a validated buffer of `count` elements.
            unsafe {
                backend.reduce(l.send_ptr, l.recv_ptr, l.count, l.dtype, op, root, l.comm, l.stream)
            }
        })
        .await
    }
}
