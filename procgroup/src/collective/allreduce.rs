use super::{AllreduceOptions, Launch};
use crate::buffer::DeviceBuffer;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::work::WorkHandle;

impl ProcessGroup {
    /// In-place allreduce: afterwards every buffer of every process holds the
    /// element-wise reduction of all of them.
    ///
    /// `buffers` must be dense, contiguous, of one element type and length,
    /// and on distinct devices. Their memory must stay valid until the
    /// returned work completes.
    pub async fn allreduce<B: DeviceBuffer>(
        &self,
        buffers: &[B],
        opts: AllreduceOptions,
    ) -> Result<WorkHandle> {
        let op = opts.reduce_op;
        self.collective("allreduce", buffers, buffers, 1, |backend, l: &Launch| {
            // SAFETY: send and receive are the same validated buffer of
            // `count` elements, kept alive by the caller until completion.
            unsafe {
                backend.all_reduce(l.send_ptr, l.recv_ptr, l.count, l.dtype, op, l.comm, l.stream)
            }
        })
        .await
    }
}
