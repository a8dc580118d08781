use super::Launch;
use crate::buffer::DeviceBuffer;
use crate::error::Result;
use crate::group::ProcessGroup;
use crate::work::WorkHandle;

impl ProcessGroup {
    /// Gather every buffer of every process into each output, ordered by
    /// global rank (`process rank * inputs.len() + local index`).
    ///
    /// `outputs[i]` lives on the device of `inputs[i]` and holds
    /// `size * inputs.len()` times as many elements.
    pub async fn allgather<I, O>(&self, outputs: &[O], inputs: &[I]) -> Result<WorkHandle>
    where
        I: DeviceBuffer,
        O: DeviceBuffer,
    {
        let multiplier = self.size() as usize * inputs.len();
        self.collective("allgather", inputs, outputs, multiplier, |backend, l: &Launch| {
            // SAFETY: the output was validated to hold `count * world_size`
            // elements.
            unsafe { backend.all_gather(l.send_ptr, l.recv_ptr, l.count, l.dtype, l.comm, l.stream) }
        })
        .await
    }
}
