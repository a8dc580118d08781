//! Collective operations on a [`ProcessGroup`].
//!
//! Every collective follows the same issuance protocol: validate the buffers,
//! fetch (or create) the communicators for their device set, order the
//! communication streams after the callers' compute streams, launch one
//! grouped call per device, and record a completion event per device into
//! the returned [`WorkHandle`].

mod allgather;
mod allreduce;
mod broadcast;
mod reduce;
mod sync;
mod validate;

use std::sync::Arc;

use crate::buffer::DeviceBuffer;
use crate::comm::{CommBackend, grouped};
use crate::device::DeviceGuard;
use crate::error::{ProcessGroupError, Result};
use crate::group::{DeviceKey, ProcessGroup};
use crate::types::{CommHandle, DataType, Rank, ReduceOp, StreamHandle};
use crate::work::WorkHandle;
use sync::sync_streams;
use validate::{devices_of, validate};

#[derive(Debug, Clone, Copy, Default)]
pub struct AllreduceOptions {
    pub reduce_op: ReduceOp,
}

/// Source of a broadcast: buffer `root_tensor` of process `root_rank`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastOptions {
    pub root_rank: Rank,
    pub root_tensor: usize,
}

/// Destination of a reduce: buffer `root_tensor` of process `root_rank`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReduceOptions {
    pub reduce_op: ReduceOp,
    pub root_rank: Rank,
    pub root_tensor: usize,
}

/// Arguments for one device's call inside the grouped bracket.
pub(crate) struct Launch {
    pub send_ptr: u64,
    pub recv_ptr: u64,
    /// Elements per input buffer.
    pub count: usize,
    pub dtype: DataType,
    pub comm: CommHandle,
    pub stream: StreamHandle,
}

impl ProcessGroup {
    /// Run the issuance protocol for one collective.
    ///
    /// `launch` enqueues device `i`'s part on its communication stream; it is
    /// called once per device, in device-list order, inside one grouped
    /// bracket while the allocator mutex is held.
    pub(crate) async fn collective<I, O, F>(
        &self,
        op: &'static str,
        inputs: &[I],
        outputs: &[O],
        multiplier: usize,
        launch: F,
    ) -> Result<WorkHandle>
    where
        I: DeviceBuffer,
        O: DeviceBuffer,
        F: Fn(&dyn CommBackend, &Launch) -> Result<()>,
    {
        let ctx = Arc::clone(self.context());
        let runtime = ctx.runtime();
        let dtype = validate(inputs, outputs, multiplier, runtime.device_count())?;
        let devices = devices_of(inputs)?;
        let key = DeviceKey::from_devices(&devices);

        let bundle = self.acquire(&key, &devices).await?;

        sync_streams(runtime.as_ref(), &bundle)?;

        let work = WorkHandle::new(Arc::clone(runtime), &devices, ctx.config().blocking_wait)?;

        {
            let _free_lock = runtime
                .allocator_mutex()
                .lock()
                .map_err(|_| ProcessGroupError::LockPoisoned("allocator"))?;
            let guard = DeviceGuard::new(runtime.as_ref())?;
            let backend = ctx.backend().as_ref();

            grouped(backend, || {
                for (i, &device) in devices.iter().enumerate() {
                    guard.set(device)?;
                    launch(
                        backend,
                        &Launch {
                            send_ptr: inputs[i].data_ptr(),
                            recv_ptr: outputs[i].data_ptr(),
                            count: inputs[i].numel(),
                            dtype,
                            comm: bundle.comms()[i],
                            stream: bundle.streams()[i],
                        },
                    )?;
                }
                Ok(())
            })?;

            // Only after the bracket closes is the work on the streams.
            work.record(bundle.streams())?;
        }

        tracing::debug!(op, %key, %dtype, group_id = %self.group_id(), "collective issued");
        Ok(work)
    }
}
