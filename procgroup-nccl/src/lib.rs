//! CUDA driver runtime and NCCL communication library for `procgroup`.
//!
//! [`CudaRuntime`] implements [`procgroup::DeviceRuntime`] on the CUDA driver
//! API and [`NcclBackend`] implements [`procgroup::CommBackend`] on NCCL. Both
//! use cudarc's `result` layer directly, since `procgroup` passes device
//! memory around as raw `u64` addresses.

pub mod backend;
pub mod buffer;
pub mod error;
pub mod runtime;
pub mod types;

use std::sync::Arc;

use procgroup::{CommContext, DeviceRuntime, ProcessGroupConfig};

pub use backend::NcclBackend;
pub use buffer::RawDeviceBuffer;
pub use error::NcclBackendError;
pub use runtime::CudaRuntime;
pub use types::{to_nccl_dtype, to_nccl_op};

/// Process-wide context over every visible CUDA device.
///
/// Call once per process; hand the result to each
/// [`ProcessGroup`](procgroup::ProcessGroup).
pub fn cuda_context(config: ProcessGroupConfig) -> procgroup::Result<Arc<CommContext>> {
    let runtime = Arc::new(CudaRuntime::new()?);
    let backend = Arc::new(NcclBackend::new(Arc::clone(&runtime)));
    tracing::info!(devices = runtime.device_count(), "cuda context ready");
    Ok(CommContext::new(runtime, backend, config))
}
