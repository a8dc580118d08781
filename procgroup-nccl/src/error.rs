use cudarc::driver::DriverError;
use cudarc::nccl::result::NcclError;
use procgroup::{DeviceIndex, ProcessGroupError};

#[derive(Debug, thiserror::Error)]
pub enum NcclBackendError {
    #[error("{call} failed: {source}")]
    Driver {
        call: &'static str,
        source: DriverError,
    },

    #[error("{call} failed: {result:?}")]
    Nccl { call: &'static str, result: NcclError },

    #[error("unknown {kind} handle {handle}")]
    UnknownHandle { kind: &'static str, handle: u64 },

    #[error("device {device} out of range: {count} devices visible")]
    InvalidDevice { device: DeviceIndex, count: usize },
}

pub(crate) fn driver_failed(call: &'static str) -> impl FnOnce(DriverError) -> NcclBackendError {
    move |source| NcclBackendError::Driver { call, source }
}

pub(crate) fn nccl_failed(call: &'static str) -> impl FnOnce(NcclError) -> NcclBackendError {
    move |result| NcclBackendError::Nccl { call, result }
}

impl From<NcclBackendError> for ProcessGroupError {
    fn from(e: NcclBackendError) -> Self {
        let message = e.to_string();
        match e {
            NcclBackendError::Nccl { .. } => ProcessGroupError::comm_with_source(message, e),
            _ => ProcessGroupError::device_with_source(message, e),
        }
    }
}
