use procgroup::{DeviceBuffer, DeviceIndex, ScalarType};

/// A dense, contiguous CUDA allocation described by its raw address.
///
/// For callers that manage device memory themselves (a tensor library, a
/// cudarc `CudaSlice`) and only need to hand it to a process group.
#[derive(Debug, Clone, Copy)]
pub struct RawDeviceBuffer {
    ptr: u64,
    device: DeviceIndex,
    scalar_type: ScalarType,
    numel: usize,
}

impl RawDeviceBuffer {
    /// # Safety
    /// `ptr` must address `numel * scalar_type.size_in_bytes()` bytes on
    /// `device`, and stay allocated until every collective issued on this
    /// buffer has completed.
    pub unsafe fn new(ptr: u64, device: DeviceIndex, scalar_type: ScalarType, numel: usize) -> Self {
        Self {
            ptr,
            device,
            scalar_type,
            numel,
        }
    }
}

impl DeviceBuffer for RawDeviceBuffer {
    fn device(&self) -> Option<DeviceIndex> {
        Some(self.device)
    }

    fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    fn numel(&self) -> usize {
        self.numel
    }

    fn data_ptr(&self) -> u64 {
        self.ptr
    }
}
