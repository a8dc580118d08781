use std::sync::Arc;

use super::runtime::SimMemory;
use crate::buffer::DeviceBuffer;
use crate::types::{DeviceIndex, ScalarType};

/// A buffer in simulated memory. Freed on drop.
pub struct SimTensor {
    memory: Arc<SimMemory>,
    ptr: u64,
    device: Option<DeviceIndex>,
    pub(crate) scalar_type: ScalarType,
    pub(crate) numel: usize,
    sparse: bool,
    contiguous: bool,
}

impl SimTensor {
    pub(crate) fn new(
        memory: Arc<SimMemory>,
        ptr: u64,
        device: Option<DeviceIndex>,
        scalar_type: ScalarType,
        numel: usize,
    ) -> Self {
        Self {
            memory,
            ptr,
            device,
            scalar_type,
            numel,
            sparse: false,
            contiguous: true,
        }
    }

    /// Report a sparse layout.
    pub fn into_sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Report a strided, non-contiguous layout.
    pub fn into_non_contiguous(mut self) -> Self {
        self.contiguous = false;
        self
    }

    pub fn ptr(&self) -> u64 {
        self.ptr
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.numel * self.scalar_type.size_in_bytes()
    }
}

impl DeviceBuffer for SimTensor {
    fn device(&self) -> Option<DeviceIndex> {
        self.device
    }

    fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    fn numel(&self) -> usize {
        self.numel
    }

    fn is_sparse(&self) -> bool {
        self.sparse
    }

    fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    fn data_ptr(&self) -> u64 {
        self.ptr
    }
}

impl Drop for SimTensor {
    fn drop(&mut self) {
        self.memory.free(self.ptr);
    }
}

impl std::fmt::Debug for SimTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimTensor")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("device", &self.device)
            .field("scalar_type", &self.scalar_type)
            .field("numel", &self.numel)
            .finish()
    }
}
