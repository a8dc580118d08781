use crate::types::{DeviceIndex, ScalarType};

/// The view of a caller's tensor that collectives need.
///
/// Process groups never allocate or free buffers; they only read the
/// metadata below and hand `data_ptr` to the communication library.
///
/// Implementors guarantee that `data_ptr` addresses `size_in_bytes()` bytes
/// of memory on `device()`. The memory must stay valid until every
/// collective issued on the buffer has completed.
pub trait DeviceBuffer: Send + Sync {
    /// Local device the buffer lives on, or `None` for host memory.
    fn device(&self) -> Option<DeviceIndex>;

    fn scalar_type(&self) -> ScalarType;

    /// Number of elements (not bytes).
    fn numel(&self) -> usize;

    fn is_sparse(&self) -> bool {
        false
    }

    fn is_contiguous(&self) -> bool {
        true
    }

    /// Raw device address of the first element.
    fn data_ptr(&self) -> u64;

    fn size_in_bytes(&self) -> usize {
        self.numel() * self.scalar_type().size_in_bytes()
    }
}

impl<B: DeviceBuffer + ?Sized> DeviceBuffer for &B {
    fn device(&self) -> Option<DeviceIndex> {
        (**self).device()
    }

    fn scalar_type(&self) -> ScalarType {
        (**self).scalar_type()
    }

    fn numel(&self) -> usize {
        (**self).numel()
    }

    fn is_sparse(&self) -> bool {
        (**self).is_sparse()
    }

    fn is_contiguous(&self) -> bool {
        (**self).is_contiguous()
    }

    fn data_ptr(&self) -> u64 {
        (**self).data_ptr()
    }
}
