use std::sync::Mutex;

use crate::error::Result;
use crate::types::{DeviceIndex, EventFlags, EventHandle, StreamHandle};

/// The device runtime consumed by process groups: streams, events and the
/// per-thread current device.
///
/// Streams and events are referred to by opaque handles owned by the runtime.
/// All enqueueing calls return as soon as the work is queued.
pub trait DeviceRuntime: Send + Sync {
    /// Number of devices visible to this process.
    fn device_count(&self) -> usize;

    /// Device the calling thread currently targets.
    fn current_device(&self) -> Result<DeviceIndex>;

    /// Make subsequent calls on this thread target `device`.
    fn set_device(&self, device: DeviceIndex) -> Result<()>;

    /// The stream the caller's compute work is currently enqueued on.
    fn current_stream(&self, device: DeviceIndex) -> Result<StreamHandle>;

    fn create_stream(&self, device: DeviceIndex) -> Result<StreamHandle>;

    fn destroy_stream(&self, stream: StreamHandle) -> Result<()>;

    fn create_event(&self, device: DeviceIndex, flags: EventFlags) -> Result<EventHandle>;

    fn destroy_event(&self, event: EventHandle) -> Result<()>;

    /// Capture the current tail of `stream` into `event`.
    fn record_event(&self, event: EventHandle, stream: StreamHandle) -> Result<()>;

    /// Non-blocking: whether all work captured by the last record has retired.
    fn query_event(&self, event: EventHandle) -> Result<bool>;

    /// Device-side dependency: work enqueued on `stream` after this call does
    /// not start until `event` (as last recorded) completes.
    fn stream_wait_event(&self, stream: StreamHandle, event: EventHandle) -> Result<()>;

    /// Block the calling thread until `event` (as last recorded) completes.
    fn synchronize_event(&self, event: EventHandle) -> Result<()>;

    /// Block the calling thread until everything queued on `stream` retires.
    fn synchronize_stream(&self, stream: StreamHandle) -> Result<()>;

    /// Mutex the device memory allocator holds while freeing. Collective
    /// issuance holds it so communication-library handshakes never interleave
    /// with an allocator free.
    fn allocator_mutex(&self) -> &Mutex<()>;
}

/// Switches the calling thread between devices and restores the original
/// device when dropped.
pub struct DeviceGuard<'a> {
    runtime: &'a dyn DeviceRuntime,
    original: DeviceIndex,
}

impl<'a> DeviceGuard<'a> {
    pub fn new(runtime: &'a dyn DeviceRuntime) -> Result<Self> {
        let original = runtime.current_device()?;
        Ok(Self { runtime, original })
    }

    pub fn set(&self, device: DeviceIndex) -> Result<()> {
        self.runtime.set_device(device)
    }

    pub fn original(&self) -> DeviceIndex {
        self.original
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.set_device(self.original) {
            tracing::warn!(device = self.original, "failed to restore current device: {e}");
        }
    }
}
