use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cudarc::driver::{CudaContext, CudaStream, DriverError, result, sys};
use procgroup::{
    DeviceIndex, DeviceRuntime, EventFlags, EventHandle, ProcessGroupError, Result, StreamHandle,
};

use crate::error::{NcclBackendError, driver_failed};

thread_local! {
    static CURRENT_DEVICE: Cell<DeviceIndex> = const { Cell::new(0) };
}

#[derive(Clone, Copy)]
struct RawEvent {
    device: DeviceIndex,
    event: sys::CUevent,
}

// SAFETY: CUDA event handles are process-wide and may be recorded, queried
// and destroyed from any thread.
unsafe impl Send for RawEvent {}
unsafe impl Sync for RawEvent {}

/// CUDA driver implementation of [`DeviceRuntime`].
///
/// Holds the primary context of every visible device. Streams and events are
/// kept in handle tables so the process group only ever sees opaque ids. The
/// current compute stream of a device is its default stream unless the
/// caller registers another one with [`set_current_stream`](Self::set_current_stream).
///
/// Collectives launch while holding [`allocator_mutex`](DeviceRuntime::allocator_mutex).
/// Caller allocators must hold the same lock around device frees; share one
/// with [`with_allocator_mutex`](Self::with_allocator_mutex) or lock
/// [`allocator_lock`](Self::allocator_lock).
pub struct CudaRuntime {
    contexts: Vec<Arc<CudaContext>>,
    next_handle: AtomicU64,
    streams: Mutex<HashMap<u64, Arc<CudaStream>>>,
    events: Mutex<HashMap<u64, RawEvent>>,
    current_streams: Mutex<HashMap<DeviceIndex, StreamHandle>>,
    allocator: Arc<Mutex<()>>,
}

impl CudaRuntime {
    pub fn new() -> Result<Self> {
        result::init().map_err(driver_failed("cuInit"))?;
        let count = result::device::get_count().map_err(driver_failed("cuDeviceGetCount"))?;
        let contexts = (0..count as usize)
            .map(CudaContext::new)
            .collect::<std::result::Result<Vec<_>, DriverError>>()
            .map_err(driver_failed("cuDevicePrimaryCtxRetain"))?;
        tracing::debug!(devices = contexts.len(), "retained primary contexts");
        Ok(Self {
            contexts,
            next_handle: AtomicU64::new(1),
            streams: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            current_streams: Mutex::new(HashMap::new()),
            allocator: Arc::new(Mutex::new(())),
        })
    }

    /// Serialize collective launches with an allocator that already owns
    /// `lock`.
    pub fn with_allocator_mutex(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.allocator = lock;
        self
    }

    /// Shared handle to the lock collectives hold while launching.
    pub fn allocator_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.allocator)
    }

    pub fn context(&self, device: DeviceIndex) -> Result<&Arc<CudaContext>> {
        self.contexts.get(device).ok_or_else(|| {
            NcclBackendError::InvalidDevice {
                device,
                count: self.contexts.len(),
            }
            .into()
        })
    }

    /// Track a caller-owned stream so it can be used as a compute stream.
    pub fn register_stream(&self, stream: Arc<CudaStream>) -> Result<StreamHandle> {
        let handle = self.next_handle();
        self.lock_streams()?.insert(handle, stream);
        Ok(StreamHandle(handle))
    }

    /// Make `stream` the compute stream collectives on `device` order after.
    pub fn set_current_stream(&self, device: DeviceIndex, stream: StreamHandle) -> Result<()> {
        self.context(device)?;
        self.stream(stream)?;
        self.lock_current_streams()?.insert(device, stream);
        Ok(())
    }

    /// The driver stream behind `handle`.
    pub fn stream(&self, handle: StreamHandle) -> Result<Arc<CudaStream>> {
        self.lock_streams()?.get(&handle.0).cloned().ok_or_else(|| {
            NcclBackendError::UnknownHandle {
                kind: "stream",
                handle: handle.0,
            }
            .into()
        })
    }

    fn event(&self, handle: EventHandle) -> Result<RawEvent> {
        let events = self
            .events
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("cuda events"))?;
        events.get(&handle.0).copied().ok_or_else(|| {
            NcclBackendError::UnknownHandle {
                kind: "event",
                handle: handle.0,
            }
            .into()
        })
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_streams(&self) -> Result<MutexGuard<'_, HashMap<u64, Arc<CudaStream>>>> {
        self.streams
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("cuda streams"))
    }

    fn lock_current_streams(&self) -> Result<MutexGuard<'_, HashMap<DeviceIndex, StreamHandle>>> {
        self.current_streams
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("cuda current streams"))
    }
}

impl DeviceRuntime for CudaRuntime {
    fn device_count(&self) -> usize {
        self.contexts.len()
    }

    fn current_device(&self) -> Result<DeviceIndex> {
        Ok(CURRENT_DEVICE.with(Cell::get))
    }

    fn set_device(&self, device: DeviceIndex) -> Result<()> {
        self.context(device)?
            .bind_to_thread()
            .map_err(driver_failed("cuCtxSetCurrent"))?;
        CURRENT_DEVICE.with(|d| d.set(device));
        Ok(())
    }

    fn current_stream(&self, device: DeviceIndex) -> Result<StreamHandle> {
        let ctx = self.context(device)?;
        let mut current = self.lock_current_streams()?;
        if let Some(&stream) = current.get(&device) {
            return Ok(stream);
        }
        let stream = self.register_stream(ctx.default_stream())?;
        current.insert(device, stream);
        Ok(stream)
    }

    fn create_stream(&self, device: DeviceIndex) -> Result<StreamHandle> {
        let stream = self
            .context(device)?
            .new_stream()
            .map_err(driver_failed("cuStreamCreate"))?;
        self.register_stream(stream)
    }

    fn destroy_stream(&self, stream: StreamHandle) -> Result<()> {
        // Dropping the last reference destroys the driver stream.
        self.lock_streams()?.remove(&stream.0);
        Ok(())
    }

    fn create_event(&self, device: DeviceIndex, flags: EventFlags) -> Result<EventHandle> {
        self.context(device)?
            .bind_to_thread()
            .map_err(driver_failed("cuCtxSetCurrent"))?;
        let cu_flags = if flags.disable_timing {
            sys::CUevent_flags::CU_EVENT_DISABLE_TIMING
        } else {
            sys::CUevent_flags::CU_EVENT_DEFAULT
        };
        let event = result::event::create(cu_flags).map_err(driver_failed("cuEventCreate"))?;
        let handle = self.next_handle();
        self.events
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("cuda events"))?
            .insert(handle, RawEvent { device, event });
        Ok(EventHandle(handle))
    }

    fn destroy_event(&self, event: EventHandle) -> Result<()> {
        let removed = self
            .events
            .lock()
            .map_err(|_| ProcessGroupError::LockPoisoned("cuda events"))?
            .remove(&event.0);
        if let Some(raw) = removed {
            self.context(raw.device)?
                .bind_to_thread()
                .map_err(driver_failed("cuCtxSetCurrent"))?;
            unsafe {
                result::event::destroy(raw.event).map_err(driver_failed("cuEventDestroy"))?;
            }
        }
        Ok(())
    }

    fn record_event(&self, event: EventHandle, stream: StreamHandle) -> Result<()> {
        let raw = self.event(event)?;
        let stream = self.stream(stream)?;
        unsafe {
            result::event::record(raw.event, stream.cu_stream())
                .map_err(driver_failed("cuEventRecord"))?;
        }
        Ok(())
    }

    fn query_event(&self, event: EventHandle) -> Result<bool> {
        let raw = self.event(event)?;
        match unsafe { result::event::query(raw.event) } {
            Ok(()) => Ok(true),
            Err(DriverError(sys::CUresult::CUDA_ERROR_NOT_READY)) => Ok(false),
            Err(e) => Err(driver_failed("cuEventQuery")(e).into()),
        }
    }

    fn stream_wait_event(&self, stream: StreamHandle, event: EventHandle) -> Result<()> {
        let raw = self.event(event)?;
        let stream = self.stream(stream)?;
        unsafe {
            result::stream::wait_event(
                stream.cu_stream(),
                raw.event,
                sys::CUevent_wait_flags::CU_EVENT_WAIT_DEFAULT,
            )
            .map_err(driver_failed("cuStreamWaitEvent"))?;
        }
        Ok(())
    }

    fn synchronize_event(&self, event: EventHandle) -> Result<()> {
        let raw = self.event(event)?;
        unsafe {
            result::event::synchronize(raw.event).map_err(driver_failed("cuEventSynchronize"))?;
        }
        Ok(())
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> Result<()> {
        let stream = self.stream(stream)?;
        unsafe {
            result::stream::synchronize(stream.cu_stream())
                .map_err(driver_failed("cuStreamSynchronize"))?;
        }
        Ok(())
    }

    fn allocator_mutex(&self) -> &Mutex<()> {
        &*self.allocator
    }
}

impl Drop for CudaRuntime {
    fn drop(&mut self) {
        let events = match self.events.get_mut() {
            Ok(events) => std::mem::take(events),
            Err(_) => return,
        };
        for (handle, raw) in events {
            let destroyed = self
                .contexts
                .get(raw.device)
                .map(|ctx| ctx.bind_to_thread())
                .transpose()
                .and_then(|_| unsafe { result::event::destroy(raw.event) });
            if let Err(e) = destroyed {
                tracing::warn!(event = handle, "failed to destroy event: {e}");
            }
        }
    }
}
