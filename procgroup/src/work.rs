use std::sync::Arc;

use crate::device::{DeviceGuard, DeviceRuntime};
use crate::error::Result;
use crate::types::{DeviceIndex, EventFlags, EventHandle, StreamHandle};

/// Progress of an issued collective as observed from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    /// Enqueued; at least one device has not finished.
    Issued,
    /// Every device's part of the collective has retired.
    Completed,
}

/// Completion token for one collective call, backed by one event per device.
///
/// There is no failed state: communication-library and driver failures are
/// reported by the call that issued the collective, or by the query that
/// observes them, as an `Err`.
pub struct WorkHandle {
    runtime: Arc<dyn DeviceRuntime>,
    devices: Vec<DeviceIndex>,
    events: Vec<EventHandle>,
    blocking_wait: bool,
}

impl WorkHandle {
    /// Allocate one timing-disabled completion event per device.
    pub(crate) fn new(
        runtime: Arc<dyn DeviceRuntime>,
        devices: &[DeviceIndex],
        blocking_wait: bool,
    ) -> Result<Self> {
        let mut work = Self {
            runtime: Arc::clone(&runtime),
            devices: devices.to_vec(),
            events: Vec::with_capacity(devices.len()),
            blocking_wait,
        };
        let guard = DeviceGuard::new(runtime.as_ref())?;
        for &device in devices {
            guard.set(device)?;
            work.events
                .push(runtime.create_event(device, EventFlags::DISABLE_TIMING)?);
        }
        drop(guard);
        Ok(work)
    }

    /// Capture the tail of each device's communication stream. Must run after
    /// the grouped bracket that issued the collective has closed.
    pub(crate) fn record(&self, streams: &[StreamHandle]) -> Result<()> {
        debug_assert_eq!(streams.len(), self.events.len());
        for (&event, &stream) in self.events.iter().zip(streams) {
            self.runtime.record_event(event, stream)?;
        }
        Ok(())
    }

    pub fn devices(&self) -> &[DeviceIndex] {
        &self.devices
    }

    /// Non-blocking: true once every device's part has retired.
    pub fn poll(&self) -> Result<bool> {
        let guard = DeviceGuard::new(self.runtime.as_ref())?;
        for (&device, &event) in self.devices.iter().zip(&self.events) {
            guard.set(device)?;
            if !self.runtime.query_event(event)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn state(&self) -> Result<WorkState> {
        Ok(if self.poll()? {
            WorkState::Completed
        } else {
            WorkState::Issued
        })
    }

    /// Make each device's current compute stream wait for the collective.
    ///
    /// Returns immediately; compute work enqueued afterwards observes the
    /// collective's results.
    pub fn synchronize(&self) -> Result<()> {
        let guard = DeviceGuard::new(self.runtime.as_ref())?;
        for (&device, &event) in self.devices.iter().zip(&self.events) {
            guard.set(device)?;
            let stream = self.runtime.current_stream(device)?;
            self.runtime.stream_wait_event(stream, event)?;
        }
        Ok(())
    }

    /// [`synchronize`](Self::synchronize), then, with blocking wait enabled,
    /// block the calling thread until every device has finished.
    pub fn wait(&self) -> Result<()> {
        self.synchronize()?;
        if self.blocking_wait {
            let guard = DeviceGuard::new(self.runtime.as_ref())?;
            for (&device, &event) in self.devices.iter().zip(&self.events) {
                guard.set(device)?;
                self.runtime.synchronize_event(event)?;
            }
        }
        Ok(())
    }
}

impl Drop for WorkHandle {
    fn drop(&mut self) {
        for &event in &self.events {
            if let Err(e) = self.runtime.destroy_event(event) {
                tracing::warn!("failed to destroy work event: {e}");
            }
        }
    }
}

impl std::fmt::Debug for WorkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHandle")
            .field("devices", &self.devices)
            .field("events", &self.events)
            .field("blocking_wait", &self.blocking_wait)
            .finish()
    }
}
