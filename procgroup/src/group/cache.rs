use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use super::key::DeviceKey;
use crate::comm::{CommBackend, grouped};
use crate::device::{DeviceGuard, DeviceRuntime};
use crate::error::{ProcessGroupError, Result};
use crate::types::{CommHandle, DeviceIndex, EventFlags, EventHandle, Rank, StreamHandle, UniqueId};

/// Communicators, dedicated communication streams and sync events for one
/// ordered device set. Entry `i` of every vector belongs to `devices()[i]`.
///
/// Never mutated after creation. Dropping it destroys every handle it owns.
pub struct CommunicatorBundle {
    key: DeviceKey,
    devices: Vec<DeviceIndex>,
    comms: Vec<CommHandle>,
    streams: Vec<StreamHandle>,
    events: Vec<EventHandle>,
    runtime: Arc<dyn DeviceRuntime>,
    backend: Arc<dyn CommBackend>,
}

impl CommunicatorBundle {
    /// Open one communicator per device against the shared `id`.
    ///
    /// Device `i` joins as global rank `rank * n + i` of a world of
    /// `size * n`, where `n` is the number of devices. All communicator
    /// creations share one grouped bracket.
    pub(crate) fn open(
        runtime: Arc<dyn DeviceRuntime>,
        backend: Arc<dyn CommBackend>,
        id: &UniqueId,
        rank: Rank,
        size: u32,
        key: DeviceKey,
        devices: &[DeviceIndex],
    ) -> Result<Self> {
        let n = devices.len();
        let world_size = size as usize * n;

        // Handles are pushed as they are created so a failure part-way through
        // releases the ones already opened.
        let mut bundle = Self {
            key,
            devices: devices.to_vec(),
            comms: Vec::with_capacity(n),
            streams: Vec::with_capacity(n),
            events: Vec::with_capacity(n),
            runtime: Arc::clone(&runtime),
            backend: Arc::clone(&backend),
        };

        let guard = DeviceGuard::new(runtime.as_ref())?;
        grouped(backend.as_ref(), || {
            for (i, &device) in devices.iter().enumerate() {
                guard.set(device)?;
                let global_rank = rank as usize * n + i;
                bundle
                    .comms
                    .push(backend.init_rank(id, world_size, global_rank, device)?);
                bundle.streams.push(runtime.create_stream(device)?);
                bundle
                    .events
                    .push(runtime.create_event(device, EventFlags::DISABLE_TIMING)?);
            }
            Ok(())
        })?;
        drop(guard);

        Ok(bundle)
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn devices(&self) -> &[DeviceIndex] {
        &self.devices
    }

    pub fn comms(&self) -> &[CommHandle] {
        &self.comms
    }

    pub fn streams(&self) -> &[StreamHandle] {
        &self.streams
    }

    pub fn events(&self) -> &[EventHandle] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Drop for CommunicatorBundle {
    fn drop(&mut self) {
        for &comm in &self.comms {
            if let Err(e) = self.backend.destroy(comm) {
                tracing::warn!(key = %self.key, "failed to destroy communicator: {e}");
            }
        }
        for &stream in &self.streams {
            if let Err(e) = self.runtime.destroy_stream(stream) {
                tracing::warn!(key = %self.key, "failed to destroy communication stream: {e}");
            }
        }
        for &event in &self.events {
            if let Err(e) = self.runtime.destroy_event(event) {
                tracing::warn!(key = %self.key, "failed to destroy sync event: {e}");
            }
        }
    }
}

type Slot = Arc<OnceCell<Arc<CommunicatorBundle>>>;

/// Device-set key -> bundle. Entries are created once and never evicted.
///
/// The map lock only guards slot lookup; bundle creation (which includes the
/// cross-process rendezvous) runs outside it, serialized per key by the slot.
#[derive(Default)]
pub(crate) struct CommunicatorCache {
    slots: Mutex<HashMap<DeviceKey, Slot>>,
}

impl CommunicatorCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Return the bundle for `key`, running `create` if no caller has
    /// created it yet. Concurrent callers for the same key share one
    /// creation.
    pub(crate) async fn get_or_create<F, Fut>(
        &self,
        key: &DeviceKey,
        create: F,
    ) -> Result<Arc<CommunicatorBundle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CommunicatorBundle>>,
    {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| ProcessGroupError::LockPoisoned("communicator cache"))?;
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        if let Some(bundle) = slot.get() {
            tracing::debug!(%key, "communicator cache hit");
            return Ok(Arc::clone(bundle));
        }

        let bundle = slot
            .get_or_try_init(|| async move { create().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(bundle))
    }

    /// Cached bundle for `key`, if it has been created.
    pub(crate) fn get(&self, key: &DeviceKey) -> Option<Arc<CommunicatorBundle>> {
        let slots = self.slots.lock().ok()?;
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of fully created bundles.
    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| slots.values().filter(|s| s.initialized()).count())
            .unwrap_or(0)
    }
}
