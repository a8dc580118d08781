mod cache;
mod exchange;
mod key;

pub use cache::CommunicatorBundle;
pub use key::DeviceKey;

use std::sync::Arc;

use crate::context::CommContext;
use crate::error::{ProcessGroupError, Result};
use crate::store::Store;
use crate::types::{DeviceIndex, Rank};
use cache::CommunicatorCache;
use exchange::exchange_unique_id;

/// One process's membership in a group of `size` processes communicating
/// over their local devices.
///
/// Every process of the group must issue the same sequence of collectives
/// over device sets of the same length. Communicators for a device set are
/// created on first use and kept for the lifetime of the group.
pub struct ProcessGroup {
    ctx: Arc<CommContext>,
    store: Arc<dyn Store>,
    rank: Rank,
    size: u32,
    group_id: String,
    cache: CommunicatorCache,
}

impl ProcessGroup {
    /// Join a group whose id is this process's construction order within
    /// `ctx`. All processes must construct their groups in the same order.
    pub fn new(ctx: Arc<CommContext>, store: Arc<dyn Store>, rank: Rank, size: u32) -> Result<Self> {
        check_rank(rank, size)?;
        let group_id = ctx.register_next_group()?;
        Ok(Self::build(ctx, store, rank, size, group_id))
    }

    /// Join a group under an id every process agreed on out of band.
    pub fn with_group_id(
        ctx: Arc<CommContext>,
        store: Arc<dyn Store>,
        rank: Rank,
        size: u32,
        group_id: impl Into<String>,
    ) -> Result<Self> {
        check_rank(rank, size)?;
        let group_id = group_id.into();
        ctx.register_group(&group_id)?;
        Ok(Self::build(ctx, store, rank, size, group_id))
    }

    fn build(
        ctx: Arc<CommContext>,
        store: Arc<dyn Store>,
        rank: Rank,
        size: u32,
        group_id: String,
    ) -> Self {
        tracing::info!(%group_id, rank, size, "process group created");
        Self {
            ctx,
            store,
            rank,
            size,
            group_id,
            cache: CommunicatorCache::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn context(&self) -> &Arc<CommContext> {
        &self.ctx
    }

    /// Communicators for the ordered device list, created on first use.
    pub async fn communicators(
        &self,
        devices: &[DeviceIndex],
    ) -> Result<Arc<CommunicatorBundle>> {
        self.acquire(&DeviceKey::from_devices(devices), devices)
            .await
    }

    /// Fetch or create the bundle for `key`.
    ///
    /// On a miss this runs one unique-id rendezvous with the other processes
    /// and opens one communicator per device. On a hit it returns the cached
    /// bundle without touching the store or the devices.
    pub async fn acquire(
        &self,
        key: &DeviceKey,
        devices: &[DeviceIndex],
    ) -> Result<Arc<CommunicatorBundle>> {
        if devices.is_empty() {
            return Err(ProcessGroupError::EmptyDeviceList);
        }
        if key.is_empty() || *key != DeviceKey::from_devices(devices) {
            return Err(ProcessGroupError::InvalidDeviceKey {
                key: key.to_string(),
            });
        }

        self.cache
            .get_or_create(key, move || async move {
                let id = exchange_unique_id(&self.ctx, self.store.as_ref(), &self.group_id, self.rank)
                    .await?;
                let bundle = CommunicatorBundle::open(
                    Arc::clone(self.ctx.runtime()),
                    Arc::clone(self.ctx.backend()),
                    &id,
                    self.rank,
                    self.size,
                    key.clone(),
                    devices,
                )?;
                tracing::info!(
                    group_id = %self.group_id,
                    %key,
                    world_size = self.size as usize * devices.len(),
                    "created communicators"
                );
                Ok(bundle)
            })
            .await
    }

    /// The cached bundle for `devices`, without creating one.
    pub fn cached_communicators(&self, devices: &[DeviceIndex]) -> Option<Arc<CommunicatorBundle>> {
        self.cache.get(&DeviceKey::from_devices(devices))
    }

    /// Number of device sets with live communicators.
    pub fn num_cached_communicators(&self) -> usize {
        self.cache.len()
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.ctx.release_group(&self.group_id);
        tracing::debug!(group_id = %self.group_id, "process group released");
    }
}

fn check_rank(rank: Rank, size: u32) -> Result<()> {
    if rank >= size {
        return Err(ProcessGroupError::InvalidRank { rank, size });
    }
    Ok(())
}
