use crate::context::CommContext;
use crate::error::{ProcessGroupError, Result};
use crate::store::Store;
use crate::types::{Rank, UniqueId};

/// Store key for the `count`-th unique id exchanged by `group_id`.
pub(crate) fn exchange_key(group_id: &str, count: u64) -> String {
    format!("{group_id}_{count}")
}

/// Agree on one fresh unique id across every process of a group.
///
/// Rank 0 generates the id and publishes it; every other rank blocks on the
/// store until it appears. Each call consumes a new key, so all processes
/// must run the same sequence of exchanges.
pub(crate) async fn exchange_unique_id(
    ctx: &CommContext,
    store: &dyn Store,
    group_id: &str,
    rank: Rank,
) -> Result<UniqueId> {
    let count = ctx.next_exchange(group_id)?;
    let key = exchange_key(group_id, count);

    if rank == 0 {
        let id = ctx.backend().unique_id()?;
        store.set(&key, id.as_bytes()).await?;
        tracing::debug!(%key, "published unique id");
        Ok(id)
    } else {
        let timeout = ctx.config().store_timeout;
        let bytes = tokio::time::timeout(timeout, store.get(&key))
            .await
            .map_err(|_| ProcessGroupError::StoreTimeout {
                key: key.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })??;
        let id = UniqueId::from_bytes(&bytes)?;
        tracing::debug!(%key, rank, "received unique id");
        Ok(id)
    }
}
