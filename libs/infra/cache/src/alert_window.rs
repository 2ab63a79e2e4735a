//! Sliding-window state for duration-qualified alert conditions. A
//! condition that must "hold for N minutes" needs to remember when a
//! given metric first started satisfying its threshold for a
//! `(ruleId, deviceId, metric)` triple; this is exactly the kind of
//! process-local state the tenancy model forbids keeping in a handler, so
//! it lives here instead.

use redis::AsyncCommands;
use tracing::instrument;
use uuid::Uuid;

use crate::client::CacheClient;
use crate::errors::CacheError;

fn key(rule_id: Uuid, device_id: Uuid, metric: &str) -> String {
    format!("alertwindow:{rule_id}:{device_id}:{metric}")
}

/// Records that the metric held its threshold at `now_unix` if it wasn't
/// already holding, and returns the unix timestamp it first started
/// holding — the caller turns `now_unix - first_seen` into the
/// `continuousMinutes` value it feeds to `breeze_domain_alerts::evaluation`.
#[instrument(skip(cache))]
pub async fn mark_holding(cache: &CacheClient, rule_id: Uuid, device_id: Uuid, metric: &str, now_unix: i64, max_window_seconds: i64) -> Result<i64, CacheError> {
    let redis_key = key(rule_id, device_id, metric);
    let mut conn = cache.conn();
    let _: bool = conn.set_nx(&redis_key, now_unix).await?;
    conn.expire::<_, ()>(&redis_key, max_window_seconds).await?;
    let first_seen: i64 = conn.get(&redis_key).await?;
    Ok(first_seen)
}

/// Clears the window once the metric stops satisfying its threshold, so
/// it has to start accumulating from scratch the next time it does.
#[instrument(skip(cache))]
pub async fn clear(cache: &CacheClient, rule_id: Uuid, device_id: Uuid, metric: &str) -> Result<(), CacheError> {
    let redis_key = key(rule_id, device_id, metric);
    let mut conn = cache.conn();
    conn.del::<_, ()>(&redis_key).await?;
    Ok(())
}
