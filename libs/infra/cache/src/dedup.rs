//! Cooldown markers for alert firing. `AlertRepository::find_active` and
//! `find_last_resolved` are the source of truth for dedup decisions, but the
//! evaluation sweep runs once per polling interval over every enabled rule
//! across every device, so a cache-side short-circuit avoids a DB round trip
//! for the overwhelming majority of evaluations that don't cross threshold.

use redis::AsyncCommands;
use tracing::instrument;
use uuid::Uuid;

use crate::client::CacheClient;
use crate::errors::CacheError;

fn key(rule_id: Uuid, device_id: Uuid) -> String {
    format!("alertcooldown:{rule_id}:{device_id}")
}

/// Returns `true` and sets the marker if no cooldown is active; returns
/// `false` without touching the marker if one is. This is the same
/// check-then-set the unique-constraint pattern uses at the DB layer, just
/// fronted by Redis so the DB isn't hit on every sweep tick.
#[instrument(skip(cache))]
pub async fn try_start_cooldown(
    cache: &CacheClient,
    rule_id: Uuid,
    device_id: Uuid,
    cooldown_seconds: i64,
) -> Result<bool, CacheError> {
    let mut conn = cache.conn();
    let set: bool = redis::cmd("SET")
        .arg(key(rule_id, device_id))
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(cooldown_seconds)
        .query_async(&mut conn)
        .await
        .map(|v: Option<String>| v.is_some())?;
    Ok(set)
}

#[instrument(skip(cache))]
pub async fn clear_cooldown(cache: &CacheClient, rule_id: Uuid, device_id: Uuid) -> Result<(), CacheError> {
    let mut conn = cache.conn();
    conn.del::<_, ()>(key(rule_id, device_id)).await?;
    Ok(())
}
