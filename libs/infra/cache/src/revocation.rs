//! Logout markers. A JWT stays cryptographically valid until `exp`, so a
//! logout has to be enforced out-of-band: this sets a marker keyed on the
//! session id that the auth middleware checks on every request, with a TTL
//! matching the token's remaining lifetime so the marker never outlives the
//! token it revokes.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::instrument;
use uuid::Uuid;

use crate::client::CacheClient;
use crate::errors::CacheError;

fn key(session_id: Uuid) -> String {
    format!("revoked:session:{session_id}")
}

#[instrument(skip(cache))]
pub async fn revoke_session(cache: &CacheClient, session_id: Uuid, until: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), CacheError> {
    let ttl_seconds = (until - now).num_seconds().max(1) as u64;
    let mut conn = cache.conn();
    conn.set_ex::<_, _, ()>(key(session_id), 1, ttl_seconds).await?;
    Ok(())
}

#[instrument(skip(cache))]
pub async fn is_revoked(cache: &CacheClient, session_id: Uuid) -> Result<bool, CacheError> {
    let mut conn = cache.conn();
    let exists: bool = conn.exists(key(session_id)).await?;
    Ok(exists)
}
