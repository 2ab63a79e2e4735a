//! Fixed-window counters for request throttling, keyed per bucket/identity
//! pair so login attempts, API key usage, and agent enrollment each get an
//! independent budget.

use redis::AsyncCommands;
use tracing::instrument;

use crate::client::CacheClient;
use crate::errors::CacheError;

fn key(bucket: &str, identity: &str, window_start: i64) -> String {
    format!("ratelimit:{bucket}:{identity}:{window_start}")
}

fn window_start(now_unix: i64, window_seconds: i64) -> i64 {
    now_unix - now_unix.rem_euclid(window_seconds)
}

pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u64,
    pub limit: u64,
}

/// Increments the counter for the window containing `now_unix` and compares
/// against `limit`. Windows are fixed-size, not sliding: a burst straddling
/// a window boundary can momentarily exceed `limit` by up to 2x, which is an
/// accepted tradeoff for not needing a sorted-set scan per check.
#[instrument(skip(cache))]
pub async fn check_and_increment(
    cache: &CacheClient,
    bucket: &str,
    identity: &str,
    limit: u64,
    window_seconds: i64,
    now_unix: i64,
) -> Result<RateLimitDecision, CacheError> {
    let redis_key = key(bucket, identity, window_start(now_unix, window_seconds));

    let mut conn = cache.conn();
    let count: u64 = conn.incr(&redis_key, 1u64).await?;
    if count == 1 {
        conn.expire::<_, ()>(&redis_key, window_seconds).await?;
    }

    Ok(RateLimitDecision {
        allowed: count <= limit,
        count,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_start_aligns_to_boundary() {
        assert_eq!(window_start(100, 60), 60);
        assert_eq!(window_start(119, 60), 60);
        assert_eq!(window_start(120, 60), 120);
    }

    #[test]
    fn window_start_handles_zero() {
        assert_eq!(window_start(0, 60), 0);
    }
}
