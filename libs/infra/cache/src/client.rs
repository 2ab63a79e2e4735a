use redis::aio::ConnectionManager;
use tracing::{info, instrument};

use crate::errors::CacheError;

/// A handle to the shared Redis instance. `ConnectionManager` reconnects
/// transparently, so this is cheap to clone and safe to hold for the life
/// of the process rather than re-dialing per request.
#[derive(Clone)]
pub struct CacheClient {
    conn: ConnectionManager,
}

impl CacheClient {
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        info!("connecting to cache at {url}");
        let client = redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}
