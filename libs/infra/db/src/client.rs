use std::sync::Arc;

use libsql::{params, Builder, Connection, Database};
use tracing::{error, info, instrument};

use crate::errors::DbError;
use crate::schema::apply_schema;

/// A handle to the relational store. Cheap to clone — connections are
/// obtained per-operation from the shared `Database` driver.
#[derive(Clone)]
pub struct DbClient {
    database: Arc<Database>,
    /// Keeps an in-memory database alive for the lifetime of the process;
    /// SQLite drops an in-memory database once its last connection closes,
    /// which would otherwise happen between requests.
    _memory_anchor: Option<Arc<Connection>>,
}

impl DbClient {
    #[instrument(skip(auth_token))]
    pub async fn connect(url: &str, auth_token: Option<String>) -> Result<Self, DbError> {
        if url.is_empty() {
            return Err(DbError::Configuration("DATABASE_URL is not set".into()));
        }

        info!("connecting to database at {url}");

        let is_remote = url.starts_with("libsql://") || url.starts_with("https://");
        let is_memory = url.contains(":memory:") || url.contains("mode=memory");

        let database = if is_remote {
            let token = auth_token
                .ok_or_else(|| DbError::Configuration("remote database requires an auth token".into()))?;
            Builder::new_remote(url.to_string(), token).build().await
        } else {
            Builder::new_local(url).build().await
        }
        .map_err(|e| DbError::Connection(e.to_string()))?;

        let database = Arc::new(database);
        let mut anchor = None;

        if is_memory {
            let conn = database
                .connect()
                .map_err(|e| DbError::Connection(format!("in-memory anchor: {e}")))?;
            apply_schema(&conn)
                .await
                .map_err(|e| DbError::Connection(format!("schema bootstrap: {e}")))?;
            anchor = Some(Arc::new(conn));
        } else {
            let conn = database
                .connect()
                .map_err(|e| DbError::Connection(format!("bootstrap connection: {e}")))?;
            apply_schema(&conn)
                .await
                .map_err(|e| DbError::Connection(format!("schema bootstrap: {e}")))?;
        }

        Ok(Self {
            database,
            _memory_anchor: anchor,
        })
    }

    pub fn conn(&self) -> Result<Connection, DbError> {
        self.database.connect().map_err(|e| {
            error!("failed to allocate a connection: {e}");
            DbError::Connection(e.to_string())
        })
    }

    /// A trivial round-trip query, for the readiness probe — cheap enough to
    /// run on every `/ready` poll without touching application tables.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.query("SELECT 1", params![]).await.map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(())
    }
}
