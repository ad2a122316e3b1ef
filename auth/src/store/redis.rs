//! Redis record backend for server-held pending state.
//!
//! Records are stored as `handoff_pending:{id}` → bincode-serialized
//! [`PendingRecord`] with `SET EX`, and consumed with `GETDEL` so a record
//! is handed out at most once across every node sharing the instance.
//!
//! # Example
//!
//! ```no_run
//! use handoff_auth::config::HandoffConfig;
//! use handoff_auth::store::{RedisRecordBackend, ServerStateStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = RedisRecordBackend::new("redis://127.0.0.1:6379").await?;
//! let store = ServerStateStore::from_config(&HandoffConfig::from_env()?, backend)?;
//! # Ok(())
//! # }
//! ```

use super::server::RecordBackend;
use super::PendingRecord;
use crate::error::{AuthError, Result};
use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// `Redis`-backed pending records with atomic consumption.
#[derive(Clone)]
pub struct RedisRecordBackend {
    conn_manager: ConnectionManager,
}

impl RedisRecordBackend {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the connection cannot be set up.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AuthError::Storage(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AuthError::Storage(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }

    fn record_key(id: &str) -> String {
        format!("handoff_pending:{id}")
    }
}

impl std::fmt::Debug for RedisRecordBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRecordBackend").finish_non_exhaustive()
    }
}

impl RecordBackend for RedisRecordBackend {
    async fn insert(&self, id: &str, record: &PendingRecord, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let bytes = bincode::serialize(record)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize pending record: {e}")))?;

        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let ttl_seconds = ttl.num_seconds().max(1) as u64;

        let _: () = conn
            .set_ex(Self::record_key(id), bytes, ttl_seconds)
            .await
            .map_err(|e| AuthError::Storage(format!("Failed to store pending record: {e}")))?;

        tracing::debug!(ttl_seconds, "Stored pending record in Redis");
        Ok(())
    }

    async fn take(&self, id: &str) -> Result<Option<PendingRecord>> {
        let mut conn = self.conn_manager.clone();

        // GETDEL: concurrent completions race on one atomic command.
        let bytes: Option<Vec<u8>> = conn
            .get_del(Self::record_key(id))
            .await
            .map_err(|e| AuthError::Storage(format!("Failed to consume pending record: {e}")))?;

        bytes
            .map(|bytes| {
                bincode::deserialize(&bytes).map_err(|e| {
                    AuthError::Storage(format!("Failed to deserialize pending record: {e}"))
                })
            })
            .transpose()
    }
}
