//! # Blob Store
//!
//! Key-value adapter the vote service sits on.
//!
//! ## Requirements
//!
//! - Read returns the document plus an opaque version token
//! - Writes carry a precondition so racing writers cannot silently clobber
//!   each other; a failed precondition surfaces as [`StoreError::Conflict`]
//! - Transport failures surface as [`StoreError::Unavailable`] and are never
//!   retried here, the caller decides
//!
//! ## Implementation
//!
//! - Redis hash per key: `doc` holds the JSON blob, `ver` a counter bumped on
//!   every accepted write
//! - Conditional writes run as one Lua script so the compare and the set are
//!   atomic on the server
//! - [`MemoryStore`] mirrors the same contract in-process for tests and local
//!   runs without a Redis

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    Client, Script,
};
use thiserror::Error;

/// Opaque per-key version token, bumped on every accepted write.
pub type Version = u64;

/// Write guard evaluated atomically against the stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional write.
    None,
    /// The key must not exist yet.
    MustNotExist,
    /// The stored version must still match.
    MustMatchVersion(Version),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("version conflict")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Fetches a document and its version token, or `None` when absent.
    async fn read(&self, key: &str) -> Result<Option<(String, Version)>, StoreError>;

    /// Writes a document if the precondition holds, returning the new version.
    async fn write(
        &self,
        key: &str,
        document: &str,
        precondition: Precondition,
    ) -> Result<Version, StoreError>;
}

// Compare-and-set. ARGV[2] is '-' for unconditional, 'absent' for
// must-not-exist, otherwise the expected version. Returns -1 on conflict.
const CAS_SCRIPT: &str = r#"
local ver = redis.call('HGET', KEYS[1], 'ver')
local want = ARGV[2]
if want == 'absent' then
    if ver then return -1 end
elseif want ~= '-' then
    if not ver or ver ~= want then return -1 end
end
local next = (ver and tonumber(ver) or 0) + 1
redis.call('HSET', KEYS[1], 'doc', ARGV[1], 'ver', next)
return next
"#;

pub struct RedisStore {
    connection: ConnectionManager,
    cas: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Duration::from_millis(100));

        let client = Client::open(redis_url).map_err(unavailable)?;
        let connection = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(unavailable)?;

        Ok(Self {
            connection,
            cas: Script::new(CAS_SCRIPT),
        })
    }
}

#[async_trait]
impl AggregateStore for RedisStore {
    async fn read(&self, key: &str) -> Result<Option<(String, Version)>, StoreError> {
        let mut connection = self.connection.clone();
        let (doc, ver): (Option<String>, Option<Version>) = redis::cmd("HMGET")
            .arg(key)
            .arg("doc")
            .arg("ver")
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        Ok(doc.zip(ver))
    }

    async fn write(
        &self,
        key: &str,
        document: &str,
        precondition: Precondition,
    ) -> Result<Version, StoreError> {
        let want = match precondition {
            Precondition::None => "-".to_string(),
            Precondition::MustNotExist => "absent".to_string(),
            Precondition::MustMatchVersion(version) => version.to_string(),
        };

        let mut connection = self.connection.clone();
        let result: i64 = self
            .cas
            .key(key)
            .arg(document)
            .arg(want)
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;

        if result < 0 {
            return Err(StoreError::Conflict);
        }
        Ok(result as Version)
    }
}

fn unavailable(error: redis::RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

/// In-process store with the same conditional-write contract. Used by the
/// test suite and for running without a Redis.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Version)>>,
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<(String, Version)>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn write(
        &self,
        key: &str,
        document: &str,
        precondition: Precondition,
    ) -> Result<Version, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let current = entries.get(key).map(|(_, version)| *version);

        let satisfied = match precondition {
            Precondition::None => true,
            Precondition::MustNotExist => current.is_none(),
            Precondition::MustMatchVersion(version) => current == Some(version),
        };
        if !satisfied {
            return Err(StoreError::Conflict);
        }

        let next = current.unwrap_or(0) + 1;
        entries.insert(key.to_string(), (document.to_string(), next));
        Ok(next)
    }
}
