use std::collections::BTreeSet;

use acs_core::traits::KeyValueStore;
use async_trait::async_trait;
use errors::StorageError;
use redis::AsyncCommands;

const BACKEND: &str = "Redis";

fn query_error(e: redis::RedisError) -> StorageError {
    StorageError::QueryError {
        backend: BACKEND.to_string(),
        reason: e.to_string()
    }
}

/// Decision cache backing store over one Redis logical database.
///
/// Decisions and invalidation markers are expected to use two instances on
/// different databases so `FLUSHDB` on the decision side never drops markers.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    connection_manager: redis::aio::ConnectionManager
}

impl RedisKeyValueStore {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(connection_string).map_err(|e| StorageError::ConnectionError {
                backend: BACKEND.to_string(),
                reason: e.to_string()
            })?;

        let connection_manager =
            client
                .get_connection_manager()
                .await
                .map_err(|e| StorageError::ConnectionError {
                    backend: BACKEND.to_string(),
                    reason: e.to_string()
                })?;

        tracing::info!(url = connection_string, "Connected decision cache store");
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.connection_manager.clone();
        conn.get(key).await.map_err(query_error)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection_manager.clone();
        redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(query_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.connection_manager.clone();
        conn.set(key, value).await.map_err(query_error)
    }

    async fn multi_set(&self, entries: &[(String, String)]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("MSET");
        for (key, value) in entries {
            cmd.arg(key).arg(value);
        }
        cmd.query_async(&mut conn).await.map_err(query_error)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection_manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(query_error)?;
        Ok(result.is_some())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection_manager.clone();
        let _: i64 = conn.del(keys).await.map_err(query_error)?;
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(query_error)
    }

    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>, StorageError> {
        let mut conn = self.connection_manager.clone();
        let keys: Vec<String> = conn.keys(pattern).await.map_err(query_error)?;
        Ok(keys.into_iter().collect())
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> Result<(), StorageError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection_manager.clone();
        let _: i64 = conn.sadd(key, members).await.map_err(query_error)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StorageError> {
        let mut conn = self.connection_manager.clone();
        conn.smembers(key).await.map_err(query_error)
    }
}
