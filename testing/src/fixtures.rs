//! Container-backed stores for integration tests.
//!
//! One container per backend is started lazily and shared by every test in
//! the binary. When Docker is unavailable the fixture is `None` and callers
//! skip. Pools and connections are opened per call because each
//! `#[tokio::test]` runs on its own runtime.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use acs_core::ZoneId;
use config::{PostgresConfig, RedisConfig};
use errors::StorageError;
use storage::{PostgresAttributeStore, RedisKeyValueStore};
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{id}")
}

/// A fresh zone per test so shared containers never see cross-test state.
pub fn unique_zone() -> ZoneId {
    ZoneId::new(unique_id("test-zone")).unwrap_or_default()
}

/// PostgreSQL container serving the attribute-entity store.
pub struct PostgresFixture {
    _container: ContainerAsync<Postgres>,
    config: PostgresConfig
}

impl PostgresFixture {
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    /// Connects a new pool and makes sure the entity tables exist.
    pub async fn attribute_store(&self) -> Result<PostgresAttributeStore, StorageError> {
        let store = PostgresAttributeStore::new(
            &self.config.connection_url(),
            self.config.pool_size,
            Duration::from_secs(self.config.timeout_seconds)
        )
        .await?;
        store.initialize_schema().await?;
        Ok(store)
    }
}

static POSTGRES: OnceCell<Option<PostgresFixture>> = OnceCell::const_new();

pub async fn postgres() -> Option<&'static PostgresFixture> {
    POSTGRES.get_or_init(start_postgres).await.as_ref()
}

async fn start_postgres() -> Option<PostgresFixture> {
    let mut config = PostgresConfig {
        database: "acs_test".to_string(),
        username: "acs".to_string(),
        password: "acs".to_string(),
        pool_size: 5,
        timeout_seconds: 10,
        ..PostgresConfig::default()
    };
    let container = Postgres::default()
        .with_db_name(&config.database)
        .with_user(&config.username)
        .with_password(&config.password)
        .start()
        .await
        .inspect_err(|e| tracing::warn!(error = ?e, "PostgreSQL container unavailable"))
        .ok()?;
    config.port = container.get_host_port_ipv4(5432).await.ok()?;

    tracing::info!(port = config.port, "Attribute store container ready");
    Some(PostgresFixture {
        _container: container,
        config
    })
}

/// Redis container serving decision and marker databases.
///
/// `config().marker_db` is shared by every caller; tests that flush pick
/// their own decision database.
pub struct RedisFixture {
    _container: ContainerAsync<Redis>,
    config: RedisConfig
}

impl RedisFixture {
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// A store on logical database `db`.
    pub async fn store(&self, db: u8) -> Result<RedisKeyValueStore, StorageError> {
        RedisKeyValueStore::new(&self.config.url_for_db(db)).await
    }

    /// The decision and marker stores a cache engine runs on, with
    /// decisions in `decision_db`.
    pub async fn cache_stores(
        &self,
        decision_db: u8
    ) -> Result<(RedisKeyValueStore, RedisKeyValueStore), StorageError> {
        if decision_db == self.config.marker_db {
            return Err(StorageError::ConnectionError {
                backend: "Redis".to_string(),
                reason: format!("decision db {decision_db} is the marker db")
            });
        }
        Ok((self.store(decision_db).await?, self.store(self.config.marker_db).await?))
    }
}

static REDIS: OnceCell<Option<RedisFixture>> = OnceCell::const_new();

pub async fn redis() -> Option<&'static RedisFixture> {
    REDIS.get_or_init(start_redis).await.as_ref()
}

async fn start_redis() -> Option<RedisFixture> {
    let container = Redis::default()
        .start()
        .await
        .inspect_err(|e| tracing::warn!(error = ?e, "Redis container unavailable"))
        .ok()?;
    let config = RedisConfig {
        port: container.get_host_port_ipv4(6379).await.ok()?,
        ..RedisConfig::default()
    };

    // The connection manager only returns once the server answers.
    if let Err(e) = RedisKeyValueStore::new(&config.url_for_db(config.marker_db)).await {
        tracing::warn!(error = %e, "Redis container not answering");
        return None;
    }

    tracing::info!(port = config.port, "Decision cache container ready");
    Some(RedisFixture {
        _container: container,
        config
    })
}
