//! Wires stores, resolver and cache together from a [`Config`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use acs_core::traits::{AttributeEntityStore, KeyValueStore, PolicyEvaluator};
use attributes::{HierarchicalAttributeResolver, ResolverSettings};
use config::{Config, ConfigReloadEvent};
use decision_cache::{CircuitBreakingDecisionCache, DecisionCache, DefaultDecisionCache, StaticConnectorService};
use errors::ServiceError;
use storage::{InMemoryAttributeStore, InMemoryKeyValueStore, PostgresAttributeStore, RedisKeyValueStore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::decision_point::CachedDecisionPoint;
use crate::privileges::PrivilegeManagementService;

fn configuration_error(message: impl std::fmt::Display) -> ServiceError {
    ServiceError::Configuration {
        message: message.to_string()
    }
}

/// The assembled access control core.
pub struct AccessControlRuntime {
    resolver: Arc<HierarchicalAttributeResolver>,
    cache: Arc<CircuitBreakingDecisionCache>,
    privileges: Arc<PrivilegeManagementService>
}

impl AccessControlRuntime {
    pub async fn from_config(config: &Config) -> Result<Self, ServiceError> {
        config::validate(config).map_err(|e| configuration_error(config::describe(&e).join("; ")))?;

        let entity_store = entity_store(config).await?;
        let (decisions, markers) = cache_stores(config).await?;
        let engine = DefaultDecisionCache::new(
            decisions,
            markers,
            Arc::new(StaticConnectorService::from_config(&config.connectors))
        );

        let runtime = Self::assemble(
            entity_store,
            Arc::new(engine),
            ResolverSettings::from(&config.attributes),
            config
        );
        info!(
            cache_backend = %config.cache.backend,
            cache_enabled = config.cache.enabled,
            attribute_backend = %config.attributes.backend,
            traversal_limit = config.attributes.traversal_limit,
            "Access control runtime ready"
        );
        Ok(runtime)
    }

    /// Builds a runtime over explicit collaborators.
    pub fn assemble(
        entity_store: Arc<dyn AttributeEntityStore>,
        engine: Arc<dyn DecisionCache>,
        settings: ResolverSettings,
        config: &Config
    ) -> Self {
        let resolver = Arc::new(HierarchicalAttributeResolver::new(entity_store, settings));
        let cache = Arc::new(CircuitBreakingDecisionCache::new(
            engine,
            config.cache.enabled,
            config.cache.breaker.clone()
        ));
        let privileges = Arc::new(PrivilegeManagementService::new(resolver.clone(), cache.clone()));
        Self {
            resolver,
            cache,
            privileges
        }
    }

    pub fn resolver(&self) -> &Arc<HierarchicalAttributeResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<CircuitBreakingDecisionCache> {
        &self.cache
    }

    pub fn privileges(&self) -> &Arc<PrivilegeManagementService> {
        &self.privileges
    }

    pub fn decision_point(&self, evaluator: Arc<dyn PolicyEvaluator>) -> CachedDecisionPoint {
        CachedDecisionPoint::new(self.cache.clone(), self.resolver.clone(), evaluator)
    }

    /// Applies the settings that may change without restart.
    pub fn apply(&self, config: &Config) {
        self.resolver
            .set_traversal_limit(config.attributes.traversal_limit);
        self.cache.set_enabled(config.cache.enabled);
    }

    pub fn apply_reload_event(&self, event: &ConfigReloadEvent) {
        match event {
            ConfigReloadEvent::Reloaded { path, config } => {
                self.apply(config);
                info!(path = %path.display(), "Applied reloaded configuration");
            }
            ConfigReloadEvent::Removed(path) => {
                warn!(path = %path.display(), "Config file removed, keeping current settings");
            }
            ConfigReloadEvent::Error { path, error } => {
                error!(path = %path.display(), error = %error, "Ignoring invalid configuration");
            }
            ConfigReloadEvent::Ready => {}
        }
    }

    /// Watches `path` and applies every valid reload until the watcher stops.
    pub async fn watch(self: Arc<Self>, path: &Path) -> Result<JoinHandle<()>, ServiceError> {
        let (_, mut rx) = config::watch_config(path).await.map_err(configuration_error)?;
        Ok(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.apply_reload_event(&event);
            }
        }))
    }
}

async fn entity_store(config: &Config) -> Result<Arc<dyn AttributeEntityStore>, ServiceError> {
    match config.attributes.backend.as_str() {
        "postgres" => {
            let pg = &config.providers.postgres;
            let store = PostgresAttributeStore::new(
                &pg.connection_url(),
                pg.pool_size,
                Duration::from_secs(pg.timeout_seconds)
            )
            .await
            .map_err(configuration_error)?;
            store.initialize_schema().await.map_err(configuration_error)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(InMemoryAttributeStore::new())),
        other => Err(configuration_error(format!("unknown attribute backend {other}")))
    }
}

async fn cache_stores(config: &Config) -> Result<(Arc<dyn KeyValueStore>, Arc<dyn KeyValueStore>), ServiceError> {
    match config.cache.backend.as_str() {
        "redis" => {
            let redis = &config.providers.redis;
            let decisions = RedisKeyValueStore::new(&redis.url_for_db(redis.decision_db))
                .await
                .map_err(configuration_error)?;
            let markers = RedisKeyValueStore::new(&redis.url_for_db(redis.marker_db))
                .await
                .map_err(configuration_error)?;
            Ok((Arc::new(decisions), Arc::new(markers)))
        }
        "memory" => Ok((
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(InMemoryKeyValueStore::new())
        )),
        other => Err(configuration_error(format!("unknown cache backend {other}")))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use acs_core::types::{Attribute, AttributeEntity, Effect, PolicyEvaluationResult, ZoneId};
    use decision_cache::DecisionCacheKey;

    #[tokio::test]
    async fn test_memory_runtime_from_default_config() {
        let runtime = AccessControlRuntime::from_config(&Config::default()).await.unwrap();
        assert!(runtime.cache().is_enabled());
        assert_eq!(runtime.resolver().traversal_limit(), 256);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.attributes.traversal_limit = 0;
        let err = AccessControlRuntime::from_config(&config).await.err().unwrap();
        assert!(matches!(err, ServiceError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_reload_applies_runtime_knobs() {
        let runtime = AccessControlRuntime::from_config(&Config::default()).await.unwrap();
        let mut reloaded = Config::default();
        reloaded.attributes.traversal_limit = 8;
        reloaded.cache.enabled = false;

        runtime.apply_reload_event(&ConfigReloadEvent::Reloaded {
            path: PathBuf::from("acs.toml"),
            config: Box::new(reloaded)
        });
        assert_eq!(runtime.resolver().traversal_limit(), 8);
        assert!(!runtime.cache().is_enabled());

        runtime.apply_reload_event(&ConfigReloadEvent::Error {
            path: PathBuf::from("acs.toml"),
            error: "bad".to_string()
        });
        assert_eq!(runtime.resolver().traversal_limit(), 8);
    }

    #[tokio::test]
    async fn test_change_while_disabled_is_honoured_after_reenable() {
        let runtime = AccessControlRuntime::from_config(&Config::default()).await.unwrap();
        let zone = ZoneId::new("zone1".to_string()).unwrap();
        let key = DecisionCacheKey::builder(zone.clone())
            .subject("mulder")
            .resource("/x-files")
            .policy_sets(["p1"])
            .request("GET")
            .build();
        runtime
            .cache()
            .set(&key, PolicyEvaluationResult::new(Effect::Permit))
            .await
            .unwrap();
        assert!(runtime.cache().get(&key).await.unwrap().is_some());

        let mut disabled = Config::default();
        disabled.cache.enabled = false;
        runtime.apply(&disabled);
        runtime
            .privileges()
            .upsert_subject(
                &AttributeEntity::subject(zone.clone(), "mulder")
                    .with_attribute(Attribute::new("acs", "clearance", "revoked"))
            )
            .await
            .unwrap();

        runtime.apply(&Config::default());
        assert!(runtime.cache().get(&key).await.unwrap().is_none());
    }
}
