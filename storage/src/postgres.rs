use std::collections::BTreeSet;
use std::time::Duration;

use acs_core::traits::AttributeEntityStore;
use acs_core::types::{Attribute, AttributeEntity, EntityKind, UpsertOutcome, ZoneId};
use async_trait::async_trait;
use errors::StorageError;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};

const BACKEND: &str = "Postgres";

/// SQLSTATEs raised when concurrent writers race on the composite key:
/// unique_violation, serialization_failure, deadlock_detected and
/// lock_not_available.
const CONTENTION_CODES: [&str; 4] = ["23505", "40001", "40P01", "55P03"];

fn map_sqlx_error(e: sqlx::Error, key: &str) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db
            .code()
            .is_some_and(|code| CONTENTION_CODES.contains(&code.as_ref()))
        {
            return StorageError::LockContention {
                backend: BACKEND.to_string(),
                key: key.to_string()
            };
        }
    }
    StorageError::QueryError {
        backend: BACKEND.to_string(),
        reason: e.to_string()
    }
}

fn entity_key(zone_id: &ZoneId, kind: EntityKind, identifier: &str) -> String {
    format!("{zone_id}/{kind}/{identifier}")
}

/// Attribute-entity store on PostgreSQL.
///
/// Entities are unique on `(zone_id, kind, identifier)`; parent edges live in
/// their own table indexed by parent so child lookups stay cheap.
pub struct PostgresAttributeStore {
    pool: Pool<Postgres>
}

impl PostgresAttributeStore {
    pub async fn new(
        connection_url: &str,
        max_connections: u32,
        acquire_timeout: Duration
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(connection_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                backend: BACKEND.to_string(),
                reason: e.to_string()
            })?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn initialize_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS acs_attribute_entities (
                zone_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                identifier TEXT NOT NULL,
                attributes JSONB NOT NULL DEFAULT '[]'::jsonb,
                updated_at BIGINT NOT NULL,
                PRIMARY KEY (zone_id, kind, identifier)
            )"
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, "schema"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS acs_attribute_parents (
                zone_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                child TEXT NOT NULL,
                parent TEXT NOT NULL,
                PRIMARY KEY (zone_id, kind, child, parent)
            )"
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, "schema"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_acs_attribute_parents_parent
             ON acs_attribute_parents (zone_id, kind, parent)"
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, "schema"))?;

        Ok(())
    }

    fn row_to_entity(
        row: &PgRow,
        zone_id: &ZoneId,
        kind: EntityKind
    ) -> Result<AttributeEntity, StorageError> {
        let decode = |e: sqlx::Error| StorageError::SerializationError {
            error_type: "row".to_string(),
            reason: e.to_string()
        };
        let identifier: String = row.try_get("identifier").map_err(decode)?;
        let attributes: serde_json::Value = row.try_get("attributes").map_err(decode)?;
        let parents: Vec<String> = row.try_get("parents").map_err(decode)?;
        let attributes: BTreeSet<Attribute> =
            serde_json::from_value(attributes).map_err(|e| StorageError::SerializationError {
                error_type: "attributes".to_string(),
                reason: e.to_string()
            })?;

        Ok(AttributeEntity {
            zone_id: zone_id.clone(),
            kind,
            identifier,
            attributes,
            parents: parents.into_iter().collect()
        })
    }
}

macro_rules! select_entities {
    ($tail:literal) => {
        concat!(
            "SELECT e.identifier, e.attributes,
                COALESCE(array_agg(p.parent) FILTER (WHERE p.parent IS NOT NULL), '{}'::text[])
                    AS parents
             FROM acs_attribute_entities e
             LEFT JOIN acs_attribute_parents p
                ON p.zone_id = e.zone_id AND p.kind = e.kind AND p.child = e.identifier
             WHERE e.zone_id = $1 AND e.kind = $2 ",
            $tail
        )
    };
}

#[async_trait]
impl AttributeEntityStore for PostgresAttributeStore {
    async fn get(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Option<AttributeEntity>, StorageError> {
        let key = entity_key(zone_id, kind, identifier);
        let row = sqlx::query(select_entities!(
            "AND e.identifier = $3 GROUP BY e.zone_id, e.kind, e.identifier"
        ))
        .bind(zone_id.as_str())
        .bind(kind.to_string())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, &key))?;

        row.map(|r| Self::row_to_entity(&r, zone_id, kind)).transpose()
    }

    async fn upsert(&self, entity: &AttributeEntity) -> Result<UpsertOutcome, StorageError> {
        let key = entity_key(&entity.zone_id, entity.kind, &entity.identifier);
        let attributes =
            serde_json::to_value(&entity.attributes).map_err(|e| StorageError::SerializationError {
                error_type: "attributes".to_string(),
                reason: e.to_string()
            })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, &key))?;

        let inserted: bool = sqlx::query(
            "INSERT INTO acs_attribute_entities (zone_id, kind, identifier, attributes, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (zone_id, kind, identifier)
             DO UPDATE SET attributes = EXCLUDED.attributes, updated_at = EXCLUDED.updated_at
             RETURNING (xmax = 0) AS inserted"
        )
        .bind(entity.zone_id.as_str())
        .bind(entity.kind.to_string())
        .bind(&entity.identifier)
        .bind(attributes)
        .bind(chrono::Utc::now().timestamp_millis())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(e, &key))?
        .try_get("inserted")
        .map_err(|e| map_sqlx_error(e, &key))?;

        sqlx::query("DELETE FROM acs_attribute_parents WHERE zone_id = $1 AND kind = $2 AND child = $3")
            .bind(entity.zone_id.as_str())
            .bind(entity.kind.to_string())
            .bind(&entity.identifier)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, &key))?;

        if !entity.parents.is_empty() {
            let parents: Vec<String> = entity.parents.iter().cloned().collect();
            sqlx::query(
                "INSERT INTO acs_attribute_parents (zone_id, kind, child, parent)
                 SELECT $1, $2, $3, UNNEST($4::text[])"
            )
            .bind(entity.zone_id.as_str())
            .bind(entity.kind.to_string())
            .bind(&entity.identifier)
            .bind(&parents)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, &key))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error(e, &key))?;

        Ok(if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn delete(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<bool, StorageError> {
        let key = entity_key(zone_id, kind, identifier);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(e, &key))?;

        sqlx::query(
            "DELETE FROM acs_attribute_parents
             WHERE zone_id = $1 AND kind = $2 AND (child = $3 OR parent = $3)"
        )
        .bind(zone_id.as_str())
        .bind(kind.to_string())
        .bind(identifier)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(e, &key))?;

        let result = sqlx::query(
            "DELETE FROM acs_attribute_entities WHERE zone_id = $1 AND kind = $2 AND identifier = $3"
        )
        .bind(zone_id.as_str())
        .bind(kind.to_string())
        .bind(identifier)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(e, &key))?;

        tx.commit().await.map_err(|e| map_sqlx_error(e, &key))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind
    ) -> Result<Vec<AttributeEntity>, StorageError> {
        let rows = sqlx::query(select_entities!(
            "GROUP BY e.zone_id, e.kind, e.identifier ORDER BY e.identifier"
        ))
        .bind(zone_id.as_str())
        .bind(kind.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, zone_id.as_str()))?;

        rows.iter()
            .map(|row| Self::row_to_entity(row, zone_id, kind))
            .collect()
    }

    async fn children(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<BTreeSet<String>, StorageError> {
        let key = entity_key(zone_id, kind, identifier);
        let children: Vec<String> = sqlx::query_scalar(
            "SELECT child FROM acs_attribute_parents WHERE zone_id = $1 AND kind = $2 AND parent = $3"
        )
        .bind(zone_id.as_str())
        .bind(kind.to_string())
        .bind(identifier)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, &key))?;

        Ok(children.into_iter().collect())
    }

    async fn zones_containing(
        &self,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Vec<ZoneId>, StorageError> {
        let zones: Vec<String> = sqlx::query_scalar(
            "SELECT zone_id FROM acs_attribute_entities
             WHERE kind = $1 AND identifier = $2 ORDER BY zone_id"
        )
        .bind(kind.to_string())
        .bind(identifier)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, identifier))?;

        Ok(zones.into_iter().filter_map(ZoneId::new).collect())
    }
}
