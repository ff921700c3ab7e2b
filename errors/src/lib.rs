//! # Access Control Errors
//!
//! Error handling for the attribute store and the decision cache.
//!
//! - Uses `thiserror` for structured error definitions
//! - Every variant carries named fields identifying the entity involved
//! - `StorageError::LockContention` is the only condition callers retry

use thiserror::Error;

/// Storage layer errors shared by the key/value and attribute-entity stores
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection to {backend} failed: {reason}")]
    ConnectionError { backend: String, reason: String },

    #[error("Query on {backend} failed: {reason}")]
    QueryError { backend: String, reason: String },

    #[error("Serialization error: {error_type} - {reason}")]
    SerializationError { error_type: String, reason: String },

    #[error("Not found on {backend}:{id}")]
    NotFound { backend: String, id: String },

    #[error("Transaction on {backend} failed: {reason}")]
    TransactionError { backend: String, reason: String },

    #[error("Lock contention on {backend} for {key}")]
    LockContention { backend: String, key: String }
}

impl StorageError {
    /// True when the failure came from concurrent writers racing on a
    /// uniqueness constraint and the operation may succeed if repeated.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

/// Hierarchical attribute store errors
#[derive(Debug, Error)]
pub enum AttributeStoreError {
    #[error("Cyclic parent reference: {identifier} -> {parent} in zone {zone_id}")]
    CyclicReference {
        zone_id: String,
        identifier: String,
        parent: String
    },

    #[error(
        "Cross-zone parent reference: {identifier} in zone {zone_id} -> {parent} in zone {parent_zone_id}"
    )]
    CrossZoneReference {
        zone_id: String,
        identifier: String,
        parent: String,
        parent_zone_id: String
    },

    #[error("Dangling parent reference: {identifier} -> {parent} does not exist in zone {zone_id}")]
    DanglingParent {
        zone_id: String,
        identifier: String,
        parent: String
    },

    #[error(
        "Attribute traversal limit of {limit} exceeded while resolving {identifier} in zone {zone_id}"
    )]
    AttributeLimitExceeded {
        zone_id: String,
        identifier: String,
        limit: usize
    },

    #[error("Invalid entity {identifier} in zone {zone_id}: {reason}")]
    InvalidEntity {
        zone_id: String,
        identifier: String,
        reason: String
    },

    #[error(transparent)]
    Storage(#[from] StorageError)
}

impl AttributeStoreError {
    /// Validation failures are caller mistakes; everything else is the store.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Decision cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Cache serialization error on {key}: {reason}")]
    Serialization { key: String, reason: String }
}

/// Errors surfaced by the orchestration layer
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Attributes(#[from] AttributeStoreError),

    /// The backing store could not durably record an invalidation. Revoked
    /// access must not be reported as revoked.
    #[error("Invalidation failed for {kind} in zone {zone_id}: {source}")]
    Invalidation {
        kind: String,
        zone_id: String,
        #[source]
        source: CacheError
    },

    #[error("Policy evaluation failed: {reason}")]
    Evaluation { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String }
}
