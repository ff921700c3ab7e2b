//! # Access Control Core
//!
//! Shared types and collaborator traits for the ABAC decision service.
//!
//! This crate provides:
//! - Zone-scoped attribute entities (resources and subjects) with parent edges
//! - Policy evaluation results and the cached decision envelope
//! - Storage contracts for the decision cache backing store and the
//!   attribute-entity store
//! - Interfaces for the external policy evaluator and attribute connectors

pub mod traits;
pub mod types;

pub use traits::{AttributeConnectorService, AttributeEntityStore, KeyValueStore, PolicyEvaluator};
pub use types::{
    Attribute, AttributeConnector, AttributeEntity, DecisionCacheEntry, Effect, EntityKind,
    EvaluationRequest, PolicyEvaluationResult, UpsertOutcome, ZoneId
};
