use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use validator::Validate;

/// Tenant partition. Every identifier in the system is scoped by a zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    pub fn new(id: String) -> Option<Self> {
        if id.is_empty() || id.len() > 100 {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::str::FromStr for ZoneId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string()).ok_or_else(|| anyhow::anyhow!("Invalid zone ID"))
    }
}

/// The two node kinds of the attribute hierarchy. Identifiers are unique per
/// `(zone, kind)`, so a resource and a subject may share an identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    Resource,
    Subject
}

/// An `(issuer, name, value)` triple.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Validate,
)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    #[validate(length(min = 1, max = 256))]
    pub issuer: String,
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    pub value: String
}

impl Attribute {
    pub fn new(issuer: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            name: name.into(),
            value: value.into()
        }
    }
}

/// A resource or subject node: its own attributes plus the identifiers of its
/// parents in the same zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AttributeEntity {
    pub zone_id: ZoneId,
    pub kind: EntityKind,
    #[validate(length(min = 1, max = 2048))]
    pub identifier: String,
    #[validate(nested)]
    #[serde(default)]
    pub attributes: BTreeSet<Attribute>,
    #[serde(default)]
    pub parents: BTreeSet<String>
}

impl AttributeEntity {
    pub fn new(zone_id: ZoneId, kind: EntityKind, identifier: impl Into<String>) -> Self {
        Self {
            zone_id,
            kind,
            identifier: identifier.into(),
            attributes: BTreeSet::new(),
            parents: BTreeSet::new()
        }
    }

    pub fn resource(zone_id: ZoneId, identifier: impl Into<String>) -> Self {
        Self::new(zone_id, EntityKind::Resource, identifier)
    }

    pub fn subject(zone_id: ZoneId, identifier: impl Into<String>) -> Self {
        Self::new(zone_id, EntityKind::Subject, identifier)
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.insert(attribute);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.insert(parent.into());
        self
    }
}

/// Whether an upsert created a new entity or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated
}

/// Outcome of evaluating a request against the selected policy sets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate
}

/// An authorization question as handed to the policy evaluator.
///
/// `policy_set_ids` is ordered: evaluation uses first-match semantics, so the
/// same sets in a different order are a different question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub zone_id: ZoneId,
    #[validate(length(min = 1, max = 2048))]
    pub subject_identifier: String,
    #[validate(length(min = 1, max = 2048))]
    pub resource_identifier: String,
    #[validate(length(min = 1, max = 64))]
    pub action: String,
    #[serde(default)]
    pub subject_attributes: BTreeSet<Attribute>,
    #[serde(default)]
    pub policy_set_ids: Vec<String>
}

impl EvaluationRequest {
    /// Canonical textual form of the request, used as the request part of the
    /// decision cache key. Attribute sets are ordered so equal requests always
    /// render identically.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{}|{}|{}|{}",
                self.zone_id, self.subject_identifier, self.resource_identifier, self.action
            )
        })
    }
}

/// The evaluated decision, including the attributes observed while matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluationResult {
    pub effect: Effect,
    #[serde(default)]
    pub subject_attributes: BTreeSet<Attribute>,
    #[serde(default)]
    pub resource_attributes: BTreeSet<Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Canonical resource identifiers the decision was matched against. May
    /// differ from the requested identifier after URI-template resolution.
    #[serde(default)]
    pub resolved_resource_uris: BTreeSet<String>
}

impl PolicyEvaluationResult {
    pub fn new(effect: Effect) -> Self {
        Self {
            effect,
            subject_attributes: BTreeSet::new(),
            resource_attributes: BTreeSet::new(),
            message: None,
            resolved_resource_uris: BTreeSet::new()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_resolved_resource_uri(mut self, uri: impl Into<String>) -> Self {
        self.resolved_resource_uris.insert(uri.into());
        self
    }
}

/// A decision as stored in the cache, stamped with the instant it was cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionCacheEntry {
    pub result: PolicyEvaluationResult,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>
}

impl DecisionCacheEntry {
    pub fn resolved_resource_uris(&self) -> &BTreeSet<String> {
        &self.result.resolved_resource_uris
    }

    pub fn effect(&self) -> Effect {
        self.result.effect
    }
}

/// A time-based attribute source. It does not emit change events, so decisions
/// that used its attributes are bounded by age instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeConnector {
    pub max_cached_interval_minutes: i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_zone_id_validation() {
        assert!(ZoneId::new(String::new()).is_none());
        assert!(ZoneId::new("z".repeat(101)).is_none());
        assert_eq!(ZoneId::from_str("zone1").unwrap().as_str(), "zone1");
    }

    #[test]
    fn test_effect_serialization() {
        let json = serde_json::to_string(&Effect::NotApplicable).unwrap();
        assert_eq!(json, "\"NOT_APPLICABLE\"");
        assert_eq!(Effect::from_str("PERMIT").unwrap(), Effect::Permit);
        assert_eq!(Effect::Indeterminate.to_string(), "INDETERMINATE");
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Resource.to_string(), "resource");
        assert_eq!(EntityKind::from_str("subject").unwrap(), EntityKind::Subject);
    }

    #[test]
    fn test_attribute_set_deduplicates() {
        let zone = ZoneId::from_str("zone1").unwrap();
        let entity = AttributeEntity::subject(zone, "mulder")
            .with_attribute(Attribute::new("acs", "role", "agent"))
            .with_attribute(Attribute::new("acs", "role", "agent"))
            .with_attribute(Attribute::new("acs", "site", "basement"));
        assert_eq!(entity.attributes.len(), 2);
    }

    #[test]
    fn test_entity_validation_rejects_empty_identifier() {
        let zone = ZoneId::from_str("zone1").unwrap();
        let entity = AttributeEntity::resource(zone.clone(), "");
        assert!(entity.validate().is_err());

        let entity = AttributeEntity::resource(zone, "/x-files")
            .with_attribute(Attribute::new("", "classification", "top-secret"));
        assert!(entity.validate().is_err());
    }

    #[test]
    fn test_entry_timestamp_is_epoch_millis() {
        let entry = DecisionCacheEntry {
            result: PolicyEvaluationResult::new(Effect::Permit),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap()
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_123_i64);
        assert_eq!(json["result"]["effect"], "PERMIT");

        let back: DecisionCacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_fingerprint_is_stable_across_attribute_insertion_order() {
        let zone = ZoneId::from_str("zone1").unwrap();
        let mut a = EvaluationRequest {
            zone_id: zone,
            subject_identifier: "mulder".to_string(),
            resource_identifier: "/x-files".to_string(),
            action: "GET".to_string(),
            subject_attributes: BTreeSet::new(),
            policy_set_ids: vec!["p1".to_string()]
        };
        let mut b = a.clone();
        a.subject_attributes.insert(Attribute::new("acs", "a", "1"));
        a.subject_attributes.insert(Attribute::new("acs", "b", "2"));
        b.subject_attributes.insert(Attribute::new("acs", "b", "2"));
        b.subject_attributes.insert(Attribute::new("acs", "a", "1"));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
