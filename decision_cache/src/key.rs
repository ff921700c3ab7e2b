//! Decision and marker key formats.
//!
//! Every identifier is hashed before it reaches a key so that arbitrary
//! resource URIs never need escaping. Absent fields render as `*`, which makes
//! a partially specified key usable as a `KEYS` pattern.

use acs_core::types::{EvaluationRequest, ZoneId};
use utils::{hex_hash, list_hash, to_hex};

pub const WILDCARD: &str = "*";

const POLICY_SET_MARKER: &str = "set-id";
const RESOURCE_MARKER: &str = "res-id";
const SUBJECT_MARKER: &str = "sub-id";
const RESOURCE_TRANSLATION: &str = "res-trans";

/// Identifies one cached decision.
///
/// `policy_set_ids` is ordered. Two keys holding the same sets in a different
/// order are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionCacheKey {
    pub zone_id: ZoneId,
    pub subject_id: Option<String>,
    pub resource_id: Option<String>,
    pub policy_set_ids: Option<Vec<String>>,
    pub request: Option<String>
}

impl DecisionCacheKey {
    pub fn builder(zone_id: ZoneId) -> DecisionCacheKeyBuilder {
        DecisionCacheKeyBuilder {
            key: Self {
                zone_id,
                subject_id: None,
                resource_id: None,
                policy_set_ids: None,
                request: None
            }
        }
    }

    /// The fully specified key for an evaluation request.
    pub fn for_request(request: &EvaluationRequest) -> Self {
        Self::builder(request.zone_id.clone())
            .subject(&request.subject_identifier)
            .resource(&request.resource_identifier)
            .policy_sets(request.policy_set_ids.clone())
            .request(request.fingerprint())
            .build()
    }

    /// `zone:policy-sets:subject:resource:request`
    pub fn to_decision_key(&self) -> String {
        let policy_sets = self
            .policy_set_ids
            .as_ref()
            .map_or_else(|| WILDCARD.to_string(), |ids| to_hex(list_hash(ids)));
        format!(
            "{}:{}:{}:{}:{}",
            self.zone_id,
            policy_sets,
            hashed_or_wildcard(self.subject_id.as_deref()),
            hashed_or_wildcard(self.resource_id.as_deref()),
            hashed_or_wildcard(self.request.as_deref())
        )
    }

    /// True when any field is absent, i.e. the key addresses a family of
    /// entries rather than one entry.
    pub fn is_pattern(&self) -> bool {
        self.subject_id.is_none()
            || self.resource_id.is_none()
            || self.policy_set_ids.is_none()
            || self.request.is_none()
    }

    pub fn policy_set_ids(&self) -> &[String] {
        self.policy_set_ids.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct DecisionCacheKeyBuilder {
    key: DecisionCacheKey
}

impl DecisionCacheKeyBuilder {
    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.key.subject_id = Some(subject_id.into());
        self
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.key.resource_id = Some(resource_id.into());
        self
    }

    pub fn policy_sets<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.key.policy_set_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn request(mut self, request: impl Into<String>) -> Self {
        self.key.request = Some(request.into());
        self
    }

    pub fn build(self) -> DecisionCacheKey {
        self.key
    }
}

fn hashed_or_wildcard(value: Option<&str>) -> String {
    value.map_or_else(|| WILDCARD.to_string(), hex_hash)
}

fn marker_key(zone_id: &ZoneId, kind: &str, identifier: &str) -> String {
    format!("{zone_id}:{kind}:{}", hex_hash(identifier))
}

pub fn policy_set_marker_key(zone_id: &ZoneId, policy_set_id: &str) -> String {
    marker_key(zone_id, POLICY_SET_MARKER, policy_set_id)
}

pub fn resource_marker_key(zone_id: &ZoneId, resource_id: &str) -> String {
    marker_key(zone_id, RESOURCE_MARKER, resource_id)
}

pub fn subject_marker_key(zone_id: &ZoneId, subject_id: &str) -> String {
    marker_key(zone_id, SUBJECT_MARKER, subject_id)
}

/// Set of identifiers that `from_resource_id` translates to.
pub fn resource_translation_key(zone_id: &ZoneId, from_resource_id: &str) -> String {
    marker_key(zone_id, RESOURCE_TRANSLATION, from_resource_id)
}
