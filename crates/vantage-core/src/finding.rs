//! The `Finding` model: the atomic unit of insight.
//!
//! A finding's identity is a deterministic fingerprint over
//! `(scope, entity_type, entity_id, category, source, window_size)`, so
//! re-running a detector over the same inputs in the same window yields the
//! same identity and the store upserts instead of duplicating.

use crate::types::{Category, EntityType, FindingStatus, MetricValue, Scope, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Deterministic finding identity (SHA-256 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingId(String);

impl FindingId {
    /// Compute the fingerprint from its identity components.
    pub fn fingerprint(
        scope: &Scope,
        entity_type: EntityType,
        entity_id: &str,
        category: Category,
        source: &str,
        window_size: u32,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(scope.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(entity_type.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(entity_id.as_bytes());
        hasher.update(b"|");
        hasher.update(category.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(source.as_bytes());
        hasher.update(b"|");
        hasher.update(window_size.to_string().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an existing fingerprint string (e.g. read back from storage).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the fingerprint as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A detector-produced record of a risk, opportunity, diagnosis, trend, or
/// recommendation, carried through the workflow state machine by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Deterministic fingerprint identity.
    pub id: FindingId,
    /// The analyzed property/tenant.
    pub scope: Scope,
    /// What the finding is about.
    pub entity_type: EntityType,
    /// Entity identifier (URL, query text, directory path, or scope name).
    pub entity_id: String,
    /// Pipeline category.
    pub category: Category,
    /// Severity level.
    pub severity: Severity,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Open detector-specific payload.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Analysis horizon in days; part of the fingerprint.
    pub window_size: u32,
    /// Workflow state.
    pub status: FindingStatus,
    /// Non-owning back-reference to a parent finding earlier in the pipeline.
    pub linked_id: Option<FindingId>,
    /// Producing detector/agent name; part of the fingerprint.
    pub source: String,
    /// External approval flag; only meaningful for recommendations.
    pub approved: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Finding {
    /// Build a new finding with a computed fingerprint and `New` status.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scope: Scope,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        category: Category,
        severity: Severity,
        confidence: f64,
        source: impl Into<String>,
        window_size: u32,
    ) -> Self {
        let entity_id = entity_id.into();
        let source = source.into();
        let id = FindingId::fingerprint(
            &scope,
            entity_type,
            &entity_id,
            category,
            &source,
            window_size,
        );
        let now = Utc::now();
        Self {
            id,
            scope,
            entity_type,
            entity_id,
            category,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            metrics: BTreeMap::new(),
            window_size,
            status: FindingStatus::New,
            linked_id: None,
            source,
            approved: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a payload entry (builder style).
    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    /// Link to a parent finding (builder style).
    pub fn with_link(mut self, parent: FindingId) -> Self {
        self.linked_id = Some(parent);
        self
    }

    /// Attach a failure reason to the payload without changing status,
    /// keeping the row visible in its last good state.
    pub fn attach_failure_reason(&mut self, reason: impl Into<String>) {
        self.metrics
            .insert("failure_reason".to_string(), MetricValue::Text(reason.into()));
    }
}
