//! # Vantage Store
//!
//! Durable repository for findings, execution records, outcome sessions and
//! agent checkpoints.
//!
//! The store is the single source of truth for workflow state: the upsert is
//! keyed on the deterministic fingerprint with insert-or-update semantics
//! applied in a single conditional write, and it is the only component
//! permitted to mutate a finding's status. Pipeline code never deletes rows;
//! retention is an external job.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use vantage_core::execution::{ExecutionRecord, OutcomeSession};
use vantage_core::finding::{Finding, FindingId};
use vantage_core::types::{Category, FindingStatus, Scope};
use vantage_core::Result;

pub use sqlite::SqliteStore;

/// Filters for finding queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct FindingFilter {
    pub scope: Option<Scope>,
    pub category: Option<Category>,
    pub status: Option<FindingStatus>,
    pub entity_id: Option<String>,
    pub linked_id: Option<FindingId>,
    pub approved: Option<bool>,
    pub updated_since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl FindingFilter {
    /// Filter by category
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }

    /// Filter by status
    pub fn with_status(mut self, status: FindingStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filter by scope
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Storage contract for the pipeline.
///
/// All workflow mutation goes through this trait; components never cache
/// and write back a stale copy.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- findings ----

    /// Insert the finding, or update all mutable fields if a row with the
    /// same fingerprint exists. Status, approval and creation time are NOT
    /// mutable through upsert. Returns the persisted row.
    async fn upsert(&self, finding: Finding) -> Result<Finding>;

    /// Fetch one finding by fingerprint.
    async fn get(&self, id: &FindingId) -> Result<Option<Finding>>;

    /// Query findings by filter.
    async fn query(&self, filter: FindingFilter) -> Result<Vec<Finding>>;

    /// Move a finding to `new_status`, enforcing the state machine and the
    /// linked-parent rule. Illegal moves surface `Error::Transition`.
    async fn transition(&self, id: &FindingId, new_status: FindingStatus) -> Result<Finding>;

    /// Administrative reset back to `New`: the only sanctioned backward
    /// move.
    async fn reset(&self, id: &FindingId) -> Result<Finding>;

    /// External approval signal for a recommendation; anything unapproved
    /// is inert to the dispatcher.
    async fn mark_approved(&self, id: &FindingId) -> Result<Finding>;

    // ---- execution records ----

    /// Persist a new execution record.
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Update an execution record. Rejected once the stored row is terminal.
    async fn update_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Fetch one execution record.
    async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRecord>>;

    // ---- outcome sessions ----

    /// Persist a new outcome session.
    async fn insert_session(&self, session: &OutcomeSession) -> Result<()>;

    /// Update an outcome session (snapshots, schedule, verdict, status).
    async fn update_session(&self, session: &OutcomeSession) -> Result<()>;

    /// Fetch one session.
    async fn get_session(&self, id: Uuid) -> Result<Option<OutcomeSession>>;

    /// Active sessions whose next evaluation is due at or before `now`.
    async fn due_sessions(&self, now: DateTime<Utc>) -> Result<Vec<OutcomeSession>>;

    // ---- agent checkpoints ----

    /// Persist an agent's private checkpoint blob.
    async fn save_checkpoint(&self, agent_id: &str, blob: serde_json::Value) -> Result<()>;

    /// Load an agent's checkpoint blob, if any.
    async fn load_checkpoint(&self, agent_id: &str) -> Result<Option<serde_json::Value>>;
}
