//! Pipeline event types carried by the runtime bus.
//!
//! Each stage publishes only after committing its own write, so events for
//! one finding's lineage arrive in causal order. Across lineages there is
//! no ordering guarantee.

use crate::execution::{ExecutionStatus, OutcomeVerdict};
use crate::finding::{Finding, FindingId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Discriminant used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FindingCreated,
    DiagnosisComplete,
    RecommendationCreated,
    ExecutionCompleted,
    OutcomeEvaluated,
}

impl EventKind {
    /// Stable string form for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FindingCreated => "finding_created",
            EventKind::DiagnosisComplete => "diagnosis_complete",
            EventKind::RecommendationCreated => "recommendation_created",
            EventKind::ExecutionCompleted => "execution_completed",
            EventKind::OutcomeEvaluated => "outcome_evaluated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline event with its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A new or updated risk/opportunity/trend finding was persisted.
    FindingCreated { finding: Finding },
    /// A diagnosis finished; the parent risk is now `diagnosed`.
    DiagnosisComplete {
        diagnosis: Finding,
        risk_id: FindingId,
    },
    /// A ranked recommendation was persisted (dispatch is gated by approval).
    RecommendationCreated { recommendation: Finding },
    /// An execution reached a terminal state.
    ExecutionCompleted {
        execution_id: Uuid,
        recommendation_id: FindingId,
        status: ExecutionStatus,
    },
    /// An outcome monitoring session produced an evaluation.
    OutcomeEvaluated {
        session_id: Uuid,
        recommendation_id: FindingId,
        verdict: OutcomeVerdict,
    },
}

impl PipelineEvent {
    /// The event's kind discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            PipelineEvent::FindingCreated { .. } => EventKind::FindingCreated,
            PipelineEvent::DiagnosisComplete { .. } => EventKind::DiagnosisComplete,
            PipelineEvent::RecommendationCreated { .. } => EventKind::RecommendationCreated,
            PipelineEvent::ExecutionCompleted { .. } => EventKind::ExecutionCompleted,
            PipelineEvent::OutcomeEvaluated { .. } => EventKind::OutcomeEvaluated,
        }
    }
}
