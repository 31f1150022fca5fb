//! # Vantage Core
//!
//! Shared types and contracts for the vantage detection-to-dispatch pipeline.
//!
//! This crate provides:
//! - The `Finding` model with its deterministic fingerprint identity
//! - The workflow state machine (`FindingStatus`)
//! - The read-only `MetricsView` contract consumed by detectors
//! - Pipeline event types carried by the runtime bus
//! - Execution records and outcome monitoring sessions
//! - The shared error taxonomy and retry policy

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod finding;
pub mod metrics_view;
pub mod retry;
pub mod types;

pub use error::{Error, Result};
pub use finding::{Finding, FindingId};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventKind, PipelineEvent};
    pub use crate::execution::{
        ExecutionRecord, ExecutionStatus, OutcomeSession, OutcomeSnapshot, RollbackPlan,
    };
    pub use crate::finding::{Finding, FindingId};
    pub use crate::metrics_view::{EntityContext, MetricsRow, MetricsView, StaticMetricsView};
    pub use crate::retry::RetryPolicy;
    pub use crate::types::{Category, EntityType, FindingStatus, MetricValue, Scope, Severity};
}
