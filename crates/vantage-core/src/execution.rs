//! Execution records and outcome monitoring sessions.
//!
//! An execution record is created when a recommendation is dispatched and
//! holds the rollback plan captured before any mutation. Records are
//! immutable once in a terminal state; outcome sessions are durable
//! scheduled work closed by the outcome monitor.

use crate::finding::FindingId;
use crate::types::{MetricValue, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Status of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    /// Stable string form for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RolledBack => "rolled_back",
        }
    }

    /// Terminal records are immutable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending)
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "rolled_back" => Ok(ExecutionStatus::RolledBack),
            _ => Err(format!("unknown execution status: {}", s)),
        }
    }
}

/// The change a recommendation asks for: desired key → value pairs on the
/// external target. Doubles as the declared post-conditions for validation.
pub type ChangeSet = BTreeMap<String, MetricValue>;

/// Pre-state snapshot sufficient to undo an intended change, captured
/// before any external mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// The entity the change targets.
    pub entity_id: String,
    /// Pre-execution values of every key the change touches. A key absent
    /// from the target at capture time maps to `None` (revert deletes it).
    pub pre_state: BTreeMap<String, Option<MetricValue>>,
    /// When the snapshot was taken.
    pub captured_at: DateTime<Utc>,
}

/// Durable record of an attempted external change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    /// The recommendation being executed.
    pub recommendation_id: FindingId,
    pub scope: Scope,
    pub entity_id: String,
    /// The change set applied (or that would be applied in dry-run).
    pub change: ChangeSet,
    /// Rollback plan captured before mutation.
    pub rollback_plan: RollbackPlan,
    pub status: ExecutionStatus,
    /// Captured error text when status is `Failed`.
    pub error: Option<String>,
    /// Dry-run executions perform every step except the mutation.
    pub dry_run: bool,
    /// Linked outcome monitoring session, once opened.
    pub outcome_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Create a pending record with its captured rollback plan.
    pub fn new(
        recommendation_id: FindingId,
        scope: Scope,
        entity_id: impl Into<String>,
        change: ChangeSet,
        rollback_plan: RollbackPlan,
        dry_run: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recommendation_id,
            scope,
            entity_id: entity_id.into(),
            change,
            rollback_plan,
            status: ExecutionStatus::Pending,
            error: None,
            dry_run,
            outcome_session_id: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Mark completed.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Mark failed with the captured error. The rollback plan is NOT
    /// auto-applied; rollback is a distinct decision made by validation.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Mark rolled back.
    pub fn mark_rolled_back(&mut self) {
        self.status = ExecutionStatus::RolledBack;
        self.finished_at = Some(Utc::now());
    }
}

/// One post-condition check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    /// The checked key on the external target.
    pub key: String,
    pub expected: MetricValue,
    pub actual: Option<MetricValue>,
    pub passed: bool,
    /// Critical checks gate the rollback decision.
    pub critical: bool,
}

/// Result of validating an execution against its declared post-conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub execution_id: Uuid,
    pub checks: Vec<ValidationCheck>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    /// True when every check passed.
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// True when any critical check failed.
    pub fn any_critical_failed(&self) -> bool {
        self.checks.iter().any(|c| c.critical && !c.passed)
    }
}

/// Per-metric improvement goal for an outcome session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeTarget {
    /// Expected improvement over baseline, in percent (e.g. 20.0 = +20%).
    pub improvement_pct: f64,
}

/// One periodic metric collection against a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeSnapshot {
    pub collected_at: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

/// Per-metric evaluation against baseline and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricOutcome {
    pub metric: String,
    pub baseline: f64,
    pub latest: f64,
    /// Observed change over baseline, in percent.
    pub change_pct: f64,
    pub target_pct: f64,
    pub achieved: bool,
}

/// Aggregate verdict of an outcome evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeVerdict {
    pub metrics: Vec<MetricOutcome>,
    /// True only when every monitored metric met its target.
    pub achieved: bool,
    pub evaluated_at: DateTime<Utc>,
}

/// Status of an outcome monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

/// Durable scheduled post-execution comparison against a baseline/target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeSession {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub recommendation_id: FindingId,
    pub scope: Scope,
    pub entity_id: String,
    /// Metric values captured just before execution.
    pub baseline: BTreeMap<String, f64>,
    /// Expected post-execution improvement per metric.
    pub targets: BTreeMap<String, OutcomeTarget>,
    /// Monitoring duration in days (bounded 7–30).
    pub duration_days: u32,
    /// Hours between collections.
    pub eval_interval_hours: u32,
    pub next_eval_at: DateTime<Utc>,
    pub snapshots: Vec<OutcomeSnapshot>,
    pub status: SessionStatus,
    pub final_verdict: Option<OutcomeVerdict>,
    pub created_at: DateTime<Utc>,
}

impl OutcomeSession {
    /// Open a new session. `duration_days` is clamped into the 7–30 band.
    pub fn new(
        execution_id: Uuid,
        recommendation_id: FindingId,
        scope: Scope,
        entity_id: impl Into<String>,
        baseline: BTreeMap<String, f64>,
        targets: BTreeMap<String, OutcomeTarget>,
        duration_days: u32,
        eval_interval_hours: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id,
            recommendation_id,
            scope,
            entity_id: entity_id.into(),
            baseline,
            targets,
            duration_days: duration_days.clamp(7, 30),
            eval_interval_hours: eval_interval_hours.max(1),
            next_eval_at: now + chrono::Duration::hours(eval_interval_hours.max(1) as i64),
            snapshots: Vec::new(),
            status: SessionStatus::Active,
            final_verdict: None,
            created_at: now,
        }
    }

    /// When monitoring ends.
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::days(self.duration_days as i64)
    }

    /// Store a collected snapshot and advance the schedule.
    pub fn record_snapshot(&mut self, snapshot: OutcomeSnapshot) {
        self.snapshots.push(snapshot);
        self.next_eval_at = Utc::now() + chrono::Duration::hours(self.eval_interval_hours as i64);
    }

    /// Compare the latest snapshot to baseline and targets.
    ///
    /// A metric with no snapshot value or a zero baseline is reported as
    /// not achieved with a zero change (not computable, not a crash).
    pub fn evaluate(&self) -> OutcomeVerdict {
        let latest = self.snapshots.last();
        let mut metrics = Vec::new();

        for (name, target) in &self.targets {
            let baseline = self.baseline.get(name).copied().unwrap_or(0.0);
            let latest_value = latest
                .and_then(|s| s.values.get(name))
                .copied()
                .unwrap_or(baseline);

            let change_pct = if baseline != 0.0 {
                (latest_value - baseline) / baseline * 100.0
            } else {
                0.0
            };

            metrics.push(MetricOutcome {
                metric: name.clone(),
                baseline,
                latest: latest_value,
                change_pct,
                target_pct: target.improvement_pct,
                achieved: baseline != 0.0 && change_pct >= target.improvement_pct,
            });
        }

        OutcomeVerdict {
            achieved: !metrics.is_empty() && metrics.iter().all(|m| m.achieved),
            metrics,
            evaluated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scope;

    fn session_with(baseline: f64, target_pct: f64, latest: f64) -> OutcomeSession {
        let mut session = OutcomeSession::new(
            Uuid::new_v4(),
            FindingId::from_string("rec"),
            Scope::new("s"),
            "/blog/x",
            BTreeMap::from([("clicks".to_string(), baseline)]),
            BTreeMap::from([(
                "clicks".to_string(),
                OutcomeTarget {
                    improvement_pct: target_pct,
                },
            )]),
            30,
            24,
        );
        session.record_snapshot(OutcomeSnapshot {
            collected_at: Utc::now(),
            values: BTreeMap::from([("clicks".to_string(), latest)]),
        });
        session
    }

    #[test]
    fn target_shortfall_is_not_achieved() {
        // baseline 100, target +20%, snapshot 115 -> change 15%, not achieved
        let verdict = session_with(100.0, 20.0, 115.0).evaluate();
        assert!(!verdict.achieved);
        assert_eq!(verdict.metrics.len(), 1);
        let m = &verdict.metrics[0];
        assert!((m.change_pct - 15.0).abs() < 1e-9);
        assert!(!m.achieved);
    }

    #[test]
    fn target_met_is_achieved() {
        let verdict = session_with(100.0, 20.0, 125.0).evaluate();
        assert!(verdict.achieved);
        assert!((verdict.metrics[0].change_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn zero_baseline_is_not_computable() {
        let verdict = session_with(0.0, 20.0, 50.0).evaluate();
        assert!(!verdict.achieved);
        assert_eq!(verdict.metrics[0].change_pct, 0.0);
    }

    #[test]
    fn duration_is_clamped_to_band() {
        let s = session_with(1.0, 1.0, 1.0);
        assert_eq!(s.duration_days, 30);
        let short = OutcomeSession::new(
            Uuid::new_v4(),
            FindingId::from_string("rec"),
            Scope::new("s"),
            "/x",
            BTreeMap::new(),
            BTreeMap::new(),
            2,
            24,
        );
        assert_eq!(short.duration_days, 7);
    }

    #[test]
    fn terminal_records_flagged() {
        let mut record = ExecutionRecord::new(
            FindingId::from_string("rec"),
            Scope::new("s"),
            "/x",
            ChangeSet::new(),
            RollbackPlan {
                entity_id: "/x".to_string(),
                pre_state: BTreeMap::new(),
                captured_at: Utc::now(),
            },
            false,
        );
        assert!(!record.status.is_terminal());
        record.fail("boom");
        assert!(record.status.is_terminal());
        assert_eq!(record.error.as_deref(), Some("boom"));
    }
}
