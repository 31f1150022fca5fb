//! Execution engine.
//!
//! `execute` captures a rollback plan before any external mutation, applies
//! the recommendation's change set under the uniform timeout/retry policy,
//! and opens an outcome monitoring session on success. `validate` re-reads
//! the affected state against the declared post-conditions; rollback is a
//! distinct, explicit decision that applies the captured pre-state
//! snapshot.

use crate::target::ExecutionTarget;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vantage_core::config::DispatchConfig;
use vantage_core::execution::{
    ChangeSet, ExecutionRecord, ExecutionStatus, OutcomeSession, OutcomeTarget, RollbackPlan,
    ValidationCheck, ValidationResult,
};
use vantage_core::finding::FindingId;
use vantage_core::metrics_view::MetricsView;
use vantage_core::types::{Category, FindingStatus, MetricValue};
use vantage_core::{Error, Finding, Result};
use vantage_store::Store;

/// Extract the change set a recommendation declares through its
/// `change:`-prefixed payload entries.
pub fn change_set_of(recommendation: &Finding) -> ChangeSet {
    recommendation
        .metrics
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix("change:")
                .map(|stripped| (stripped.to_string(), value.clone()))
        })
        .collect()
}

/// Executes approved recommendations against the external target.
pub struct ExecutionEngine {
    config: DispatchConfig,
    store: Arc<dyn Store>,
    target: Arc<dyn ExecutionTarget>,
    view: Arc<dyn MetricsView>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl ExecutionEngine {
    /// Create an execution engine
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn Store>,
        target: Arc<dyn ExecutionTarget>,
        view: Arc<dyn MetricsView>,
    ) -> Self {
        Self {
            config,
            store,
            target,
            view,
        }
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.call_timeout_secs)
    }

    /// Execute one recommendation.
    ///
    /// Dry-run performs every step except the actual mutation and returns
    /// the record describing what would change. A timed-out or failed
    /// execution is recorded `failed`: never left pending.
    pub async fn execute(
        &self,
        recommendation_id: &FindingId,
        dry_run: bool,
    ) -> Result<ExecutionRecord> {
        let recommendation = self
            .store
            .get(recommendation_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("recommendation {}", recommendation_id)))?;
        if recommendation.category != Category::Recommendation {
            return Err(Error::validation(format!(
                "{} is a {}, not a recommendation",
                recommendation_id, recommendation.category
            )));
        }
        if !dry_run && !recommendation.approved {
            return Err(Error::validation(format!(
                "recommendation {} is not approved",
                recommendation_id
            )));
        }

        let change = change_set_of(&recommendation);
        if change.is_empty() {
            return Err(Error::validation(format!(
                "recommendation {} declares no change set",
                recommendation_id
            )));
        }

        // capture the rollback plan BEFORE any mutation
        let pre_state = tokio::time::timeout(
            self.call_timeout(),
            self.target.read_state(&recommendation.entity_id),
        )
        .await
        .map_err(|_| Error::external("pre-state read timed out"))??;
        let rollback_plan = RollbackPlan {
            entity_id: recommendation.entity_id.clone(),
            pre_state: change
                .keys()
                .map(|key| (key.clone(), pre_state.get(key).cloned()))
                .collect(),
            captured_at: chrono::Utc::now(),
        };

        // baseline for outcome monitoring, captured just before execution
        let monitored = monitored_metrics(&recommendation);
        let baseline = tokio::time::timeout(
            self.call_timeout(),
            self.view
                .entity_snapshot(&recommendation.scope, &recommendation.entity_id, &monitored),
        )
        .await
        .map_err(|_| Error::external("baseline snapshot timed out"))??;

        let mut record = ExecutionRecord::new(
            recommendation.id.clone(),
            recommendation.scope.clone(),
            recommendation.entity_id.clone(),
            change.clone(),
            rollback_plan,
            dry_run,
        );
        self.store.insert_execution(&record).await?;

        if dry_run {
            info!(
                recommendation = %recommendation_id,
                execution = %record.id,
                keys = change.len(),
                "dry-run execution; no mutation performed"
            );
            record.complete();
            self.store.update_execution(&record).await?;
            return Ok(record);
        }

        // the recommendation is being actioned from here on
        self.store
            .transition(recommendation_id, FindingStatus::Actioned)
            .await?;

        match self.apply_with_retry(&recommendation.entity_id, &change).await {
            Ok(()) => {
                let session = self
                    .open_outcome_session(&recommendation, record.id, baseline)
                    .await?;
                record.outcome_session_id = Some(session.id);
                record.complete();
                self.store.update_execution(&record).await?;
                info!(
                    recommendation = %recommendation_id,
                    execution = %record.id,
                    session = %session.id,
                    "execution completed"
                );
                metrics::counter!("vantage_executions_total", "status" => "completed")
                    .increment(1);
            }
            Err(e) => {
                // the rollback plan is NOT auto-applied on failure
                record.fail(e.to_string());
                self.store.update_execution(&record).await?;

                let mut failed = recommendation.clone();
                failed.attach_failure_reason(e.to_string());
                self.store.upsert(failed).await?;
                self.store
                    .transition(recommendation_id, FindingStatus::Failed)
                    .await?;
                warn!(
                    recommendation = %recommendation_id,
                    execution = %record.id,
                    error = %e,
                    "execution failed"
                );
                metrics::counter!("vantage_executions_total", "status" => "failed")
                    .increment(1);
            }
        }

        Ok(record)
    }

    /// Apply under the uniform exponential backoff policy, each attempt
    /// with a bounded timeout.
    async fn apply_with_retry(&self, entity_id: &str, change: &ChangeSet) -> Result<()> {
        let policy = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
            let outcome = tokio::time::timeout(
                self.call_timeout(),
                self.target.apply(entity_id, change),
            )
            .await
            .map_err(|_| Error::external("target apply timed out"))
            .and_then(|inner| inner);

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(entity = entity_id, attempt, error = %e, "apply attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::external("apply failed with no attempts")))
    }

    async fn open_outcome_session(
        &self,
        recommendation: &Finding,
        execution_id: Uuid,
        baseline: std::collections::HashMap<String, f64>,
    ) -> Result<OutcomeSession> {
        let targets: BTreeMap<String, OutcomeTarget> = baseline
            .keys()
            .map(|metric| {
                (
                    metric.clone(),
                    OutcomeTarget {
                        improvement_pct: self.config.outcome_target_pct,
                    },
                )
            })
            .collect();

        let session = OutcomeSession::new(
            execution_id,
            recommendation.id.clone(),
            recommendation.scope.clone(),
            recommendation.entity_id.clone(),
            baseline.into_iter().collect(),
            targets,
            self.config.outcome_duration_days,
            self.config.outcome_interval_hours,
        );
        self.store.insert_session(&session).await?;
        Ok(session)
    }

    /// Re-read the affected external state and compare it against the
    /// declared post-conditions. Every check records pass/fail.
    pub async fn validate(&self, execution_id: Uuid) -> Result<ValidationResult> {
        let record = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("execution {}", execution_id)))?;

        let state = tokio::time::timeout(
            self.call_timeout(),
            self.target.read_state(&record.entity_id),
        )
        .await
        .map_err(|_| Error::external("validation read timed out"))??;

        let checks: Vec<ValidationCheck> = record
            .change
            .iter()
            .map(|(key, expected)| {
                let actual = state.get(key).cloned();
                ValidationCheck {
                    key: key.clone(),
                    expected: expected.clone(),
                    passed: actual.as_ref() == Some(expected),
                    actual,
                    critical: true,
                }
            })
            .collect();

        let result = ValidationResult {
            execution_id,
            checks,
            validated_at: chrono::Utc::now(),
        };
        info!(
            execution = %execution_id,
            passed = result.all_passed(),
            checks = result.checks.len(),
            "execution validated"
        );
        Ok(result)
    }

    /// Rollback decision: any critical check failed.
    pub fn should_rollback(&self, validation: &ValidationResult) -> bool {
        validation.any_critical_failed()
    }

    /// Apply the captured pre-state snapshot and mark the record
    /// rolled back.
    pub async fn rollback(&self, execution_id: Uuid) -> Result<ExecutionRecord> {
        let mut record = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("execution {}", execution_id)))?;
        if record.status == ExecutionStatus::RolledBack {
            return Ok(record);
        }
        if record.dry_run {
            return Err(Error::validation("dry-run executions have nothing to roll back"));
        }

        let mut restore = ChangeSet::new();
        let mut absent: Vec<String> = Vec::new();
        for (key, pre_value) in &record.rollback_plan.pre_state {
            match pre_value {
                Some(value) => {
                    restore.insert(key.clone(), value.clone());
                }
                None => absent.push(key.clone()),
            }
        }

        if !restore.is_empty() {
            self.apply_with_retry(&record.entity_id, &restore).await?;
        }
        if !absent.is_empty() {
            tokio::time::timeout(
                self.call_timeout(),
                self.target.remove(&record.entity_id, &absent),
            )
            .await
            .map_err(|_| Error::external("rollback remove timed out"))??;
        }

        record.mark_rolled_back();
        self.store.update_execution(&record).await?;
        info!(execution = %execution_id, "execution rolled back");
        metrics::counter!("vantage_executions_total", "status" => "rolled_back").increment(1);
        Ok(record)
    }
}

/// Metrics monitored for a recommendation's outcome.
fn monitored_metrics(recommendation: &Finding) -> Vec<String> {
    match recommendation.metrics.get("target_metric") {
        Some(MetricValue::Text(metric)) => vec![metric.clone()],
        _ => vec!["clicks".to_string()],
    }
}
