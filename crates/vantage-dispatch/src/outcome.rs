//! Outcome monitor agent.
//!
//! Outcome sessions are durable scheduled work, not in-memory waits: the
//! monitor polls the store for sessions whose evaluation is due, collects a
//! metric snapshot, evaluates it against baseline and target, and publishes
//! `outcome_evaluated`. When a session's monitoring window closes, the
//! recommendation is resolved with the final verdict attached.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vantage_core::events::{EventKind, PipelineEvent};
use vantage_core::execution::{ExecutionStatus, OutcomeSnapshot, OutcomeSession, SessionStatus};
use vantage_core::metrics_view::MetricsView;
use vantage_core::types::FindingStatus;
use vantage_core::Result;
use vantage_runtime::{Agent, Bus};
use vantage_store::Store;

/// Agent identity.
pub const NAME: &str = "outcome-monitor";

/// Durable outcome session poller.
pub struct OutcomeMonitor {
    store: Arc<dyn Store>,
    view: Arc<dyn MetricsView>,
    bus: Bus,
    poll_interval: Duration,
    call_timeout: Duration,
}

impl std::fmt::Debug for OutcomeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeMonitor")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl OutcomeMonitor {
    /// Create an outcome monitor
    pub fn new(
        store: Arc<dyn Store>,
        view: Arc<dyn MetricsView>,
        bus: Bus,
        poll_interval: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            view,
            bus,
            poll_interval,
            call_timeout,
        }
    }

    /// Collect a snapshot for one session and evaluate it.
    pub async fn evaluate_session(&self, mut session: OutcomeSession) -> Result<()> {
        let metric_names: Vec<String> = session.targets.keys().cloned().collect();
        let values = tokio::time::timeout(
            self.call_timeout,
            self.view
                .entity_snapshot(&session.scope, &session.entity_id, &metric_names),
        )
        .await
        .map_err(|_| vantage_core::Error::external("outcome snapshot timed out"))??;

        session.record_snapshot(OutcomeSnapshot {
            collected_at: Utc::now(),
            values: values.into_iter().collect(),
        });

        let verdict = session.evaluate();
        let window_closed = Utc::now() >= session.ends_at();

        if window_closed {
            session.status = SessionStatus::Completed;
            session.final_verdict = Some(verdict.clone());
        }
        self.store.update_session(&session).await?;

        if window_closed {
            // attach the outcome to the recommendation and resolve it
            if let Some(mut recommendation) =
                self.store.get(&session.recommendation_id).await?
            {
                recommendation.metrics.insert(
                    "outcome_achieved".to_string(),
                    verdict.achieved.into(),
                );
                if let Some(primary) = verdict.metrics.first() {
                    recommendation.metrics.insert(
                        "outcome_change_pct".to_string(),
                        primary.change_pct.into(),
                    );
                }
                let recommendation = self.store.upsert(recommendation).await?;
                if recommendation.status == FindingStatus::Actioned {
                    self.store
                        .transition(&session.recommendation_id, FindingStatus::Resolved)
                        .await?;
                }
            } else {
                warn!(
                    session = %session.id,
                    recommendation = %session.recommendation_id,
                    "monitored recommendation no longer exists"
                );
            }
            info!(
                session = %session.id,
                achieved = verdict.achieved,
                "outcome monitoring window closed"
            );
        }

        // publish only after the session write committed
        self.bus.publish(PipelineEvent::OutcomeEvaluated {
            session_id: session.id,
            recommendation_id: session.recommendation_id.clone(),
            verdict,
        });
        Ok(())
    }
}

#[async_trait]
impl Agent for OutcomeMonitor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::ExecutionCompleted]
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.poll_interval)
    }

    /// A completed execution should have opened its monitoring session;
    /// surface the ones that did not.
    async fn handle_event(&self, event: &PipelineEvent) -> Result<()> {
        let PipelineEvent::ExecutionCompleted {
            execution_id,
            status,
            ..
        } = event
        else {
            return Ok(());
        };
        if *status != ExecutionStatus::Completed {
            return Ok(());
        }

        match self.store.get_execution(*execution_id).await? {
            Some(record) => match record.outcome_session_id {
                Some(session_id) => {
                    info!(
                        execution = %execution_id,
                        session = %session_id,
                        "outcome monitoring active"
                    );
                }
                None => warn!(
                    execution = %execution_id,
                    "completed execution has no outcome session"
                ),
            },
            None => warn!(execution = %execution_id, "completed execution not found"),
        }
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        let due = self.store.due_sessions(Utc::now()).await?;
        for session in due {
            let session_id = session.id;
            if let Err(e) = self.evaluate_session(session).await {
                // one stuck session must not starve the rest
                warn!(session = %session_id, error = %e, "session evaluation failed");
            }
        }
        Ok(())
    }
}
