//! Dispatcher agent.
//!
//! Consumes `recommendation_created` events and polls for approvals that
//! arrive later. Anything unapproved is inert. For an approved
//! recommendation it executes, validates the post-conditions, rolls back
//! when a critical check failed, and publishes `execution_completed` with
//! the record's final status.

use crate::engine::ExecutionEngine;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vantage_core::events::{EventKind, PipelineEvent};
use vantage_core::execution::ExecutionStatus;
use vantage_core::finding::FindingId;
use vantage_core::types::{Category, FindingStatus};
use vantage_core::Result;
use vantage_runtime::{Agent, Bus};
use vantage_store::{FindingFilter, Store};

/// Agent identity.
pub const NAME: &str = "dispatcher";

/// Approval-gated execution dispatcher.
pub struct Dispatcher {
    engine: Arc<ExecutionEngine>,
    store: Arc<dyn Store>,
    bus: Bus,
    poll_interval: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("engine", &self.engine)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        engine: Arc<ExecutionEngine>,
        store: Arc<dyn Store>,
        bus: Bus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            bus,
            poll_interval,
        }
    }

    /// Execute one recommendation if (and only if) it is approved and still
    /// awaiting action.
    pub async fn dispatch(&self, recommendation_id: &FindingId) -> Result<()> {
        let Some(recommendation) = self.store.get(recommendation_id).await? else {
            warn!(recommendation = %recommendation_id, "dispatch requested for unknown finding");
            return Ok(());
        };
        if !recommendation.approved {
            debug!(recommendation = %recommendation_id, "not approved; inert");
            return Ok(());
        }
        if recommendation.status != FindingStatus::New {
            debug!(
                recommendation = %recommendation_id,
                status = %recommendation.status,
                "already dispatched; skipping"
            );
            return Ok(());
        }

        let record = self.engine.execute(recommendation_id, false).await?;

        let final_status = if record.status == ExecutionStatus::Completed {
            let validation = self.engine.validate(record.id).await?;
            if self.engine.should_rollback(&validation) {
                warn!(
                    execution = %record.id,
                    "critical validation check failed; rolling back"
                );
                let rolled_back = self.engine.rollback(record.id).await?;
                self.store
                    .transition(recommendation_id, FindingStatus::Failed)
                    .await?;
                rolled_back.status
            } else {
                record.status
            }
        } else {
            record.status
        };

        info!(
            recommendation = %recommendation_id,
            execution = %record.id,
            status = final_status.as_str(),
            "dispatch complete"
        );

        // publish only after every write above has committed
        self.bus.publish(PipelineEvent::ExecutionCompleted {
            execution_id: record.id,
            recommendation_id: recommendation_id.clone(),
            status: final_status,
        });
        Ok(())
    }
}

#[async_trait]
impl Agent for Dispatcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::RecommendationCreated]
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.poll_interval)
    }

    async fn handle_event(&self, event: &PipelineEvent) -> Result<()> {
        let PipelineEvent::RecommendationCreated { recommendation } = event else {
            return Ok(());
        };
        self.dispatch(&recommendation.id).await
    }

    /// Approval can arrive long after the creation event; sweep for
    /// approved recommendations still awaiting action.
    async fn tick(&self) -> Result<()> {
        let pending = self
            .store
            .query(FindingFilter {
                category: Some(Category::Recommendation),
                status: Some(FindingStatus::New),
                approved: Some(true),
                ..Default::default()
            })
            .await?;
        for recommendation in pending {
            self.dispatch(&recommendation.id).await?;
        }
        Ok(())
    }
}
