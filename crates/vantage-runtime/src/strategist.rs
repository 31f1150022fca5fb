//! Strategist agent: turns diagnoses into ranked recommendations.
//!
//! Consumes `diagnosis_complete`, derives an action from the primary cause,
//! ranks it by severity × confidence × cause weight, and persists a linked
//! recommendation. Consumes `outcome_evaluated` as the feedback loop:
//! achieved outcomes boost the causing weight, missed outcomes decay it.
//! The adjusted weights are the agent's checkpoint.

use crate::agent::Agent;
use crate::bus::Bus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vantage_core::config::StrategistConfig;
use vantage_core::events::{EventKind, PipelineEvent};
use vantage_core::execution::OutcomeVerdict;
use vantage_core::finding::FindingId;
use vantage_core::types::{Category, MetricValue};
use vantage_core::{Finding, Result};
use vantage_store::Store;

/// Agent identity / recommendation finding source.
pub const NAME: &str = "strategist";

/// Cause-to-action table. The action name doubles as the change-set payload
/// the dispatcher later applies to the external target.
fn action_for(cause: &str) -> &'static str {
    match cause {
        "ranking regression" => "refresh_content",
        "engagement regression" => "rewrite_snippet",
        "recent content mutation" => "review_recent_edit",
        _ => "manual_review",
    }
}

/// Recommendation ranker with outcome feedback.
pub struct Strategist {
    config: StrategistConfig,
    weights: RwLock<HashMap<String, f64>>,
    store: Arc<dyn Store>,
    bus: Bus,
}

impl std::fmt::Debug for Strategist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategist")
            .field("config", &self.config)
            .finish()
    }
}

impl Strategist {
    /// Create a strategist
    pub fn new(config: StrategistConfig, store: Arc<dyn Store>, bus: Bus) -> Self {
        Self {
            weights: RwLock::new(config.cause_weights.clone()),
            config,
            store,
            bus,
        }
    }

    /// Build and persist a recommendation for one diagnosis.
    pub async fn recommend(&self, diagnosis: &Finding) -> Result<Finding> {
        let cause = diagnosis
            .metrics
            .get("cause")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "undetermined".to_string());
        let weight = {
            let weights = self.weights.read().await;
            weights.get(&cause).copied().unwrap_or(1.0)
        };
        let priority = diagnosis.severity.weight() * diagnosis.confidence * weight;
        let action = action_for(&cause);

        let recommendation = Finding::new(
            diagnosis.scope.clone(),
            diagnosis.entity_type,
            diagnosis.entity_id.clone(),
            Category::Recommendation,
            diagnosis.severity,
            diagnosis.confidence,
            NAME,
            diagnosis.window_size,
        )
        .with_link(diagnosis.id.clone())
        .with_metric("cause", cause.as_str())
        .with_metric("action", action)
        .with_metric("priority", priority)
        .with_metric("target_metric", "clicks")
        // declared post-conditions: the state the external target must show
        // after execution, checked by dispatch validation
        .with_metric("change:action", action)
        .with_metric("change:status", "applied");

        let recommendation = self.store.upsert(recommendation).await?;
        info!(
            diagnosis = %diagnosis.id,
            recommendation = %recommendation.id,
            action,
            priority,
            "recommendation created"
        );

        self.bus.publish(PipelineEvent::RecommendationCreated {
            recommendation: recommendation.clone(),
        });
        Ok(recommendation)
    }

    /// Fold an evaluated outcome back into the cause weights.
    async fn absorb_outcome(
        &self,
        recommendation_id: &FindingId,
        verdict: &OutcomeVerdict,
    ) -> Result<()> {
        let Some(recommendation) = self.store.get(recommendation_id).await? else {
            warn!(recommendation = %recommendation_id, "outcome for unknown recommendation");
            return Ok(());
        };
        let Some(MetricValue::Text(cause)) = recommendation.metrics.get("cause") else {
            return Ok(());
        };

        let mut weights = self.weights.write().await;
        let entry = weights.entry(cause.clone()).or_insert(1.0);
        let delta = if verdict.achieved {
            self.config.outcome_boost
        } else {
            -self.config.outcome_decay
        };
        *entry = (*entry + delta).clamp(self.config.weight_min, self.config.weight_max);
        debug!(
            cause = %cause,
            achieved = verdict.achieved,
            weight = *entry,
            "cause weight adjusted"
        );
        let snapshot = weights.clone();
        drop(weights);

        self.store
            .save_checkpoint(NAME, serde_json::json!({ "cause_weights": snapshot }))
            .await
    }

    /// Current cause weights (tests and inspection).
    pub async fn cause_weights(&self) -> HashMap<String, f64> {
        self.weights.read().await.clone()
    }
}

#[async_trait]
impl Agent for Strategist {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::DiagnosisComplete, EventKind::OutcomeEvaluated]
    }

    async fn initialize(&self) -> Result<()> {
        // resume adjusted weights from the checkpoint blob
        if let Some(blob) = self.store.load_checkpoint(NAME).await? {
            if let Some(saved) = blob.get("cause_weights") {
                if let Ok(saved) =
                    serde_json::from_value::<HashMap<String, f64>>(saved.clone())
                {
                    let mut weights = self.weights.write().await;
                    *weights = saved;
                    info!(weights = weights.len(), "strategist weights resumed");
                }
            }
        }
        Ok(())
    }

    async fn handle_event(&self, event: &PipelineEvent) -> Result<()> {
        match event {
            PipelineEvent::DiagnosisComplete { diagnosis, .. } => {
                self.recommend(diagnosis).await?;
                Ok(())
            }
            PipelineEvent::OutcomeEvaluated {
                recommendation_id,
                verdict,
                ..
            } => self.absorb_outcome(recommendation_id, verdict).await,
            _ => Ok(()),
        }
    }
}
