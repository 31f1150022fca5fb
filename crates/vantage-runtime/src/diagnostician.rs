//! Diagnostician agent: enriches risks into root-cause diagnoses.
//!
//! Consumes `finding_created` events for risk findings, evaluates the
//! ordered hypothesis list against the entity's auxiliary context, persists
//! a linked diagnosis, moves the risk to `diagnosed`, and only then
//! publishes `diagnosis_complete`.

use crate::agent::Agent;
use crate::bus::Bus;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use vantage_core::events::{EventKind, PipelineEvent};
use vantage_core::metrics_view::MetricsView;
use vantage_core::types::{Category, FindingStatus};
use vantage_core::{Finding, Result};
use vantage_detection::diagnosis::DiagnosisEngine;
use vantage_store::Store;

/// Agent identity / diagnosis finding source.
pub const NAME: &str = "diagnostician";

/// Hypothesis-driven risk diagnostician.
pub struct Diagnostician {
    engine: DiagnosisEngine,
    view: Arc<dyn MetricsView>,
    store: Arc<dyn Store>,
    bus: Bus,
}

impl std::fmt::Debug for Diagnostician {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostician")
            .field("engine", &self.engine)
            .finish()
    }
}

impl Diagnostician {
    /// Create a diagnostician
    pub fn new(
        engine: DiagnosisEngine,
        view: Arc<dyn MetricsView>,
        store: Arc<dyn Store>,
        bus: Bus,
    ) -> Self {
        Self {
            engine,
            view,
            store,
            bus,
        }
    }

    /// Diagnose one risk finding end to end.
    pub async fn diagnose(&self, risk: &Finding) -> Result<Finding> {
        self.store
            .transition(&risk.id, FindingStatus::Investigating)
            .await?;

        let ctx = self
            .view
            .entity_context(&risk.scope, &risk.entity_id)
            .await?;
        let outcome = self.engine.evaluate(&ctx);

        let mut diagnosis = Finding::new(
            risk.scope.clone(),
            risk.entity_type,
            risk.entity_id.clone(),
            Category::Diagnosis,
            risk.severity,
            outcome.confidence,
            NAME,
            risk.window_size,
        )
        .with_link(risk.id.clone())
        .with_metric("cause", outcome.primary_cause.as_str());

        // retain every tested hypothesis and its evidence for audit
        for hypothesis in &outcome.tested {
            let key = hypothesis.name.replace(' ', "_");
            diagnosis = diagnosis.with_metric(format!("{}:passed", key), hypothesis.passed);
            diagnosis =
                diagnosis.with_metric(format!("{}:threshold", key), hypothesis.threshold);
            if let Some(observed) = hypothesis.observed {
                diagnosis = diagnosis.with_metric(format!("{}:observed", key), observed);
            }
        }

        let diagnosis = self.store.upsert(diagnosis).await?;
        self.store
            .transition(&risk.id, FindingStatus::Diagnosed)
            .await?;

        info!(
            risk = %risk.id,
            diagnosis = %diagnosis.id,
            cause = %outcome.primary_cause,
            "risk diagnosed"
        );

        // publish only after both writes committed
        self.bus.publish(PipelineEvent::DiagnosisComplete {
            diagnosis: diagnosis.clone(),
            risk_id: risk.id.clone(),
        });
        Ok(diagnosis)
    }
}

#[async_trait]
impl Agent for Diagnostician {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::FindingCreated]
    }

    async fn handle_event(&self, event: &PipelineEvent) -> Result<()> {
        let PipelineEvent::FindingCreated { finding } = event else {
            return Ok(());
        };
        if finding.category != Category::Risk {
            return Ok(());
        }
        // re-announced risks that already moved past `new` are a no-op;
        // this is what makes replay after restart safe
        if finding.status != FindingStatus::New {
            debug!(risk = %finding.id, status = %finding.status, "risk already in flight; skipping");
            return Ok(());
        }

        self.diagnose(finding).await?;
        Ok(())
    }
}
