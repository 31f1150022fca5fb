//! Watcher agent: scheduled detector runs.
//!
//! On each tick the watcher runs the detector registry over every
//! configured scope, then announces the findings the run touched. Findings
//! are published only after the detectors' upserts have committed, which is
//! what gives one lineage its causal event order.

use crate::agent::Agent;
use crate::bus::Bus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vantage_core::events::PipelineEvent;
use vantage_core::types::{Category, Scope};
use vantage_core::Result;
use vantage_detection::DetectorRegistry;
use vantage_store::{FindingFilter, Store};

/// Agent identity.
pub const NAME: &str = "watcher";

/// Checkpoint persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WatcherCheckpoint {
    last_run: Option<DateTime<Utc>>,
    runs_completed: u64,
}

/// Scheduled detector runner.
pub struct Watcher {
    scopes: Vec<Scope>,
    interval: Duration,
    detectors: DetectorRegistry,
    store: Arc<dyn Store>,
    bus: Bus,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("scopes", &self.scopes)
            .field("interval", &self.interval)
            .field("detectors", &self.detectors)
            .finish()
    }
}

impl Watcher {
    /// Create a watcher
    pub fn new(
        scopes: Vec<Scope>,
        interval: Duration,
        detectors: DetectorRegistry,
        store: Arc<dyn Store>,
        bus: Bus,
    ) -> Self {
        Self {
            scopes,
            interval,
            detectors,
            store,
            bus,
        }
    }

    /// Run detectors over one scope and announce what changed.
    ///
    /// Re-running over an unchanged view is a no-op by construction: the
    /// upserts merge into existing fingerprints and downstream consumers
    /// skip findings that already moved past `new`.
    pub async fn run_scope(&self, scope: &Scope) -> Result<usize> {
        let run_start = Utc::now();
        let summary = self.detectors.run_scope(scope).await;

        for failed in summary.failed() {
            warn!(
                scope = %scope,
                detector = failed.detector,
                error = failed.error.as_deref().unwrap_or(""),
                "detector failed during run"
            );
        }

        // announce every detector-stage finding this run touched
        let mut announced = 0;
        for category in [Category::Risk, Category::Opportunity, Category::Trend] {
            let touched = self
                .store
                .query(FindingFilter {
                    scope: Some(scope.clone()),
                    category: Some(category),
                    updated_since: Some(run_start),
                    ..Default::default()
                })
                .await?;
            for finding in touched {
                self.bus.publish(PipelineEvent::FindingCreated { finding });
                announced += 1;
            }
        }

        info!(
            scope = %scope,
            findings = summary.total_findings(),
            announced,
            "detection run complete"
        );
        Ok(announced)
    }

    async fn load_checkpoint(&self) -> WatcherCheckpoint {
        match self.store.load_checkpoint(NAME).await {
            Ok(Some(blob)) => serde_json::from_value(blob).unwrap_or_default(),
            _ => WatcherCheckpoint::default(),
        }
    }
}

#[async_trait]
impl Agent for Watcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn initialize(&self) -> Result<()> {
        let checkpoint = self.load_checkpoint().await;
        info!(
            scopes = self.scopes.len(),
            detectors = ?self.detectors.names(),
            last_run = ?checkpoint.last_run,
            "watcher initialized"
        );
        Ok(())
    }

    async fn tick(&self) -> Result<()> {
        // scopes run sequentially within one scheduled invocation
        for scope in &self.scopes {
            self.run_scope(scope).await?;
        }

        let mut checkpoint = self.load_checkpoint().await;
        checkpoint.last_run = Some(Utc::now());
        checkpoint.runs_completed += 1;
        self.store
            .save_checkpoint(NAME, serde_json::to_value(&checkpoint)?)
            .await?;
        Ok(())
    }
}
