//! Opportunity detection via visibility-without-conversion test.
//!
//! Flags entities whose exposure rose sharply without the outcome metric
//! improving, or whose rank sits in the near-miss band with exposure above
//! a volume floor.

use crate::detectors::latest_rows;
use crate::{stats, Detector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use vantage_core::config::OpportunityConfig;
use vantage_core::metrics_view::{DateRange, MetricsRow, MetricsView};
use vantage_core::types::{Category, Scope, Severity};
use vantage_core::{Finding, Result};
use vantage_store::Store;

/// Detector name / finding source.
pub const NAME: &str = "opportunity";

/// Visibility-without-conversion detector.
pub struct OpportunityDetector {
    config: OpportunityConfig,
    window_days: u32,
    view: Arc<dyn MetricsView>,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for OpportunityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpportunityDetector")
            .field("config", &self.config)
            .field("window_days", &self.window_days)
            .finish()
    }
}

impl OpportunityDetector {
    /// Create a new opportunity detector
    pub fn new(
        config: OpportunityConfig,
        window_days: u32,
        view: Arc<dyn MetricsView>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            config,
            window_days,
            view,
            store,
        }
    }

    fn evaluate(&self, scope: &Scope, row: &MetricsRow) -> Option<Finding> {
        // exposure rose sharply without the outcome metric improving
        let impressions_rise = row
            .impressions_pct_change_7
            .or_else(|| {
                row.impressions_lag_7
                    .and_then(|lag| stats::pct_change(row.impressions, lag))
            });
        let clicks_change = row
            .clicks_pct_change_7
            .or_else(|| row.clicks_lag_7.and_then(|lag| stats::pct_change(row.clicks, lag)));

        let unconverted_visibility = matches!(
            (impressions_rise, clicks_change),
            (Some(rise), Some(clicks)) if rise > self.config.impressions_rise_pct && clicks <= 0.0
        );

        // near-miss ranking band with exposure above the volume floor
        let near_miss = row.position >= self.config.near_miss_position_min
            && row.position <= self.config.near_miss_position_max
            && row.impressions >= self.config.impressions_floor;

        if !unconverted_visibility && !near_miss {
            return None;
        }

        let reason = if unconverted_visibility {
            "visibility_without_conversion"
        } else {
            "near_miss_position"
        };
        let confidence = if unconverted_visibility && near_miss {
            0.9
        } else {
            0.7
        };

        debug!(entity = %row.entity_id, reason, "opportunity detected");

        let mut finding = Finding::new(
            scope.clone(),
            row.entity_type,
            row.entity_id.clone(),
            Category::Opportunity,
            Severity::Medium,
            confidence,
            NAME,
            self.window_days,
        )
        .with_metric("reason", reason)
        .with_metric("impressions", row.impressions)
        .with_metric("clicks", row.clicks)
        .with_metric("position", row.position);

        if let Some(rise) = impressions_rise {
            finding = finding.with_metric("impressions_rise_pct", rise);
        }
        if let Some(clicks) = clicks_change {
            finding = finding.with_metric("clicks_change_pct", clicks);
        }
        Some(finding)
    }
}

#[async_trait]
impl Detector for OpportunityDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn detect(&self, scope: &Scope) -> Result<usize> {
        let range = DateRange::trailing_from_today(self.window_days);
        let rows = self.view.query(scope, range).await?;

        let mut count = 0;
        for row in latest_rows(rows) {
            if let Some(finding) = self.evaluate(scope, &row) {
                self.store.upsert(finding).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}
