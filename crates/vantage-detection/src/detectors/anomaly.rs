//! Risk detection via level/ratio test.
//!
//! Flags an entity when its tracked value's deviation from the trailing
//! mean exceeds a two-sided z-score threshold AND the percent change
//! exceeds an absolute floor. Severity escalates from medium to high when
//! the magnitude crosses the second, larger floor.

use crate::detectors::latest_rows;
use crate::{stats, Detector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use vantage_core::config::AnomalyConfig;
use vantage_core::metrics_view::{DateRange, MetricsRow, MetricsView};
use vantage_core::types::{Category, Scope, Severity};
use vantage_core::{Finding, Result};
use vantage_store::Store;

/// Detector name / finding source.
pub const NAME: &str = "anomaly";

/// Level/ratio risk detector.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    window_days: u32,
    view: Arc<dyn MetricsView>,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for AnomalyDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyDetector")
            .field("config", &self.config)
            .field("window_days", &self.window_days)
            .finish()
    }
}

impl AnomalyDetector {
    /// Create a new anomaly detector
    pub fn new(
        config: AnomalyConfig,
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

    /// Evaluate one entity row; returns the finding when the rule matches.
    fn evaluate(&self, scope: &Scope, row: &MetricsRow) -> Option<Finding> {
        let mean = row.clicks_mean?;
        let stddev = row.clicks_stddev?;

        // zero/undefined historical stddev disables the z-path
        let z = stats::zscore(row.clicks, mean, stddev)?;
        if z.abs() <= self.config.zscore_threshold {
            return None;
        }

        // zero-baseline percent math short-circuits to "not computable"
        let pct = row
            .clicks_pct_change_7
            .or_else(|| row.clicks_lag_7.and_then(|lag| stats::pct_change(row.clicks, lag)))
            .or_else(|| stats::pct_change(row.clicks, mean))?;
        if pct.abs() <= self.config.pct_change_floor {
            return None;
        }

        let severity = if pct.abs() >= self.config.high_severity_floor {
            Severity::High
        } else {
            Severity::Medium
        };
        let confidence =
            (1.0 - 1.0 / (1.0 + (z.abs() - self.config.zscore_threshold))).clamp(0.5, 0.99);

        debug!(
            entity = %row.entity_id,
            zscore = z,
            pct_change = pct,
            severity = %severity,
            "risk detected"
        );

        Some(
            Finding::new(
                scope.clone(),
                row.entity_type,
                row.entity_id.clone(),
                Category::Risk,
                severity,
                confidence,
                NAME,
                self.window_days,
            )
            .with_metric("metric", "clicks")
            .with_metric("value", row.clicks)
            .with_metric("mean", mean)
            .with_metric("stddev", stddev)
            .with_metric("zscore", z)
            .with_metric("pct_change", pct),
        )
    }
}

#[async_trait]
impl Detector for AnomalyDetector {
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vantage_core::metrics_view::StaticMetricsView;
    use vantage_core::types::EntityType;
    use vantage_store::{FindingFilter, SqliteStore};

    fn row(entity: &str, clicks: f64, mean: Option<f64>, stddev: Option<f64>) -> MetricsRow {
        MetricsRow {
            date: Utc::now().date_naive(),
            scope: Scope::new("s"),
            entity_type: EntityType::Page,
            entity_id: entity.to_string(),
            clicks,
            impressions: 1000.0,
            ctr: 0.05,
            position: 8.0,
            clicks_lag_7: None,
            clicks_lag_28: None,
            impressions_lag_7: None,
            position_lag_7: None,
            clicks_mean: mean,
            clicks_stddev: stddev,
            clicks_pct_change_7: None,
            impressions_pct_change_7: None,
        }
    }

    fn detector(view: StaticMetricsView, store: Arc<SqliteStore>) -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default(), 7, Arc::new(view), store)
    }

    #[tokio::test]
    async fn reference_scenario_yields_high_severity_risk() {
        // current=60, mean=100, stdev=15 -> z ~= -2.67, pct = -40%
        let view =
            StaticMetricsView::with_rows(vec![row("/blog/x", 60.0, Some(100.0), Some(15.0))]);
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        let count = detector.detect(&Scope::new("s")).await.unwrap();
        assert_eq!(count, 1);

        let findings = store
            .query(FindingFilter::category(Category::Risk))
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.severity, Severity::High);
        let z = f.metrics.get("zscore").unwrap().as_f64().unwrap();
        assert!((z - (-2.6666667)).abs() < 1e-4);
        let pct = f.metrics.get("pct_change").unwrap().as_f64().unwrap();
        assert!((pct - (-40.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn moderate_drop_is_medium_severity() {
        // pct = -30%: above the 20% floor, below the 50% escalation floor
        let view = StaticMetricsView::with_rows(vec![row("/a", 70.0, Some(100.0), Some(10.0))]);
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        detector.detect(&Scope::new("s")).await.unwrap();
        let findings = store.query(FindingFilter::default()).await.unwrap();
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn zero_stddev_yields_no_finding() {
        let view = StaticMetricsView::with_rows(vec![row("/a", 60.0, Some(100.0), Some(0.0))]);
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        let count = detector.detect(&Scope::new("s")).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn small_pct_change_below_floor_is_ignored() {
        // z is large but the relative move is under the 20% floor
        let view = StaticMetricsView::with_rows(vec![row("/a", 90.0, Some(100.0), Some(2.0))]);
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        let count = detector.detect(&Scope::new("s")).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let view =
            StaticMetricsView::with_rows(vec![row("/blog/x", 60.0, Some(100.0), Some(15.0))]);
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());
        let scope = Scope::new("s");

        detector.detect(&scope).await.unwrap();
        let first = store.query(FindingFilter::default()).await.unwrap();

        detector.detect(&scope).await.unwrap();
        let second = store.query(FindingFilter::default()).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].status, second[0].status);
    }
}
