//! Trend detection via regression fit.
//!
//! Fits the entity's value series to a line and accepts the trend only when
//! the fit quality and the slope's significance both pass their thresholds.
//! The reported magnitude is the fitted slope projected across the window.

use crate::detectors::latest_rows;
use crate::{stats, Detector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use vantage_core::config::TrendConfig;
use vantage_core::metrics_view::{DateRange, MetricsView};
use vantage_core::types::{Category, Scope, Severity};
use vantage_core::{Finding, Result};
use vantage_store::Store;

/// Detector name / finding source.
pub const NAME: &str = "trend";

/// Regression-fit trend detector.
pub struct TrendDetector {
    config: TrendConfig,
    window_days: u32,
    view: Arc<dyn MetricsView>,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for TrendDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendDetector")
            .field("config", &self.config)
            .field("window_days", &self.window_days)
            .finish()
    }
}

impl TrendDetector {
    /// Create a new trend detector
    pub fn new(
        config: TrendConfig,
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
}

#[async_trait]
impl Detector for TrendDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn detect(&self, scope: &Scope) -> Result<usize> {
        let range = DateRange::trailing_from_today(self.window_days);
        let rows = self.view.query(scope, range).await?;

        let mut count = 0;
        for row in latest_rows(rows) {
            let series = self
                .view
                .entity_series(scope, &row.entity_id, range)
                .await?;
            if series.len() < self.config.min_points {
                continue;
            }

            let Some(fit) = stats::linear_fit(&series) else {
                continue;
            };
            if fit.r_squared < self.config.min_r_squared
                || fit.p_value > self.config.max_p_value
                || fit.slope == 0.0
            {
                continue;
            }

            let projected = fit.slope * self.window_days as f64;
            let direction = if fit.slope > 0.0 { "up" } else { "down" };
            // relative magnitude against the fitted level at window start
            let severity = match stats::pct_change(fit.intercept + projected, fit.intercept) {
                Some(pct) if pct.abs() >= 20.0 => Severity::Medium,
                _ => Severity::Low,
            };
            let confidence = (fit.r_squared * (1.0 - fit.p_value)).clamp(0.0, 0.99);

            debug!(
                entity = %row.entity_id,
                slope = fit.slope,
                r_squared = fit.r_squared,
                p_value = fit.p_value,
                direction,
                "trend detected"
            );

            let finding = Finding::new(
                scope.clone(),
                row.entity_type,
                row.entity_id.clone(),
                Category::Trend,
                severity,
                confidence,
                NAME,
                self.window_days,
            )
            .with_metric("metric", "clicks")
            .with_metric("slope", fit.slope)
            .with_metric("projected_change", projected)
            .with_metric("r_squared", fit.r_squared)
            .with_metric("p_value", fit.p_value)
            .with_metric("direction", direction);

            self.store.upsert(finding).await?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vantage_core::metrics_view::{MetricsRow, StaticMetricsView};
    use vantage_core::types::{EntityType, MetricValue};
    use vantage_store::{FindingFilter, SqliteStore};

    fn series_rows(entity: &str, values: &[f64]) -> Vec<MetricsRow> {
        let today = Utc::now().date_naive();
        values
            .iter()
            .enumerate()
            .map(|(i, &clicks)| MetricsRow {
                date: today - Duration::days((values.len() - 1 - i) as i64),
                scope: Scope::new("s"),
                entity_type: EntityType::Page,
                entity_id: entity.to_string(),
                clicks,
                impressions: 100.0,
                ctr: 0.1,
                position: 5.0,
                clicks_lag_7: None,
                clicks_lag_28: None,
                impressions_lag_7: None,
                position_lag_7: None,
                clicks_mean: None,
                clicks_stddev: None,
                clicks_pct_change_7: None,
                impressions_pct_change_7: None,
            })
            .collect()
    }

    fn detector(view: StaticMetricsView, store: Arc<SqliteStore>) -> TrendDetector {
        TrendDetector::new(TrendConfig::default(), 7, Arc::new(view), store)
    }

    #[tokio::test]
    async fn clean_upward_series_is_flagged() {
        let view = StaticMetricsView::with_rows(series_rows(
            "/a",
            &[10.0, 14.0, 18.5, 22.0, 26.5, 30.0, 34.0],
        ));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        let count = detector.detect(&Scope::new("s")).await.unwrap();
        assert_eq!(count, 1);
        let f = &store
            .query(FindingFilter::category(Category::Trend))
            .await
            .unwrap()[0];
        assert_eq!(f.metrics.get("direction"), Some(&MetricValue::Text("up".into())));
        assert!(f.metrics.get("r_squared").unwrap().as_f64().unwrap() > 0.7);
    }

    #[tokio::test]
    async fn noisy_series_fails_fit_quality() {
        let view = StaticMetricsView::with_rows(series_rows(
            "/a",
            &[10.0, 30.0, 5.0, 28.0, 8.0, 25.0, 12.0],
        ));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        assert_eq!(detector.detect(&Scope::new("s")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn short_series_is_skipped() {
        let view = StaticMetricsView::with_rows(series_rows("/a", &[10.0, 12.0, 14.0]));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        assert_eq!(detector.detect(&Scope::new("s")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flat_series_carries_no_trend() {
        let view = StaticMetricsView::with_rows(series_rows(
            "/a",
            &[20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0],
        ));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let detector = detector(view, store.clone());

        assert_eq!(detector.detect(&Scope::new("s")).await.unwrap(), 0);
    }
}
