//! Read contract for the pre-joined metrics feed.
//!
//! Rows are keyed by `(date, scope, entity_id)` and already carry lag values
//! at fixed offsets, rolling averages, and percent-change columns computed
//! by the upstream join/windowing job. Consumers filter by date range and
//! scope and never write.

use crate::error::Result;
use crate::types::{EntityType, Scope};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One per-entity daily row of the metrics view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRow {
    pub date: NaiveDate,
    pub scope: Scope,
    pub entity_type: EntityType,
    pub entity_id: String,

    /// Current-period metrics
    pub clicks: f64,
    pub impressions: f64,
    pub ctr: f64,
    pub position: f64,

    /// Same-entity lag values at fixed offsets
    pub clicks_lag_7: Option<f64>,
    pub clicks_lag_28: Option<f64>,
    pub impressions_lag_7: Option<f64>,
    pub position_lag_7: Option<f64>,

    /// Rolling statistics over the trailing window
    pub clicks_mean: Option<f64>,
    pub clicks_stddev: Option<f64>,

    /// Pre-computed percent-change columns
    pub clicks_pct_change_7: Option<f64>,
    pub impressions_pct_change_7: Option<f64>,
}

/// Auxiliary per-entity context used by the diagnosis hypothesis engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityContext {
    /// Week-over-week position movement (positive = worsened).
    pub position_change_wow: Option<f64>,
    /// Relative CTR change week-over-week (negative = dropped).
    pub ctr_change_wow: Option<f64>,
    /// Days since the entity's content was last modified.
    pub days_since_modified: Option<i64>,
    /// Free-form extra signals.
    pub extra: HashMap<String, f64>,
}

/// Inclusive date range filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Trailing window of `days` ending at `end`.
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        Self {
            start: end - chrono::Duration::days(days as i64 - 1),
            end,
        }
    }

    /// Trailing window of `days` ending today (UTC).
    pub fn trailing_from_today(days: u32) -> Self {
        Self::trailing(Utc::now().date_naive(), days)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// The queryable, pre-joined metrics table. Read-only.
#[async_trait]
pub trait MetricsView: Send + Sync {
    /// Rows for a scope within a date range.
    async fn query(&self, scope: &Scope, range: DateRange) -> Result<Vec<MetricsRow>>;

    /// Daily value series (clicks) for one entity, oldest first.
    async fn entity_series(
        &self,
        scope: &Scope,
        entity_id: &str,
        range: DateRange,
    ) -> Result<Vec<f64>>;

    /// Auxiliary context for one entity.
    async fn entity_context(&self, scope: &Scope, entity_id: &str) -> Result<EntityContext>;

    /// Latest snapshot of named metrics for one entity (used by outcome
    /// monitoring collection).
    async fn entity_snapshot(
        &self,
        scope: &Scope,
        entity_id: &str,
        metric_names: &[String],
    ) -> Result<HashMap<String, f64>>;
}

/// In-memory metrics view for tests and one-shot CLI runs.
///
/// Production deployments implement [`MetricsView`] against their own
/// warehouse; the pipeline only ever sees the trait.
#[derive(Debug, Clone, Default)]
pub struct StaticMetricsView {
    rows: Vec<MetricsRow>,
    contexts: HashMap<String, EntityContext>,
    snapshots: HashMap<String, HashMap<String, f64>>,
}

impl StaticMetricsView {
    /// Create an empty view
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a view from pre-built rows
    pub fn with_rows(rows: Vec<MetricsRow>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Add a row
    pub fn push_row(&mut self, row: MetricsRow) {
        self.rows.push(row);
    }

    /// Set the auxiliary context for an entity
    pub fn set_context(&mut self, entity_id: impl Into<String>, ctx: EntityContext) {
        self.contexts.insert(entity_id.into(), ctx);
    }

    /// Set the latest metric snapshot for an entity
    pub fn set_snapshot(&mut self, entity_id: impl Into<String>, values: HashMap<String, f64>) {
        self.snapshots.insert(entity_id.into(), values);
    }
}

#[async_trait]
impl MetricsView for StaticMetricsView {
    async fn query(&self, scope: &Scope, range: DateRange) -> Result<Vec<MetricsRow>> {
        Ok(self
            .rows
            .iter()
            .filter(|r| &r.scope == scope && range.contains(r.date))
            .cloned()
            .collect())
    }

    async fn entity_series(
        &self,
        scope: &Scope,
        entity_id: &str,
        range: DateRange,
    ) -> Result<Vec<f64>> {
        let mut rows: Vec<&MetricsRow> = self
            .rows
            .iter()
            .filter(|r| &r.scope == scope && r.entity_id == entity_id && range.contains(r.date))
            .collect();
        rows.sort_by_key(|r| r.date);
        Ok(rows.iter().map(|r| r.clicks).collect())
    }

    async fn entity_context(&self, _scope: &Scope, entity_id: &str) -> Result<EntityContext> {
        Ok(self.contexts.get(entity_id).cloned().unwrap_or_default())
    }

    async fn entity_snapshot(
        &self,
        _scope: &Scope,
        entity_id: &str,
        metric_names: &[String],
    ) -> Result<HashMap<String, f64>> {
        let all = self.snapshots.get(entity_id).cloned().unwrap_or_default();
        Ok(all
            .into_iter()
            .filter(|(k, _)| metric_names.is_empty() || metric_names.contains(k))
            .collect())
    }
}
