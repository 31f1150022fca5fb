//! Detection rule implementations.

pub mod anomaly;
pub mod opportunity;
pub mod trend;

pub use anomaly::AnomalyDetector;
pub use opportunity::OpportunityDetector;
pub use trend::TrendDetector;

use std::collections::HashMap;
use vantage_core::metrics_view::MetricsRow;

/// Reduce a window of rows to the latest row per entity.
pub(crate) fn latest_rows(rows: Vec<MetricsRow>) -> Vec<MetricsRow> {
    let mut latest: HashMap<String, MetricsRow> = HashMap::new();
    for row in rows {
        match latest.get(&row.entity_id) {
            Some(existing) if existing.date >= row.date => {}
            _ => {
                latest.insert(row.entity_id.clone(), row);
            }
        }
    }
    let mut rows: Vec<MetricsRow> = latest.into_values().collect();
    rows.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    rows
}
