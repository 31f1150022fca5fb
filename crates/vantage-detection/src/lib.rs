//! # Vantage Detection
//!
//! Statistical detectors over the metrics view.
//!
//! Each detector is a pure rule over [`MetricsRow`]s plus auxiliary context:
//! it queries a bounded recent window, applies its declared rule, and upserts
//! a finding per match. Detectors never write to each other's storage and
//! never call each other; the registry isolates failures so one detector's
//! error cannot block its siblings in the same run.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod detectors;
pub mod diagnosis;
pub mod stats;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use vantage_core::types::Scope;
use vantage_core::Result;

pub use detectors::{AnomalyDetector, OpportunityDetector, TrendDetector};
pub use diagnosis::{DiagnosisEngine, DiagnosisOutcome, HypothesisResult};

/// A detection rule. `detect` returns the number of findings upserted.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detector name; becomes the finding's `source` fingerprint component.
    fn name(&self) -> &'static str;

    /// Run the rule over one scope.
    async fn detect(&self, scope: &Scope) -> Result<usize>;
}

/// Per-detector result of one registry run.
#[derive(Debug, Clone)]
pub struct DetectorRunResult {
    pub detector: &'static str,
    pub findings: usize,
    pub error: Option<String>,
}

/// Summary of one scope run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub results: Vec<DetectorRunResult>,
}

impl RunSummary {
    /// Total findings upserted across detectors.
    pub fn total_findings(&self) -> usize {
        self.results.iter().map(|r| r.findings).sum()
    }

    /// Detectors that errored.
    pub fn failed(&self) -> impl Iterator<Item = &DetectorRunResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

/// Open registry of detector implementations selected by configuration.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field(
                "detectors",
                &self.detectors.iter().map(|d| d.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl DetectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector
    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.push(detector);
    }

    /// Registered detector names.
    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Run every detector over one scope, sequentially.
    ///
    /// A detector error is caught and logged; sibling detectors still run.
    pub async fn run_scope(&self, scope: &Scope) -> RunSummary {
        let mut summary = RunSummary::default();
        for detector in &self.detectors {
            match detector.detect(scope).await {
                Ok(findings) => {
                    info!(
                        detector = detector.name(),
                        scope = %scope,
                        findings,
                        "detector run complete"
                    );
                    summary.results.push(DetectorRunResult {
                        detector: detector.name(),
                        findings,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(
                        detector = detector.name(),
                        scope = %scope,
                        error = %e,
                        "detector run failed; continuing with siblings"
                    );
                    summary.results.push(DetectorRunResult {
                        detector: detector.name(),
                        findings: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        summary
    }
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::detectors::{AnomalyDetector, OpportunityDetector, TrendDetector};
    pub use crate::diagnosis::{DiagnosisEngine, DiagnosisOutcome};
    pub use crate::{Detector, DetectorRegistry, RunSummary};
}

#[cfg(test)]
mod tests {
    use super::*;
    use vantage_core::Error;

    struct Fixed(usize);

    #[async_trait]
    impl Detector for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn detect(&self, _scope: &Scope) -> Result<usize> {
            Ok(self.0)
        }
    }

    struct Broken;

    #[async_trait]
    impl Detector for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn detect(&self, _scope: &Scope) -> Result<usize> {
            Err(Error::computation("insufficient data"))
        }
    }

    #[tokio::test]
    async fn broken_detector_does_not_block_siblings() {
        let mut registry = DetectorRegistry::new();
        registry.register(Arc::new(Broken));
        registry.register(Arc::new(Fixed(3)));

        let summary = registry.run_scope(&Scope::new("s")).await;
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.total_findings(), 3);
        assert_eq!(summary.failed().count(), 1);
    }
}
