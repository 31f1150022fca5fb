//! Core value types: scopes, entities, categories, severities, payload values,
//! and the finding workflow state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The analyzed property/tenant (e.g. a site or search property).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope(String);

impl Scope {
    /// Create a new scope
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    /// Get the scope as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scope {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A single page/URL
    Page,
    /// A search query
    Query,
    /// A site directory/section
    Directory,
    /// The whole scope
    Scope,
}

impl EntityType {
    /// Stable string form used inside the fingerprint.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Page => "page",
            EntityType::Query => "query",
            EntityType::Directory => "directory",
            EntityType::Scope => "scope",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "page" => Ok(EntityType::Page),
            "query" => Ok(EntityType::Query),
            "directory" => Ok(EntityType::Directory),
            "scope" => Ok(EntityType::Scope),
            _ => Err(format!("unknown entity type: {}", s)),
        }
    }
}

/// Finding category, ordered by pipeline stage.
///
/// The ordering backs the linked-parent invariant: a finding may only link
/// to a parent of an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A regression of a tracked value
    Risk,
    /// Visibility without conversion, or a near-miss ranking
    Opportunity,
    /// A fitted directional movement
    Trend,
    /// Root-cause explanation of a risk
    Diagnosis,
    /// An actionable, dispatchable change proposal
    Recommendation,
}

impl Category {
    /// Stable string form used inside the fingerprint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Risk => "risk",
            Category::Opportunity => "opportunity",
            Category::Trend => "trend",
            Category::Diagnosis => "diagnosis",
            Category::Recommendation => "recommendation",
        }
    }

    /// Pipeline stage index. Lower stages come earlier.
    pub fn stage(&self) -> u8 {
        match self {
            Category::Risk | Category::Opportunity | Category::Trend => 0,
            Category::Diagnosis => 1,
            Category::Recommendation => 2,
        }
    }

    /// True if `parent` is a legal link target for this category.
    pub fn may_link_to(&self, parent: Category) -> bool {
        match self {
            Category::Diagnosis => parent == Category::Risk,
            Category::Recommendation => {
                parent == Category::Diagnosis || parent == Category::Risk
            }
            _ => false,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "risk" => Ok(Category::Risk),
            "opportunity" => Ok(Category::Opportunity),
            "trend" => Ok(Category::Trend),
            "diagnosis" => Ok(Category::Diagnosis),
            "recommendation" => Ok(Category::Recommendation),
            _ => Err(format!("unknown category: {}", s)),
        }
    }
}

/// Finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Weight used for recommendation ranking.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 2.0,
            Severity::High => 3.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// A single value in the open, detector-specific metrics payload.
///
/// Declared value kinds rather than an untyped blob so the payload stays
/// schema-free without losing portability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Flag(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Text view of the value, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Number(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Flag(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// Workflow state of a finding.
///
/// `New → Investigating → Diagnosed → Actioned → Resolved`, with a parallel
/// terminal `Failed` reachable from Investigating or Actioned. Forward moves
/// may skip stages; backward moves are rejected except via the explicit
/// administrative reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    New,
    Investigating,
    Diagnosed,
    Actioned,
    Resolved,
    Failed,
}

impl FindingStatus {
    /// Stable string form for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::New => "new",
            FindingStatus::Investigating => "investigating",
            FindingStatus::Diagnosed => "diagnosed",
            FindingStatus::Actioned => "actioned",
            FindingStatus::Resolved => "resolved",
            FindingStatus::Failed => "failed",
        }
    }

    /// Position on the forward path. `Failed` sits outside the path.
    fn rank(&self) -> Option<u8> {
        match self {
            FindingStatus::New => Some(0),
            FindingStatus::Investigating => Some(1),
            FindingStatus::Diagnosed => Some(2),
            FindingStatus::Actioned => Some(3),
            FindingStatus::Resolved => Some(4),
            FindingStatus::Failed => None,
        }
    }

    /// True if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FindingStatus::Resolved | FindingStatus::Failed)
    }

    /// Whether a transition from `self` to `to` is legal without the
    /// administrative reset path.
    pub fn can_transition(&self, to: FindingStatus) -> bool {
        match (self.rank(), to) {
            // Failed only from Investigating or Actioned
            (_, FindingStatus::Failed) => {
                matches!(self, FindingStatus::Investigating | FindingStatus::Actioned)
            }
            // Failed is terminal; everything else moves strictly forward
            (None, _) => false,
            (Some(from_rank), to_status) => match to_status.rank() {
                Some(to_rank) => to_rank > from_rank,
                None => false,
            },
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FindingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(FindingStatus::New),
            "investigating" => Ok(FindingStatus::Investigating),
            "diagnosed" => Ok(FindingStatus::Diagnosed),
            "actioned" => Ok(FindingStatus::Actioned),
            "resolved" => Ok(FindingStatus::Resolved),
            "failed" => Ok(FindingStatus::Failed),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        assert!(FindingStatus::New.can_transition(FindingStatus::Investigating));
        assert!(FindingStatus::Investigating.can_transition(FindingStatus::Diagnosed));
        assert!(FindingStatus::Diagnosed.can_transition(FindingStatus::Actioned));
        assert!(FindingStatus::Actioned.can_transition(FindingStatus::Resolved));
        // skips are forward moves too
        assert!(FindingStatus::New.can_transition(FindingStatus::Actioned));
    }

    #[test]
    fn backward_transitions_rejected() {
        assert!(!FindingStatus::Resolved.can_transition(FindingStatus::New));
        assert!(!FindingStatus::Diagnosed.can_transition(FindingStatus::Investigating));
        assert!(!FindingStatus::Actioned.can_transition(FindingStatus::Actioned));
    }

    #[test]
    fn failed_reachable_only_from_investigating_or_actioned() {
        assert!(FindingStatus::Investigating.can_transition(FindingStatus::Failed));
        assert!(FindingStatus::Actioned.can_transition(FindingStatus::Failed));
        assert!(!FindingStatus::New.can_transition(FindingStatus::Failed));
        assert!(!FindingStatus::Resolved.can_transition(FindingStatus::Failed));
        // Failed is terminal
        assert!(!FindingStatus::Failed.can_transition(FindingStatus::Resolved));
    }

    #[test]
    fn link_rules_follow_pipeline_order() {
        assert!(Category::Diagnosis.may_link_to(Category::Risk));
        assert!(Category::Recommendation.may_link_to(Category::Diagnosis));
        assert!(Category::Recommendation.may_link_to(Category::Risk));
        assert!(!Category::Diagnosis.may_link_to(Category::Opportunity));
        assert!(!Category::Risk.may_link_to(Category::Diagnosis));
    }

    #[test]
    fn metric_value_roundtrips_as_json() {
        let v = MetricValue::Number(-40.0);
        let json = serde_json::to_string(&v).unwrap();
        let back: MetricValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_f64(), Some(-40.0));

        let t = MetricValue::Text("ranking regression".to_string());
        let json = serde_json::to_string(&t).unwrap();
        let back: MetricValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), Some("ranking regression"));
    }
}
