//! External execution target boundary.
//!
//! The dispatcher never talks to external systems directly; everything goes
//! through this trait with a bounded timeout. Production deployments
//! implement it against their CMS/platform APIs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use vantage_core::execution::ChangeSet;
use vantage_core::types::MetricValue;
use vantage_core::{Error, Result};

/// State of one entity on the external target.
pub type TargetState = BTreeMap<String, MetricValue>;

/// The external system a recommendation executes against.
#[async_trait]
pub trait ExecutionTarget: Send + Sync {
    /// Read the entity's current state.
    async fn read_state(&self, entity_id: &str) -> Result<TargetState>;

    /// Apply the change set to the entity.
    async fn apply(&self, entity_id: &str, change: &ChangeSet) -> Result<()>;

    /// Remove keys from the entity (used when a rollback restores a key
    /// that did not exist before execution).
    async fn remove(&self, entity_id: &str, keys: &[String]) -> Result<()>;
}

/// In-memory execution target for tests and dry wiring.
///
/// Keys listed in `drop_keys` are silently ignored on apply, which lets
/// tests simulate an execution whose post-validation fails; `fail_applies`
/// makes the first N apply calls error, exercising the retry path.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    state: RwLock<HashMap<String, TargetState>>,
    drop_keys: HashSet<String>,
    fail_applies: RwLock<u32>,
}

impl MemoryTarget {
    /// Create an empty target
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity's state
    pub fn seed(&self, entity_id: impl Into<String>, state: TargetState) {
        self.state
            .write()
            .expect("target state lock")
            .insert(entity_id.into(), state);
    }

    /// Silently ignore this key on apply (simulates a partial failure the
    /// validator must catch).
    pub fn with_dropped_key(mut self, key: impl Into<String>) -> Self {
        self.drop_keys.insert(key.into());
        self
    }

    /// Make the next `n` apply calls fail.
    pub fn fail_next_applies(&self, n: u32) {
        *self.fail_applies.write().expect("fail counter lock") = n;
    }

    /// Current state snapshot of one entity.
    pub fn snapshot(&self, entity_id: &str) -> TargetState {
        self.state
            .read()
            .expect("target state lock")
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionTarget for MemoryTarget {
    async fn read_state(&self, entity_id: &str) -> Result<TargetState> {
        Ok(self.snapshot(entity_id))
    }

    async fn apply(&self, entity_id: &str, change: &ChangeSet) -> Result<()> {
        {
            let mut failures = self.fail_applies.write().expect("fail counter lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::external("target apply refused"));
            }
        }
        let mut state = self.state.write().expect("target state lock");
        let entity = state.entry(entity_id.to_string()).or_default();
        for (key, value) in change {
            if self.drop_keys.contains(key) {
                continue;
            }
            entity.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn remove(&self, entity_id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.state.write().expect("target state lock");
        if let Some(entity) = state.get_mut(entity_id) {
            for key in keys {
                entity.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_and_remove_roundtrip() {
        let target = MemoryTarget::new();
        let change = ChangeSet::from([("status".to_string(), MetricValue::Text("applied".into()))]);
        target.apply("/x", &change).await.unwrap();
        assert_eq!(
            target.read_state("/x").await.unwrap().get("status"),
            Some(&MetricValue::Text("applied".into()))
        );

        target.remove("/x", &["status".to_string()]).await.unwrap();
        assert!(target.read_state("/x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_keys_never_land() {
        let target = MemoryTarget::new().with_dropped_key("status");
        let change = ChangeSet::from([("status".to_string(), MetricValue::Text("applied".into()))]);
        target.apply("/x", &change).await.unwrap();
        assert!(target.read_state("/x").await.unwrap().get("status").is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let target = MemoryTarget::new();
        target.fail_next_applies(1);
        let change = ChangeSet::new();
        assert!(target.apply("/x", &change).await.is_err());
        assert!(target.apply("/x", &change).await.is_ok());
    }
}
