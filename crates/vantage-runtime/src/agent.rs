//! Agent lifecycle and health contract.
//!
//! Every long-lived worker implements [`Agent`]: an idempotent
//! `initialize`, event handling and/or polling while running, and a
//! `shutdown` that releases resources on every exit path. Health is a
//! snapshot in a shared registry, pollable at any time without blocking the
//! agent's own processing loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use vantage_core::events::{EventKind, PipelineEvent};
use vantage_core::Result;

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initialized,
    Running,
    Error,
    Shutdown,
    /// Terminal: consecutive-error budget exhausted; requires external
    /// restart.
    Failed,
}

impl AgentState {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Initialized => "initialized",
            AgentState::Running => "running",
            AgentState::Error => "error",
            AgentState::Shutdown => "shutdown",
            AgentState::Failed => "failed",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time health snapshot for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub state: AgentState,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub processed: u64,
    pub errors: u64,
    pub consecutive_errors: u32,
}

impl AgentHealth {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            state: AgentState::Initialized,
            started_at: now,
            last_heartbeat: now,
            processed: 0,
            errors: 0,
            consecutive_errors: 0,
        }
    }

    /// Seconds since the agent started.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

/// Shared, lock-free registry of agent health snapshots.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    agents: DashMap<String, AgentHealth>,
}

impl HealthRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, resetting its counters.
    pub fn register(&self, agent_id: &str) {
        self.agents.insert(agent_id.to_string(), AgentHealth::new());
    }

    /// Update an agent's lifecycle state.
    pub fn set_state(&self, agent_id: &str, state: AgentState) {
        if let Some(mut health) = self.agents.get_mut(agent_id) {
            health.state = state;
        }
    }

    /// Record a heartbeat.
    pub fn heartbeat(&self, agent_id: &str) {
        if let Some(mut health) = self.agents.get_mut(agent_id) {
            health.last_heartbeat = Utc::now();
        }
    }

    /// Record one successfully processed item; clears the consecutive
    /// error count.
    pub fn record_processed(&self, agent_id: &str) {
        if let Some(mut health) = self.agents.get_mut(agent_id) {
            health.processed += 1;
            health.consecutive_errors = 0;
        }
    }

    /// Record a processing error; returns the new consecutive count.
    pub fn record_error(&self, agent_id: &str) -> u32 {
        match self.agents.get_mut(agent_id) {
            Some(mut health) => {
                health.errors += 1;
                health.consecutive_errors += 1;
                health.consecutive_errors
            }
            None => 0,
        }
    }

    /// Snapshot one agent.
    pub fn get(&self, agent_id: &str) -> Option<AgentHealth> {
        self.agents.get(agent_id).map(|h| h.clone())
    }

    /// Snapshot every agent.
    pub fn snapshot(&self) -> Vec<(String, AgentHealth)> {
        let mut all: Vec<(String, AgentHealth)> = self
            .agents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

/// A long-lived pipeline worker.
///
/// Agents coordinate only through the bus and the store: no agent calls
/// another agent's internals. Checkpoints persist through the store; exact
/// resumption relies on the store's upsert idempotence, not agent-side
/// deduplication.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Stable agent identity (also the checkpoint key).
    fn name(&self) -> &'static str;

    /// Event kinds this agent consumes. Empty for poll-only agents.
    fn subscriptions(&self) -> Vec<EventKind> {
        Vec::new()
    }

    /// Poll cadence for agents that work on their own schedule.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Establish resources. Must be idempotent and safe to retry.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Handle one dispatched event.
    async fn handle_event(&self, event: &PipelineEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }

    /// One scheduled poll step.
    async fn tick(&self) -> Result<()> {
        Ok(())
    }

    /// Complete or cancel in-flight work and release resources. Called on
    /// every exit path, including after an uncaught error.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_counters() {
        let registry = HealthRegistry::new();
        registry.register("watcher");

        registry.record_processed("watcher");
        registry.record_processed("watcher");
        assert_eq!(registry.record_error("watcher"), 1);
        assert_eq!(registry.record_error("watcher"), 2);

        let health = registry.get("watcher").unwrap();
        assert_eq!(health.processed, 2);
        assert_eq!(health.errors, 2);
        assert_eq!(health.consecutive_errors, 2);

        // success clears the consecutive count but not the total
        registry.record_processed("watcher");
        let health = registry.get("watcher").unwrap();
        assert_eq!(health.consecutive_errors, 0);
        assert_eq!(health.errors, 2);
    }

    #[test]
    fn snapshot_is_nonblocking_and_sorted() {
        let registry = HealthRegistry::new();
        registry.register("b");
        registry.register("a");
        let names: Vec<String> = registry.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
