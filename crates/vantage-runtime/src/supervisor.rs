//! Agent supervision.
//!
//! Spawns each agent into its own task, dispatches subscribed events,
//! drives poll schedules, and applies the bounded retry/backoff contract:
//! an unhandled processing error moves the agent to `Error`, backs off, and
//! returns it to `Running`; exhausting the consecutive-error budget parks
//! the agent in terminal `Failed` until an external restart.

use crate::agent::{Agent, AgentState, HealthRegistry};
use crate::bus::Bus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use vantage_core::config::RuntimeConfig;

/// Supervisor owning the agent tasks.
#[derive(Debug)]
pub struct Supervisor {
    bus: Bus,
    registry: Arc<HealthRegistry>,
    config: RuntimeConfig,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Create a supervisor
    pub fn new(bus: Bus, registry: Arc<HealthRegistry>, config: RuntimeConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            registry,
            config,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// The shared health registry.
    pub fn registry(&self) -> Arc<HealthRegistry> {
        self.registry.clone()
    }

    /// Spawn one agent under supervision.
    pub fn spawn(&mut self, agent: Arc<dyn Agent>) {
        let bus = self.bus.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let name = agent.name();
            registry.register(name);

            // initialize is idempotent; retry with backoff before giving up
            let mut init_attempts = 0u32;
            loop {
                match agent.initialize().await {
                    Ok(()) => break,
                    Err(e) => {
                        init_attempts += 1;
                        if init_attempts >= config.max_consecutive_errors {
                            error!(agent = name, error = %e, "initialization failed terminally");
                            registry.set_state(name, AgentState::Failed);
                            return;
                        }
                        warn!(agent = name, attempt = init_attempts, error = %e, "initialization failed; retrying");
                        tokio::time::sleep(backoff(config.error_backoff_ms, init_attempts)).await;
                    }
                }
            }

            registry.set_state(name, AgentState::Running);
            info!(agent = name, "agent running");

            let subscriptions = agent.subscriptions();
            let mut rx = bus.subscribe();

            let has_poll = agent.poll_interval().is_some();
            let mut poll = tokio::time::interval(
                agent
                    .poll_interval()
                    .unwrap_or(Duration::from_secs(3_600)),
            );
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                registry.heartbeat(name);

                let step = tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    received = rx.recv() => match received {
                        Ok(envelope) => {
                            if !subscriptions.contains(&envelope.event.kind()) {
                                continue;
                            }
                            agent.handle_event(&envelope.event).await
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(agent = name, skipped, "event bus lagged; events skipped");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = poll.tick(), if has_poll => agent.tick().await,
                };

                match step {
                    Ok(()) => {
                        registry.record_processed(name);
                        registry.set_state(name, AgentState::Running);
                        metrics::counter!("vantage_agent_processed_total", "agent" => name)
                            .increment(1);
                    }
                    Err(e) => {
                        let consecutive = registry.record_error(name);
                        registry.set_state(name, AgentState::Error);
                        metrics::counter!("vantage_agent_errors_total", "agent" => name)
                            .increment(1);
                        error!(agent = name, consecutive, error = %e, "agent processing error");

                        if consecutive >= config.max_consecutive_errors {
                            error!(
                                agent = name,
                                "consecutive error budget exhausted; agent failed terminally"
                            );
                            registry.set_state(name, AgentState::Failed);
                            break;
                        }

                        tokio::time::sleep(backoff(config.error_backoff_ms, consecutive)).await;
                        registry.set_state(name, AgentState::Running);
                    }
                }
            }

            // release resources on every exit path
            if let Err(e) = agent.shutdown().await {
                warn!(agent = name, error = %e, "agent shutdown reported an error");
            }
            if registry.get(name).map(|h| h.state) != Some(AgentState::Failed) {
                registry.set_state(name, AgentState::Shutdown);
            }
            info!(agent = name, "agent stopped");
        });

        self.handles.push(handle);
    }

    /// Signal shutdown and wait for every agent to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(6));
    Duration::from_millis((base_ms.saturating_mul(factor)).min(60_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vantage_core::events::{EventKind, PipelineEvent};
    use vantage_core::finding::Finding;
    use vantage_core::types::{Category, EntityType, Scope, Severity};
    use vantage_core::{Error, Result};

    struct Counting {
        seen: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Agent for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn subscriptions(&self) -> Vec<EventKind> {
            vec![EventKind::FindingCreated]
        }
        async fn handle_event(&self, _event: &PipelineEvent) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AlwaysFailing;

    #[async_trait]
    impl Agent for AlwaysFailing {
        fn name(&self) -> &'static str {
            "always-failing"
        }
        fn subscriptions(&self) -> Vec<EventKind> {
            vec![EventKind::FindingCreated]
        }
        async fn handle_event(&self, _event: &PipelineEvent) -> Result<()> {
            Err(Error::external("boom"))
        }
    }

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            max_consecutive_errors: 3,
            error_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn finding() -> Finding {
        Finding::new(
            Scope::new("s"),
            EntityType::Page,
            "/x",
            Category::Risk,
            Severity::High,
            0.9,
            "anomaly",
            7,
        )
    }

    #[tokio::test]
    async fn subscribed_events_are_dispatched() {
        let bus = Bus::new(64);
        let registry = Arc::new(HealthRegistry::new());
        let mut supervisor = Supervisor::new(bus.clone(), registry.clone(), test_config());

        let seen = Arc::new(AtomicU32::new(0));
        supervisor.spawn(Arc::new(Counting { seen: seen.clone() }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        bus.publish(PipelineEvent::FindingCreated { finding: finding() });
        bus.publish(PipelineEvent::FindingCreated { finding: finding() });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        let health = registry.get("counting").unwrap();
        assert_eq!(health.state, AgentState::Running);
        assert_eq!(health.processed, 2);

        supervisor.shutdown().await;
        assert_eq!(
            registry.get("counting").unwrap().state,
            AgentState::Shutdown
        );
    }

    #[tokio::test]
    async fn exhausted_error_budget_fails_terminally() {
        let bus = Bus::new(64);
        let registry = Arc::new(HealthRegistry::new());
        let mut supervisor = Supervisor::new(bus.clone(), registry.clone(), test_config());

        supervisor.spawn(Arc::new(AlwaysFailing));
        tokio::time::sleep(Duration::from_millis(50)).await;

        for _ in 0..4 {
            bus.publish(PipelineEvent::FindingCreated { finding: finding() });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let health = registry.get("always-failing").unwrap();
        assert_eq!(health.state, AgentState::Failed);
        assert_eq!(health.consecutive_errors, 3);

        supervisor.shutdown().await;
        // terminal failure survives shutdown
        assert_eq!(
            registry.get("always-failing").unwrap().state,
            AgentState::Failed
        );
    }
}
