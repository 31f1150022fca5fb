//! Notification routing boundary.
//!
//! Routing is `category × severity → set of channel names`, fully
//! data-driven from configuration. The core only ever calls the abstract
//! channel contract; real channel implementations live outside this
//! system. Sends are retried under the uniform backoff policy and failures
//! are logged, never silently dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vantage_core::config::NotifyConfig;
use vantage_core::events::{EventKind, PipelineEvent};
use vantage_core::retry::RetryPolicy;
use vantage_core::types::{Category, Severity};
use vantage_core::{Finding, Result};
use vantage_runtime::Agent;
use vantage_store::Store;

/// Result of one channel dispatch.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub channel: String,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Abstract send contract for a notification channel.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name referenced by routing rules.
    fn name(&self) -> &str;

    /// Render the finding as the channel-native payload.
    fn format(&self, finding: &Finding) -> String;

    /// Deliver one finding.
    async fn send(&self, finding: &Finding) -> Result<()>;

    /// Check the channel's configuration.
    fn validate_config(&self) -> bool;
}

/// Tracing-backed channel; the in-tree default for development and tests.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    fn format(&self, finding: &Finding) -> String {
        format!(
            "[{}/{}] {} {} ({})",
            finding.category, finding.severity, finding.entity_id, finding.source, finding.id
        )
    }

    async fn send(&self, finding: &Finding) -> Result<()> {
        info!(notification = %self.format(finding), "finding notification");
        Ok(())
    }

    fn validate_config(&self) -> bool {
        true
    }
}

/// Maps category and severity to channels and drives the sends.
pub struct NotificationRouter {
    routes: HashMap<(Category, Severity), Vec<String>>,
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("routes", &self.routes)
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NotificationRouter {
    /// Build a router from configuration. Unparseable route keys are
    /// logged and skipped; a route naming an unregistered channel is
    /// reported at dispatch time.
    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut routes = HashMap::new();
        for (key, channels) in &config.routes {
            match parse_route_key(key) {
                Some(route) => {
                    routes.insert(route, channels.clone());
                }
                None => warn!(key = %key, "ignoring unparseable notification route"),
            }
        }
        Self {
            routes,
            channels: HashMap::new(),
            retry: config.retry.clone(),
        }
    }

    /// Register a channel implementation.
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        if !channel.validate_config() {
            warn!(channel = channel.name(), "channel failed config validation; skipping");
            return;
        }
        self.channels.insert(channel.name().to_string(), channel);
    }

    /// Channel names routed for one finding.
    pub fn route(&self, finding: &Finding) -> Vec<String> {
        self.routes
            .get(&(finding.category, finding.severity))
            .cloned()
            .unwrap_or_default()
    }

    /// Send one finding to every routed channel, retrying per policy.
    pub async fn dispatch(&self, finding: &Finding) -> Vec<DispatchResult> {
        let mut results = Vec::new();
        for name in self.route(finding) {
            let Some(channel) = self.channels.get(&name) else {
                warn!(channel = %name, "route names an unregistered channel");
                results.push(DispatchResult {
                    channel: name,
                    success: false,
                    attempts: 0,
                    error: Some("unregistered channel".to_string()),
                });
                continue;
            };

            let mut attempts = 0;
            let mut last_error = None;
            for attempt in 0..self.retry.max_attempts {
                if attempt > 0 {
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                attempts += 1;
                match channel.send(finding).await {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        debug!(channel = %name, attempt, error = %e, "send attempt failed");
                        last_error = Some(e.to_string());
                    }
                }
            }

            if let Some(error) = &last_error {
                warn!(channel = %name, finding = %finding.id, error = %error, "notification send failed");
            }
            results.push(DispatchResult {
                channel: name,
                success: last_error.is_none(),
                attempts,
                error: last_error,
            });
        }
        results
    }
}

fn parse_route_key(key: &str) -> Option<(Category, Severity)> {
    let (category, severity) = key.split_once('/')?;
    Some((category.parse().ok()?, severity.parse().ok()?))
}

/// Agent identity.
pub const NAME: &str = "notifier";

/// Bridges pipeline events into the notification router.
pub struct Notifier {
    router: NotificationRouter,
    store: Arc<dyn Store>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("router", &self.router).finish()
    }
}

impl Notifier {
    /// Create a notifier agent
    pub fn new(router: NotificationRouter, store: Arc<dyn Store>) -> Self {
        Self { router, store }
    }
}

#[async_trait]
impl Agent for Notifier {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::FindingCreated, EventKind::ExecutionCompleted]
    }

    async fn handle_event(&self, event: &PipelineEvent) -> Result<()> {
        match event {
            PipelineEvent::FindingCreated { finding } => {
                self.router.dispatch(finding).await;
                Ok(())
            }
            PipelineEvent::ExecutionCompleted {
                recommendation_id, ..
            } => {
                if let Some(recommendation) = self.store.get(recommendation_id).await? {
                    self.router.dispatch(&recommendation).await;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vantage_core::types::{EntityType, Scope};
    use vantage_core::Error;

    fn finding(category: Category, severity: Severity) -> Finding {
        Finding::new(
            Scope::new("s"),
            EntityType::Page,
            "/x",
            category,
            severity,
            0.9,
            "anomaly",
            7,
        )
    }

    struct Flaky {
        failures_left: AtomicU32,
        sends: AtomicU32,
    }

    #[async_trait]
    impl NotificationChannel for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn format(&self, _finding: &Finding) -> String {
            String::new()
        }
        async fn send(&self, _finding: &Finding) -> Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::external("transient"));
            }
            Ok(())
        }
        fn validate_config(&self) -> bool {
            true
        }
    }

    fn test_config() -> NotifyConfig {
        NotifyConfig {
            routes: HashMap::from([
                ("risk/high".to_string(), vec!["log".to_string()]),
            ]),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay_ms: 1,
                backoff_multiplier: 2.0,
                max_delay_ms: 10,
            },
        }
    }

    #[tokio::test]
    async fn routing_is_category_and_severity_driven() {
        let mut router = NotificationRouter::from_config(&test_config());
        router.register(Arc::new(LogChannel));

        let routed = router.dispatch(&finding(Category::Risk, Severity::High)).await;
        assert_eq!(routed.len(), 1);
        assert!(routed[0].success);

        // no route for low-severity risks
        let unrouted = router.dispatch(&finding(Category::Risk, Severity::Low)).await;
        assert!(unrouted.is_empty());
    }

    #[tokio::test]
    async fn transient_send_failures_are_retried() {
        let config = NotifyConfig {
            routes: HashMap::from([("risk/high".to_string(), vec!["flaky".to_string()])]),
            ..test_config()
        };
        let mut router = NotificationRouter::from_config(&config);
        let flaky = Arc::new(Flaky {
            failures_left: AtomicU32::new(2),
            sends: AtomicU32::new(0),
        });
        router.register(flaky.clone());

        let results = router.dispatch(&finding(Category::Risk, Severity::High)).await;
        assert!(results[0].success);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(flaky.sends.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_failure() {
        let config = NotifyConfig {
            routes: HashMap::from([("risk/high".to_string(), vec!["flaky".to_string()])]),
            ..test_config()
        };
        let mut router = NotificationRouter::from_config(&config);
        router.register(Arc::new(Flaky {
            failures_left: AtomicU32::new(10),
            sends: AtomicU32::new(0),
        }));

        let results = router.dispatch(&finding(Category::Risk, Severity::High)).await;
        assert!(!results[0].success);
        assert_eq!(results[0].attempts, 3);
        assert!(results[0].error.is_some());
    }

    #[tokio::test]
    async fn unregistered_channel_is_surfaced_not_dropped() {
        let config = NotifyConfig {
            routes: HashMap::from([("risk/high".to_string(), vec!["pager".to_string()])]),
            ..test_config()
        };
        let router = NotificationRouter::from_config(&config);
        let results = router.dispatch(&finding(Category::Risk, Severity::High)).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
    }
}
