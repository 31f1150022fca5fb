//! # Vantage API
//!
//! HTTP surface for the pipeline:
//! - `GET /health`: liveness plus component snapshot
//! - `GET /api/v1/findings`: filtered finding queries
//! - `GET /api/v1/findings/{id}`: one finding
//! - `POST /api/v1/findings/{id}/approve`: the external approval signal
//! - `GET /api/v1/agents`: agent health snapshots
//!
//! Dashboards are out of scope; this is the operational boundary other
//! systems (and humans with curl) integrate against.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod handlers;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use vantage_core::{Error, Result};
use vantage_runtime::HealthRegistry;
use vantage_store::Store;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub timeout_secs: u64,
}

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<HealthRegistry>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub version: &'static str,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("started_at", &self.started_at)
            .field("version", &self.version)
            .finish()
    }
}

/// The API server.
#[derive(Debug)]
pub struct ApiServer {
    config: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    /// Create a server
    pub fn new(config: ApiConfig, store: Arc<dyn Store>, registry: Arc<HealthRegistry>) -> Self {
        Self {
            config,
            state: ApiState {
                store,
                registry,
                started_at: chrono::Utc::now(),
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    /// Bind and serve until the task is aborted.
    pub async fn serve(self) -> Result<()> {
        let router = routes::create_router(self.state, self.config.timeout_secs);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| Error::external(format!("bind {}: {}", self.config.bind_addr, e)))?;
        info!(addr = %self.config.bind_addr, "API server listening");
        axum::serve(listener, router)
            .await
            .map_err(|e| Error::external(format!("API server: {}", e)))
    }
}
