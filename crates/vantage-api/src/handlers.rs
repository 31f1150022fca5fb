//! Request handlers.

use crate::ApiState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use vantage_core::finding::FindingId;
use vantage_core::{Error, Finding};
use vantage_store::{FindingFilter, Store};

/// Error payload.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

pub(crate) struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Transition(_) | Error::Config(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health snapshot.
#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub agents: Vec<AgentHealthEntry>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AgentHealthEntry {
    pub agent: String,
    #[serde(flatten)]
    pub health: vantage_runtime::AgentHealth,
}

/// `GET /health`
pub(crate) async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let agents = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(agent, health)| AgentHealthEntry { agent, health })
        .collect();
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        agents,
    })
}

/// Query parameters for finding listings.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct FindingQuery {
    pub scope: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub entity_id: Option<String>,
    pub approved: Option<bool>,
    pub limit: Option<usize>,
}

impl FindingQuery {
    fn into_filter(self) -> Result<FindingFilter, ApiError> {
        let category = self
            .category
            .map(|raw| raw.parse())
            .transpose()
            .map_err(|e: String| ApiError(Error::validation(e)))?;
        let status = self
            .status
            .map(|raw| raw.parse())
            .transpose()
            .map_err(|e: String| ApiError(Error::validation(e)))?;
        Ok(FindingFilter {
            scope: self.scope.map(vantage_core::types::Scope::new),
            category,
            status,
            entity_id: self.entity_id,
            approved: self.approved,
            limit: Some(self.limit.unwrap_or(100).min(1_000)),
            ..Default::default()
        })
    }
}

/// `GET /api/v1/findings`
pub(crate) async fn list_findings(
    State(state): State<ApiState>,
    Query(query): Query<FindingQuery>,
) -> Result<Json<Vec<Finding>>, ApiError> {
    let filter = query.into_filter()?;
    let findings = state.store.query(filter).await?;
    Ok(Json(findings))
}

/// `GET /api/v1/findings/{id}`
pub(crate) async fn get_finding(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Finding>, ApiError> {
    let finding = state
        .store
        .get(&FindingId::from_string(&id))
        .await?
        .ok_or_else(|| ApiError(Error::not_found(format!("finding {}", id))))?;
    Ok(Json(finding))
}

/// `POST /api/v1/findings/{id}/approve`: the external approval boundary.
pub(crate) async fn approve_finding(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Finding>, ApiError> {
    let approved = state
        .store
        .mark_approved(&FindingId::from_string(&id))
        .await?;
    info!(finding = %approved.id, "recommendation approved");
    Ok(Json(approved))
}

/// `GET /api/v1/agents`
pub(crate) async fn agent_health(
    State(state): State<ApiState>,
) -> Json<Vec<AgentHealthEntry>> {
    Json(
        state
            .registry
            .snapshot()
            .into_iter()
            .map(|(agent, health)| AgentHealthEntry { agent, health })
            .collect(),
    )
}
