//! Dashboard API route handlers.
//!
//! All endpoints return JSON. Nothing here writes: the handlers only see a
//! [`TradeHistory`] and the engine's status.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::engine::{EngineStatus, StatusSnapshot};
use crate::storage::{TradeHistory, TradeStatistics};
use crate::types::{CurrentHolding, Trade};

const DEFAULT_TRADE_LIMIT: i64 = 100;
const MAX_TRADE_LIMIT: i64 = 1000;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub history: TradeHistory,
    pub status: Arc<EngineStatus>,
}

pub type AppState = Arc<DashboardState>;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = %format!("{e:#}"), "Dashboard query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable".to_string())
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub engine: StatusSnapshot,
    pub current_holding: Option<CurrentHolding>,
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let current_holding = state.history.current_holding().await.map_err(internal)?;
    Ok(Json(StatusResponse {
        engine: state.status.snapshot().await,
        current_holding,
    }))
}

/// GET /api/trades?limit=N (newest first)
pub async fn get_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> ApiResult<Vec<Trade>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRADE_LIMIT)
        .clamp(1, MAX_TRADE_LIMIT);
    let trades = state.history.trades(Some(limit)).await.map_err(internal)?;
    Ok(Json(trades))
}

/// GET /api/statistics
pub async fn get_statistics(State(state): State<AppState>) -> ApiResult<TradeStatistics> {
    let now = chrono::Utc::now().timestamp_millis();
    let stats = state.history.statistics(now).await.map_err(internal)?;
    Ok(Json(stats))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
