//! HTTP routes for the screening service.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;

use crate::data::chain::ProviderStatus;
use crate::data::shanghai_offset;
use crate::error::ScreenError;
use crate::screener::{ScreeningCandidate, ScreeningResult};
use crate::ScreenerState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// One recommended security.
#[derive(Debug, Serialize)]
pub struct RecommendationItem {
    pub name: String,
    pub code: String,
    pub price: f64,
    pub change_pct: f64,
    pub volume_ratio: f64,
    pub turnover_rate: f64,
    pub pe: f64,
    /// 100M-yuan units, e.g. "2262亿", or "N/A"
    pub market_cap: String,
    pub reason: String,
    pub change_60d: Option<f64>,
}

impl From<&ScreeningCandidate> for RecommendationItem {
    fn from(candidate: &ScreeningCandidate) -> Self {
        let q = &candidate.quote;
        Self {
            name: q.name.clone(),
            code: q.code.clone(),
            price: q.price,
            change_pct: q.change_pct,
            volume_ratio: q.volume_ratio,
            turnover_rate: q.turnover_rate,
            pe: q.pe_ratio,
            market_cap: format_market_cap(q.market_cap_yuan),
            reason: candidate.reason.clone(),
            change_60d: q.change_60d_pct,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub buy: Vec<RecommendationItem>,
    pub watch: Vec<RecommendationItem>,
    /// Asia/Shanghai, "YYYY-MM-DD HH:MM:SS"
    pub updated_at: String,
}

impl From<&ScreeningResult> for RecommendationsResponse {
    fn from(result: &ScreeningResult) -> Self {
        Self {
            buy: result.buy.iter().map(RecommendationItem::from).collect(),
            watch: result.watch.iter().map(RecommendationItem::from).collect(),
            updated_at: result
                .updated_at
                .with_timezone(&shanghai_offset())
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderStatus>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn format_market_cap(cap_yuan: f64) -> String {
    if cap_yuan > 0.0 {
        format!("{:.0}亿", cap_yuan / 1e8)
    } else {
        "N/A".to_string()
    }
}

fn screen_error(err: ScreenError) -> ApiError {
    let code = match err {
        ScreenError::Timeout(_) => "screening_timeout",
        ScreenError::Cancelled => "screening_cancelled",
        ScreenError::InvalidConfiguration(_) => "screening_failed",
    };
    let message = err.to_string();
    let status = marketscan_common::Error::from(err).status_code();

    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse {
            error: code.to_string(),
            message,
        }),
    )
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "marketscan-screener".to_string(),
    })
}

/// Buy and watch short-lists for the current market.
///
/// Caching lives in the pipeline; every request calls `run()`.
pub async fn get_recommendations(
    State(state): State<Arc<ScreenerState>>,
) -> Result<Json<RecommendationsResponse>, ApiError> {
    let cancel = state.shutdown.child_token();
    match state.pipeline.run(&cancel).await {
        Ok(result) => Ok(Json(RecommendationsResponse::from(result.as_ref()))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to produce recommendations");
            Err(screen_error(e))
        }
    }
}

/// Provider order and health.
pub async fn get_providers(State(state): State<Arc<ScreenerState>>) -> Json<ProvidersResponse> {
    let providers = state.pipeline.chain().status().await;
    let count = providers.len();
    Json(ProvidersResponse { providers, count })
}
