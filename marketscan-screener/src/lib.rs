//! MarketScan Screener Library
//!
//! Market-wide A-share screening: one snapshot of the whole exchange from
//! the first healthy upstream source, filtered and scored into "buy" and
//! "watch" short-lists.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 marketscan-screener (Rust Service)                  │
//! │                               :4436                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐             │
//! │  │ Snapshot     │──▶│ Fallback     │──▶│ Provider     │ tushare     │
//! │  │ Cache        │   │ Chain        │   │ Adapters     │ eastmoney   │
//! │  └──────┬───────┘   └──────────────┘   └──────────────┘ sina(+qq)   │
//! │         ▼                                                           │
//! │  ┌──────────────┐   ┌──────────────┐                                │
//! │  │ Screening    │──▶│ Screening    │──▶ GET /api/v1/market/...      │
//! │  │ Engine       │   │ Result       │                                │
//! │  └──────────────┘   └──────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod screener;

pub use error::ScreenError;
pub use pipeline::ScreeningPipeline;
pub use screener::{ScreeningCandidate, ScreeningEngine, ScreeningResult};

use anyhow::Result;
use axum::{routing::get, Router};
use marketscan_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

/// Extra time the HTTP layer allows beyond the run deadline
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Screening service state
pub struct ScreenerState {
    /// Configuration
    pub config: Config,
    /// Screening pipeline (owns the snapshot cache and provider health)
    pub pipeline: Arc<ScreeningPipeline>,
    /// Cancelled on shutdown; every run uses a child token
    pub shutdown: CancellationToken,
}

impl ScreenerState {
    /// Create a new screener state
    pub fn new(config: Config) -> Result<Self, ScreenError> {
        let pipeline = ScreeningPipeline::from_config(&config)?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: Config, pipeline: ScreeningPipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ScreenerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let request_timeout = state.pipeline.run_deadline() + REQUEST_TIMEOUT_SLACK;

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/market/recommendations", get(routes::get_recommendations))
        .route("/api/v1/market/providers", get(routes::get_providers))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors)
}

/// Main screening service
pub struct ScreenerService {
    state: Arc<ScreenerState>,
}

impl ScreenerService {
    /// Create a new screening service
    pub fn new(config: Config) -> Result<Self, ScreenError> {
        let state = Arc::new(ScreenerState::new(config)?);
        Ok(Self { state })
    }

    pub fn state(&self) -> &Arc<ScreenerState> {
        &self.state
    }

    /// Serve until Ctrl-C; shutdown cancels in-flight runs.
    pub async fn start(self) -> Result<()> {
        let screener = &self.state.config.screener;
        let addr = SocketAddr::from((screener.host.parse::<std::net::IpAddr>()?, screener.port));

        let app = build_router(Arc::clone(&self.state));

        tracing::info!(address = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await?;

        tracing::info!("Screener stopped");
        Ok(())
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested, cancelling in-flight runs");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
