pub mod bus;
pub mod config;
mod error;
pub mod omitter;
pub mod platform;
pub mod retry;
mod routes;
pub mod stream;
pub mod supervisor;
mod validation;

use auspex_state::Trackers;
use axum::{Router, http::StatusCode, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use error::{AppError, ErrorResponse};
pub use validation::ValidationError;

pub struct AppState {
    pub trackers: Arc<Trackers>,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for the query endpoints
    pub per_sec: u64,
    /// Burst size for the query endpoints
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_sec: 20,
            burst: 40,
        }
    }
}

/// Create the application router over the given trackers. Rate limiting is
/// skipped when `rate_limit` is `None`.
pub fn create_app(
    trackers: Arc<Trackers>,
    request_body_limit: usize,
    request_timeout: Duration,
    rate_limit: Option<RateLimitConfig>,
) -> anyhow::Result<Router> {
    let state = Arc::new(AppState { trackers });

    let mut query_routes = Router::new()
        .route("/{platform}/characters", get(routes::characters))
        .route("/{platform}/outfits", get(routes::outfits))
        .route("/{platform}/population", get(routes::population))
        .route("/{platform}/population/{world_id}", get(routes::world_population));

    if let Some(rate_limit) = rate_limit {
        let governor = GovernorConfigBuilder::default()
            .per_second(rate_limit.per_sec.max(1))
            .burst_size(rate_limit.burst.max(1))
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?;
        query_routes = query_routes.layer(GovernorLayer::new(governor));
    }

    Ok(Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(query_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
