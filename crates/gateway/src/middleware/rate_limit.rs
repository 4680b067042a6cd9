//! Rate limiting for the generation trigger using a token bucket

use axum::{extract::Request, middleware::Next, response::Response};
use dealmemo_common::{config::RateLimitConfig, errors::AppError};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Create a rate limiter from configuration
pub fn create_rate_limiter(config: &RateLimitConfig) -> Result<Arc<GlobalRateLimiter>, AppError> {
    let invalid = |field: &str| AppError::Configuration {
        message: format!("rate_limit.{} must be greater than zero", field),
    };

    let rate = NonZeroU32::new(config.requests_per_second).ok_or_else(|| invalid("requests_per_second"))?;
    let burst = NonZeroU32::new(config.burst).ok_or_else(|| invalid("burst"))?;

    Ok(Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limiter: Arc<GlobalRateLimiter>,
    limit: u32,
) -> Result<Response, AppError> {
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited { limit })
        }
    }
}
