mod activate;
mod check;
mod common;
mod deactivate;
mod version;

pub use activate::*;
pub use check::*;
pub use common::*;
pub use deactivate::*;
pub use version::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::rate_limit;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Public license API, rate limited per tier: activation writes get the
/// strict tier, install check-ins the standard tier, health the relaxed one.
pub fn router(limits: RateLimitConfig) -> Router<AppState> {
    let strict = Router::new()
        .route("/activate", post(activate))
        .route("/deactivate", post(deactivate))
        .layer(rate_limit::strict_layer(limits.strict_rpm));

    let standard = Router::new()
        .route("/check", post(check))
        .route("/version", get(version))
        .layer(rate_limit::standard_layer(limits.standard_rpm));

    let relaxed = Router::new()
        .route("/health", get(health))
        .layer(rate_limit::relaxed_layer(limits.relaxed_rpm));

    strict.merge(standard).merge(relaxed)
}
