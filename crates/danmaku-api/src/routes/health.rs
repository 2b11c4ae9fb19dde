//! Ambient health/readiness/metrics endpoints. Never mounted under the
//! token-scoped compat surface: these exist for the deployer, not the
//! dandanplay client.

use actix_web::{web, HttpResponse};

use crate::state::AppState;

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "danmaku-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Readiness probes the cache and library connections rather than just
/// confirming the process is alive.
async fn readiness_check(state: web::Data<AppState>) -> HttpResponse {
    let library_ok = state.library.find_anime_by_id(-1).await.is_ok();
    let config_ok = state.config.get_or("searchFallbackEnabled", "true").await.is_ok();

    let ready = library_ok && config_ok;
    let status = if ready {
        actix_web::http::StatusCode::OK
    } else {
        actix_web::http::StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status).json(serde_json::json!({
        "ready": ready,
        "checks": { "library": library_ok, "config": config_ok },
    }))
}

async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.render())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/liveness", web::get().to(liveness_check))
        .route("/metrics", web::get().to(metrics_handler));
}
