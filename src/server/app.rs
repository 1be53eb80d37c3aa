//! Application setup: shared state, middleware stack, route table.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ratelimit::RateLimiter;
use crate::store::Store;

use super::middleware::{extract_client_ip, rate_limit_middleware};
use super::routes::{health, jobs};

/// State shared by every handler: the Store, the Job State Directory root,
/// and the per-process rate limiter bucket.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub jobs_dir: PathBuf,
    pub rate_limiter: Arc<RateLimiter>,
}

pub fn build_app(store: Arc<dyn Store>, jobs_dir: PathBuf, rate_limit_per_min: u32) -> Router {
    let state = AppState {
        store,
        jobs_dir,
        rate_limiter: Arc::new(RateLimiter::new(rate_limit_per_min)),
    };

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/api/health", get(health::health_handler))
        .route("/api/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/api/jobs/:job_id", get(jobs::get_job))
        .route("/api/jobs/:job_id/logs", get(jobs::get_logs))
        .route("/api/jobs/:job_id/artifacts", get(jobs::list_artifacts))
        .route(
            "/api/jobs/:job_id/artifacts/*name",
            get(jobs::download_artifact),
        )
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(Extension(state))
        .layer(middleware::from_fn(extract_client_ip))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
