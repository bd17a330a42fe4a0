//! HTTP endpoints of the decision service.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::layer::{apply_headers, ok_response, throttled_response, RateLimitLayer};
use crate::clock::Clock;
use crate::error::{AdmitError, Result};
use crate::ratelimit::{Admin, Limiter, LimiterConfig};
use crate::store::Store;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    limiters: Arc<BTreeMap<String, Arc<dyn Limiter>>>,
    configs: Arc<BTreeMap<String, LimiterConfig>>,
    admin: Admin,
}

impl AppState {
    /// Build one limiter per named configuration, all over `store`.
    pub fn new(
        configs: BTreeMap<String, LimiterConfig>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut limiters = BTreeMap::new();
        let mut namespaces = BTreeMap::new();
        for (name, config) in &configs {
            if let Some(other) = namespaces.insert(config.namespace(), name) {
                return Err(AdmitError::Config(format!(
                    "limiters {} and {} share the store namespace {}",
                    other,
                    name,
                    config.namespace()
                )));
            }
            let limiter = config.build(store.clone(), clock.clone())?;
            debug!(limiter = %name, config = ?config, "Registered limiter");
            limiters.insert(name.clone(), limiter);
        }

        Ok(Self {
            limiters: Arc::new(limiters),
            configs: Arc::new(configs),
            admin: Admin::new(store, clock),
        })
    }

    /// Names of the registered limiters.
    pub fn limiter_names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/v1/check/{limiter}/{key}", post(check))
        .route("/v1/status/{limiter}/{key}", get(status))
        .route("/v1/limits/{key}", delete(clear_limits))
        .route("/v1/stats", get(stats));

    for (name, limiter) in state.limiters.iter() {
        router = router.route(
            &format!("/v1/guarded/{}", name),
            any(guarded).layer(RateLimitLayer::new(limiter.clone())),
        );
    }

    router.with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn guarded() -> Response {
    ok_response()
}

/// Consume one unit of quota for `key` and report the decision.
#[instrument(skip(state))]
async fn check(
    State(state): State<AppState>,
    Path((limiter, key)): Path<(String, String)>,
) -> Response {
    let Some(rate_limiter) = state.limiters.get(&limiter) else {
        return unknown_limiter(&limiter);
    };

    let result = rate_limiter.check_limit(&key);
    info!(
        limiter = %limiter,
        key = %key,
        allowed = result.allowed(),
        "Rate limit decision made"
    );

    if !result.allowed() {
        return throttled_response(&result);
    }

    let mut response = Json(&result).into_response();
    apply_headers(response.headers_mut(), &result);
    response
}

/// Report the state of `key` without consuming quota.
#[instrument(skip(state))]
async fn status(
    State(state): State<AppState>,
    Path((limiter, key)): Path<(String, String)>,
) -> Response {
    let Some(config) = state.configs.get(&limiter) else {
        return unknown_limiter(&limiter);
    };

    match state.admin.get_status(&key, config) {
        Ok(result) => Json(result).into_response(),
        Err(e) => internal_error(e),
    }
}

#[instrument(skip(state))]
async fn clear_limits(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.admin.clear_limits(&key) {
        Ok(removed) => Json(json!({ "removed": removed })).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn stats(State(state): State<AppState>) -> Response {
    match state.admin.stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e),
    }
}

fn unknown_limiter(name: &str) -> Response {
    warn!(limiter = %name, "Request for unknown limiter");
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown limiter: {}", name) })),
    )
        .into_response()
}

fn internal_error(e: AdmitError) -> Response {
    warn!(error = %e, "Admin operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}
