//! Tower middleware that puts a limiter in front of a service.
//!
//! ```rust,ignore
//! use admit::http::RateLimitLayer;
//! use admit::ratelimit::Preset;
//!
//! let limiter = Preset::Auth.config().build(store, clock)?;
//! let app = Router::new()
//!     .route("/login", post(login))
//!     .layer(RateLimitLayer::new(limiter));
//! ```

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, error};

use crate::ratelimit::{request_identifier, LimitResult, Limiter};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_TOKENS: HeaderName = HeaderName::from_static("x-ratelimit-tokens");
pub const X_RATELIMIT_CAPACITY: HeaderName = HeaderName::from_static("x-ratelimit-capacity");
pub const X_RATELIMIT_REFILL_RATE: HeaderName =
    HeaderName::from_static("x-ratelimit-refill-rate");

/// Derives the rate-limit key of a request.
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Body of a 429 response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottledBody {
    pub error: &'static str,
    pub message: String,
    pub retry_after_seconds: u64,
}

/// Layer applying a [`Limiter`] to every request.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn Limiter>,
    key_fn: KeyFn,
}

impl RateLimitLayer {
    /// Limit by the default caller identifier.
    pub fn new(limiter: Arc<dyn Limiter>) -> Self {
        Self {
            limiter,
            key_fn: Arc::new(|req: &Request| request_identifier(req)),
        }
    }

    /// Limit by a custom key instead.
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn Limiter>,
    key_fn: KeyFn,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let key = (self.key_fn)(&request);
        let decision = self.limiter.try_check_limit(&key);

        // Keep the instance that was polled ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match decision {
                Ok(result) if result.allowed() => {
                    let mut response = inner.call(request).await?;
                    apply_headers(response.headers_mut(), &result);
                    Ok(response)
                }
                Ok(result) => {
                    debug!(
                        key = %key,
                        retry_after_secs = result.retry_after_secs(),
                        "Request throttled"
                    );
                    Ok(throttled_response(&result))
                }
                Err(e) => {
                    // Fail open: a broken limiter must not take the guarded
                    // endpoint down with it.
                    error!(key = %key, error = %e, "Rate limiter failed, allowing request");
                    inner.call(request).await
                }
            }
        })
    }
}

/// Write the `X-RateLimit-*` headers describing `result`.
pub fn apply_headers(headers: &mut HeaderMap, result: &LimitResult) {
    match result {
        LimitResult::SlidingWindow(status) => {
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
            headers.insert(
                X_RATELIMIT_RESET,
                HeaderValue::from(epoch_secs(status.reset_time)),
            );
        }
        LimitResult::TokenBucket(status) => {
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.capacity));
            headers.insert(
                X_RATELIMIT_TOKENS,
                HeaderValue::from(status.tokens.max(0.0).floor() as u64),
            );
            headers.insert(X_RATELIMIT_CAPACITY, HeaderValue::from(status.capacity));
            if let Ok(rate) = HeaderValue::from_str(&status.refill_rate.to_string()) {
                headers.insert(X_RATELIMIT_REFILL_RATE, rate);
            }
            headers.insert(
                X_RATELIMIT_RESET,
                HeaderValue::from(epoch_secs(status.refill_time)),
            );
        }
        LimitResult::Unavailable => {}
    }
}

/// The standard 429 response for a denied `result`.
pub fn throttled_response(result: &LimitResult) -> Response {
    let retry_after = result.retry_after_secs();
    let body = ThrottledBody {
        error: "Too Many Requests",
        message: format!("Rate limit exceeded. Retry in {} seconds.", retry_after),
        retry_after_seconds: retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, result);
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Milliseconds to whole epoch seconds, rounded up.
fn epoch_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

/// A plain 200 response for guarded routes with nothing else to do.
pub(crate) fn ok_response() -> Response {
    Response::new(Body::from("ok"))
}
