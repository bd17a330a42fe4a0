//! HTTP transport: the rate-limit middleware and the decision service.

mod layer;
mod routes;
mod server;

pub use layer::{
    apply_headers, throttled_response, KeyFn, RateLimitLayer, RateLimitService, ThrottledBody,
    X_RATELIMIT_CAPACITY, X_RATELIMIT_LIMIT, X_RATELIMIT_REFILL_RATE, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET, X_RATELIMIT_TOKENS,
};
pub use routes::{router, AppState};
pub use server::HttpServer;
