//! Rate limiting algorithms, configuration and administration.

mod admin;
mod identifier;
mod limiter;
mod presets;
mod rules;
mod sliding_window;
mod token_bucket;

pub use admin::{Admin, Stats};
pub use identifier::{request_identifier, Principal, RequestMeta};
pub use limiter::{BucketStatus, LimitResult, Limiter, WindowStatus};
pub use presets::{LimitOverride, Preset};
pub use rules::{LimiterConfig, SlidingWindowConfig, TokenBucketConfig};
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;
