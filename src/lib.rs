//! Admit - Admission Control for HTTP Services
//!
//! This crate decides whether a caller may proceed. It provides sliding-window
//! and token-bucket limiters over a pluggable keyed store with per-entry
//! expiry, named presets, a tower middleware that attaches `X-RateLimit-*`
//! headers and answers 429 on denial, and a small HTTP decision service.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
