//! HTTP client module
//!
//! Thin transport for every remote call the engine makes.
//!
//! # Features
//!
//! - **Transient Retries**: Connect/timeout failures and malformed JSON bodies
//!   are retried with exponential backoff
//! - **Quota Admission**: Calls are refused once a quota governor trips
//! - **Pacing**: Token bucket rate limiter using governor

mod client;
mod rate_limit;

pub use client::{HttpClient, HttpClientConfig, RequestBody, RequestConfig};
pub use rate_limit::{RateLimiter, RateLimiterConfig};

#[cfg(test)]
mod tests;
