//! Waitlist Intake Service
//!
//! Backend for a landing page waitlist: validates email/phone signups,
//! records them in a managed Postgres through its REST API, and rate limits
//! submissions per client over a fixed window.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod metrics;
pub mod redis;
pub mod service;
pub mod store;
pub mod utils;
pub mod validation;

// Re-export main types
pub use cache::{RateLimitCache, RateLimitDecision, RateLimitPolicy};
pub use config::ServiceConfig;
pub use error::{Result, WaitlistError};
pub use limiter::RateLimiter;
pub use service::SignupService;
pub use store::{SignupRecord, SignupStore};
