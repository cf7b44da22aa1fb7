//! Fixed-Window Admission Control
//!
//! A single-process fixed-window rate limiter with bounded queueing for
//! HTTP services. Callers acquire one permit per unit of work; when the
//! current window is exhausted they either park in a bounded wait queue
//! that drains on the next rotation, or are rejected on the spot. A tower
//! layer applies the limiter to axum routes.

pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod queue;

// Re-export main types
pub use config::{FixedWindowConfig, QueueOrder};
pub use error::{Result, ThrottleError};
pub use limiter::{AcquireOutcome, FixedWindowLimiter, LimiterStats};
pub use metrics::Metrics;
pub use middleware::ThrottleLayer;
