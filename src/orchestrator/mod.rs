//! Check orchestration: concurrency, timeouts, retries, cancellation.

mod engine;

pub use engine::HealthCheckEngine;
