//! Dual health check aggregation
//!
//! Combines one MCP probe result and one REST probe result (either may be
//! absent) into a single server status with a continuous health score.

mod aggregator;

pub use aggregator::Aggregator;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::{McpCheckResult, RestCheckResult};

/// Discrete server status derived from the two probe legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which probe channel(s) currently succeed for a server.
///
/// `None` is mutually exclusive with the others; `Both` appears exactly
/// when `Mcp` and `Rest` both do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailablePath {
    Mcp,
    Rest,
    Both,
    None,
}

impl AvailablePath {
    pub fn as_str(self) -> &'static str {
        match self {
            AvailablePath::Mcp => "mcp",
            AvailablePath::Rest => "rest",
            AvailablePath::Both => "both",
            AvailablePath::None => "none",
        }
    }
}

/// Derived statistics attached to a [`DualHealthResult`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombinedMetrics {
    pub mcp_response_time_ms: f64,
    pub rest_response_time_ms: f64,
    /// Sum when both legs ran, else whichever is present, else 0
    pub combined_response_time_ms: f64,
    /// 1.0 or 0.0 for a single check; running averages live in the summary
    pub mcp_success_rate: f64,
    pub rest_success_rate: f64,
    pub combined_success_rate: f64,
    pub tools_expected: usize,
    pub tools_found: usize,
    pub tool_availability_pct: f64,
    /// Single-observation HTTP status histogram from the REST leg
    pub http_status_codes: HashMap<u16, u32>,
    pub health_endpoint_availability: f64,
}

/// The aggregate of one dual health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualHealthResult {
    pub server_name: String,
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    /// At least one leg succeeded
    pub overall_success: bool,
    /// Continuous wellness in [0.0, 1.0]; 0.0 exactly when both legs
    /// failed or were absent
    pub health_score: f64,
    pub mcp_result: Option<McpCheckResult>,
    pub rest_result: Option<RestCheckResult>,
    pub mcp_success: bool,
    pub rest_success: bool,
    pub mcp_response_time_ms: f64,
    pub rest_response_time_ms: f64,
    pub combined_response_time_ms: f64,
    pub available_paths: BTreeSet<AvailablePath>,
    pub mcp_error_message: Option<String>,
    pub rest_error_message: Option<String>,
    pub combined_metrics: CombinedMetrics,
}

/// Batch statistics over a list of results, with safe division throughout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub average_health_score: f64,
    pub average_response_time_ms: f64,
    pub mcp_success_rate: f64,
    pub rest_success_rate: f64,
    pub combined_success_rate: f64,
}
