//! Health result aggregation and scoring
//!
//! Pure logic, no I/O. Every entry point returns a well-formed value for
//! any combination of present/absent/success/fail inputs; a bad
//! aggregation config falls back to the built-in default instead of
//! failing the check.

use std::collections::{BTreeSet, HashMap};

use crate::config::{AggregationConfig, ConfigError, ScoreModel};
use crate::probe::{McpCheckResult, RestCheckResult};

use super::{AggregationSummary, AvailablePath, CombinedMetrics, DualHealthResult, HealthStatus};

/// Response times above this draw a mild penalty (ms).
const SLOW_THRESHOLD_MS: f64 = 5000.0;
/// Response times above this draw the full slow penalty (ms).
const VERY_SLOW_THRESHOLD_MS: f64 = 8000.0;
const SLOW_PENALTY: f64 = 0.1;
const VERY_SLOW_PENALTY: f64 = 0.3;
/// Flat penalty for any payload validation errors on the MCP leg.
const VALIDATION_PENALTY: f64 = 0.2;

/// Combines probe leg results into [`DualHealthResult`]s.
///
/// Holds the active default [`AggregationConfig`]; hot swaps go through
/// [`update_default_config`], which refuses invalid configs and keeps the
/// prior one.
///
/// [`update_default_config`]: Aggregator::update_default_config
pub struct Aggregator {
    default_config: AggregationConfig,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            default_config: AggregationConfig::default(),
        }
    }
}

impl Aggregator {
    /// Create an aggregator with the given default config, falling back to
    /// the built-in default if it does not validate.
    pub fn new(config: AggregationConfig) -> Self {
        let errors = config.validate();
        if errors.is_empty() {
            Self {
                default_config: config,
            }
        } else {
            tracing::warn!(
                errors = %errors.join("; "),
                "Invalid aggregation config supplied, using built-in default"
            );
            Self::default()
        }
    }

    /// The active default config.
    pub fn default_config(&self) -> &AggregationConfig {
        &self.default_config
    }

    /// Install a new default config. Invalid configs are rejected and the
    /// previous default stays active.
    pub fn update_default_config(&mut self, config: AggregationConfig) -> Result<(), ConfigError> {
        let errors = config.validate();
        if !errors.is_empty() {
            tracing::warn!(
                errors = %errors.join("; "),
                "Rejected aggregation config update"
            );
            return Err(ConfigError::InvalidAggregation { errors });
        }
        self.default_config = config;
        Ok(())
    }

    /// Combine per-leg success into a discrete status.
    ///
    /// `None` means the leg never ran (disabled or absent). Both legs
    /// absent is UNKNOWN, not an error. For mixed outcomes the two policy
    /// flags take precedence; only when both are unset does the priority
    /// weight comparison let the more-trusted channel override a failure
    /// in the less-trusted one.
    pub fn determine_overall_status(
        mcp_success: Option<bool>,
        rest_success: Option<bool>,
        config: &AggregationConfig,
    ) -> HealthStatus {
        if mcp_success.is_none() && rest_success.is_none() {
            return HealthStatus::Unknown;
        }

        let mcp_ok = mcp_success.unwrap_or(false);
        let rest_ok = rest_success.unwrap_or(false);
        match (mcp_ok, rest_ok) {
            (true, true) => HealthStatus::Healthy,
            (false, false) => HealthStatus::Unhealthy,
            (mcp_ok, _) => {
                if config.require_both_success_for_healthy || config.degraded_on_single_failure {
                    return HealthStatus::Degraded;
                }
                let winning_weight = if mcp_ok {
                    config.mcp_priority_weight
                } else {
                    config.rest_priority_weight
                };
                let losing_weight = if mcp_ok {
                    config.rest_priority_weight
                } else {
                    config.mcp_priority_weight
                };
                if winning_weight > losing_weight {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                }
            }
        }
    }

    /// Compute the continuous health score in [0.0, 1.0].
    ///
    /// Falls back to the built-in default when the supplied config fails
    /// validation; this path must never panic or error.
    pub fn calculate_health_score(
        mcp_result: Option<&McpCheckResult>,
        rest_result: Option<&RestCheckResult>,
        config: &AggregationConfig,
    ) -> f64 {
        let fallback;
        let config = if config.validate().is_empty() {
            config
        } else {
            tracing::warn!("Aggregation config invalid at scoring time, using built-in default");
            fallback = AggregationConfig::default();
            &fallback
        };

        let mcp_score = mcp_result.map(Self::mcp_score);
        let rest_score = rest_result.map(Self::rest_score);

        let score = match (mcp_score, rest_score) {
            (None, None) => 0.0,
            (Some(score), None) | (None, Some(score)) => score,
            (Some(mcp), Some(rest)) => match config.score_model {
                ScoreModel::WeightedAverage => {
                    config.mcp_priority_weight * mcp + config.rest_priority_weight * rest
                }
                ScoreModel::Minimum => mcp.min(rest),
                ScoreModel::Maximum => mcp.max(rest),
            },
        };

        score.clamp(0.0, 1.0)
    }

    /// MCP sub-score: reachability gates everything, then conformance and
    /// latency chip away at 1.0.
    fn mcp_score(result: &McpCheckResult) -> f64 {
        if !result.reachable() {
            return 0.0;
        }

        let mut score: f64 = 1.0;

        let expected = result.expected_tools_found.len() + result.missing_tools.len();
        if expected > 0 && !result.missing_tools.is_empty() {
            score -= result.missing_tools.len() as f64 / expected as f64;
        }
        if !result.validation_errors.is_empty() {
            score -= VALIDATION_PENALTY;
        }
        score -= slow_penalty(result.response_time_ms);

        score.clamp(0.0, 1.0)
    }

    /// REST sub-score: status code bands, then latency.
    fn rest_score(result: &RestCheckResult) -> f64 {
        let mut score = match result.status_code {
            None => return 0.0,
            Some(code) if (200..300).contains(&code) => 1.0,
            Some(code) if (300..400).contains(&code) => 0.8,
            Some(code) if (400..500).contains(&code) => 0.3,
            Some(code) if code >= 500 => 0.1,
            // 1xx from a health endpoint is as suspect as a client error
            Some(_) => 0.3,
        };
        score -= slow_penalty(result.response_time_ms);
        score.clamp(0.0, 1.0)
    }

    /// Derive per-check statistics from the two legs.
    pub fn create_combined_metrics(
        mcp_result: Option<&McpCheckResult>,
        rest_result: Option<&RestCheckResult>,
        overall_success: bool,
    ) -> CombinedMetrics {
        let mcp_time = mcp_result.map_or(0.0, |r| r.response_time_ms.max(0.0));
        let rest_time = rest_result.map_or(0.0, |r| r.response_time_ms.max(0.0));
        let combined_time = match (mcp_result, rest_result) {
            (Some(_), Some(_)) => mcp_time + rest_time,
            (Some(_), None) => mcp_time,
            (None, Some(_)) => rest_time,
            (None, None) => 0.0,
        };

        let tools_found = mcp_result.map_or(0, |r| r.expected_tools_found.len());
        let tools_expected = mcp_result.map_or(0, |r| {
            r.expected_tools_found.len() + r.missing_tools.len()
        });
        let tool_availability_pct = if tools_expected > 0 {
            tools_found as f64 / tools_expected as f64 * 100.0
        } else {
            0.0
        };

        let mut http_status_codes = HashMap::new();
        if let Some(code) = rest_result.and_then(|r| r.status_code) {
            *http_status_codes.entry(code).or_insert(0) += 1;
        }

        CombinedMetrics {
            mcp_response_time_ms: mcp_time,
            rest_response_time_ms: rest_time,
            combined_response_time_ms: combined_time,
            mcp_success_rate: if mcp_result.is_some_and(|r| r.success) {
                1.0
            } else {
                0.0
            },
            rest_success_rate: if rest_result.is_some_and(|r| r.success) {
                1.0
            } else {
                0.0
            },
            combined_success_rate: if overall_success { 1.0 } else { 0.0 },
            tools_expected,
            tools_found,
            tool_availability_pct,
            http_status_codes,
            health_endpoint_availability: if rest_result.is_some_and(|r| r.success) {
                1.0
            } else {
                0.0
            },
        }
    }

    /// Which probe channels currently succeed.
    pub fn determine_available_paths(
        mcp_success: bool,
        rest_success: bool,
    ) -> BTreeSet<AvailablePath> {
        let mut paths = BTreeSet::new();
        match (mcp_success, rest_success) {
            (true, true) => {
                paths.insert(AvailablePath::Mcp);
                paths.insert(AvailablePath::Rest);
                paths.insert(AvailablePath::Both);
            }
            (true, false) => {
                paths.insert(AvailablePath::Mcp);
            }
            (false, true) => {
                paths.insert(AvailablePath::Rest);
            }
            (false, false) => {
                paths.insert(AvailablePath::None);
            }
        }
        paths
    }

    /// Compose one dual result from the two legs, tolerating any
    /// combination of present/absent/success/fail without failing.
    pub fn aggregate_dual_results(
        &self,
        mcp_result: Option<McpCheckResult>,
        rest_result: Option<RestCheckResult>,
        config: Option<&AggregationConfig>,
    ) -> DualHealthResult {
        let config = config.unwrap_or(&self.default_config);

        let server_name = mcp_result
            .as_ref()
            .map(|r| r.server_name.clone())
            .or_else(|| rest_result.as_ref().map(|r| r.server_name.clone()))
            .unwrap_or_else(|| "unknown".to_string());

        let mcp_success = mcp_result.as_ref().is_some_and(|r| r.success);
        let rest_success = rest_result.as_ref().is_some_and(|r| r.success);
        let overall_success = mcp_success || rest_success;

        let overall_status = Self::determine_overall_status(
            mcp_result.as_ref().map(|r| r.success),
            rest_result.as_ref().map(|r| r.success),
            config,
        );
        let mut health_score =
            Self::calculate_health_score(mcp_result.as_ref(), rest_result.as_ref(), config);
        // Invariant: score is exactly 0.0 when no leg succeeded; band
        // floors only contribute alongside a succeeding leg
        if !overall_success {
            health_score = 0.0;
        }

        let combined_metrics = Self::create_combined_metrics(
            mcp_result.as_ref(),
            rest_result.as_ref(),
            overall_success,
        );

        DualHealthResult {
            server_name,
            timestamp: chrono::Utc::now(),
            overall_status,
            overall_success,
            health_score,
            mcp_success,
            rest_success,
            mcp_response_time_ms: combined_metrics.mcp_response_time_ms,
            rest_response_time_ms: combined_metrics.rest_response_time_ms,
            combined_response_time_ms: combined_metrics.combined_response_time_ms,
            available_paths: Self::determine_available_paths(mcp_success, rest_success),
            mcp_error_message: mcp_result.as_ref().and_then(|r| r.error_message()),
            rest_error_message: rest_result.as_ref().and_then(|r| r.error_message()),
            combined_metrics,
            mcp_result,
            rest_result,
        }
    }

    /// Aggregate a batch of leg pairs, isolating problems per pair: a bad
    /// pair yields a best-effort UNHEALTHY result instead of aborting its
    /// siblings.
    pub fn aggregate_multiple_dual_results(
        &self,
        pairs: Vec<(Option<McpCheckResult>, Option<RestCheckResult>)>,
    ) -> Vec<DualHealthResult> {
        pairs
            .into_iter()
            .map(|(mcp, rest)| {
                let server_name = mcp
                    .as_ref()
                    .map(|r| r.server_name.clone())
                    .or_else(|| rest.as_ref().map(|r| r.server_name.clone()))
                    .unwrap_or_else(|| "unknown".to_string());

                let result = self.aggregate_dual_results(mcp, rest, None);
                if result.health_score.is_finite()
                    && (0.0..=1.0).contains(&result.health_score)
                {
                    result
                } else {
                    tracing::error!(
                        server = %server_name,
                        "Aggregation produced an out-of-range score, substituting unhealthy result"
                    );
                    Self::fallback_unhealthy(&server_name)
                }
            })
            .collect()
    }

    /// Best-effort UNHEALTHY result for a pair that could not be
    /// aggregated normally.
    fn fallback_unhealthy(server_name: &str) -> DualHealthResult {
        DualHealthResult {
            server_name: server_name.to_string(),
            timestamp: chrono::Utc::now(),
            overall_status: HealthStatus::Unhealthy,
            overall_success: false,
            health_score: 0.0,
            mcp_result: None,
            rest_result: None,
            mcp_success: false,
            rest_success: false,
            mcp_response_time_ms: 0.0,
            rest_response_time_ms: 0.0,
            combined_response_time_ms: 0.0,
            available_paths: Self::determine_available_paths(false, false),
            mcp_error_message: Some("aggregation failed".to_string()),
            rest_error_message: Some("aggregation failed".to_string()),
            combined_metrics: CombinedMetrics::default(),
        }
    }

    /// Batch statistics with safe division; an empty batch yields zeros.
    pub fn create_aggregation_summary(results: &[DualHealthResult]) -> AggregationSummary {
        let total = results.len();
        if total == 0 {
            return AggregationSummary::default();
        }

        let count_status = |status: HealthStatus| {
            results
                .iter()
                .filter(|r| r.overall_status == status)
                .count()
        };
        let ratio = |count: usize| count as f64 / total as f64;

        AggregationSummary {
            total,
            healthy: count_status(HealthStatus::Healthy),
            degraded: count_status(HealthStatus::Degraded),
            unhealthy: count_status(HealthStatus::Unhealthy),
            unknown: count_status(HealthStatus::Unknown),
            average_health_score: results.iter().map(|r| r.health_score).sum::<f64>()
                / total as f64,
            average_response_time_ms: results
                .iter()
                .map(|r| r.combined_response_time_ms)
                .sum::<f64>()
                / total as f64,
            mcp_success_rate: ratio(results.iter().filter(|r| r.mcp_success).count()),
            rest_success_rate: ratio(results.iter().filter(|r| r.rest_success).count()),
            combined_success_rate: ratio(results.iter().filter(|r| r.overall_success).count()),
        }
    }

    /// Map a continuous score to the discrete bucket dashboards use.
    pub fn classify_score(&self, score: f64) -> HealthStatus {
        if score <= self.default_config.failure_threshold {
            HealthStatus::Unhealthy
        } else if score < self.default_config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

fn slow_penalty(response_time_ms: f64) -> f64 {
    if response_time_ms > VERY_SLOW_THRESHOLD_MS {
        VERY_SLOW_PENALTY
    } else if response_time_ms > SLOW_THRESHOLD_MS {
        SLOW_PENALTY
    } else {
        0.0
    }
}
