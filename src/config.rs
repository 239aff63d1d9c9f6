//! Configuration loading
//!
//! Servers, aggregation policy, engine limits and circuit tunables all live
//! in a single `healthcheck.toml`. The file is discovered by walking up the
//! directory tree, with a global fallback under the user config dir.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tolerance when checking that priority weights sum to 1.0.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Errors surfaced at configuration boundaries.
///
/// Probe and aggregation failures are carried as result values, never as
/// errors; this type only covers config loading/validation and pool
/// lifecycle misuse.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid server '{server_name}': {}", errors.join("; "))]
    InvalidServer {
        server_name: String,
        errors: Vec<String>,
    },
    #[error("invalid aggregation config: {}", errors.join("; "))]
    InvalidAggregation { errors: Vec<String> },
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Find a config file by walking up the directory tree, then checking
/// global config under `~/.config/mcp-pulse/`.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("mcp-pulse").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Identity and reachability of one monitored server.
///
/// Immutable once constructed; the engine never mutates it. Both legs
/// being disabled is a valid configuration and yields status UNKNOWN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server_name: String,

    /// MCP endpoint receiving the JSON-RPC `tools/list` probe
    #[serde(default)]
    pub mcp_endpoint_url: String,
    #[serde(default = "default_true")]
    pub mcp_enabled: bool,
    #[serde(default = "default_mcp_timeout")]
    pub mcp_timeout_seconds: u64,
    /// Tool names the server must advertise; missing ones fail the probe
    #[serde(default)]
    pub mcp_expected_tools: Vec<String>,

    /// REST health endpoint receiving the GET probe
    #[serde(default)]
    pub rest_health_endpoint_url: String,
    #[serde(default = "default_true")]
    pub rest_enabled: bool,
    #[serde(default = "default_rest_timeout")]
    pub rest_timeout_seconds: u64,

    /// Opaque bearer credential supplied externally; absence means the
    /// probes go out unauthenticated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_mcp_timeout() -> u64 {
    10
}

fn default_rest_timeout() -> u64 {
    8
}

impl ServerConfig {
    /// Minimal constructor for a server probed on both channels.
    pub fn new(server_name: &str, mcp_endpoint_url: &str, rest_health_endpoint_url: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            mcp_endpoint_url: mcp_endpoint_url.to_string(),
            mcp_enabled: true,
            mcp_timeout_seconds: default_mcp_timeout(),
            mcp_expected_tools: Vec::new(),
            rest_health_endpoint_url: rest_health_endpoint_url.to_string(),
            rest_enabled: true,
            rest_timeout_seconds: default_rest_timeout(),
            auth_token: None,
        }
    }

    /// Validate at the boundary. Returns human-readable problems; empty
    /// means the config is acceptable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_name.trim().is_empty() {
            errors.push("server_name must not be empty".to_string());
        }
        if self.mcp_enabled {
            if let Err(e) = url::Url::parse(&self.mcp_endpoint_url) {
                errors.push(format!("mcp_endpoint_url is not a valid URL: {}", e));
            }
            if self.mcp_timeout_seconds == 0 {
                errors.push("mcp_timeout_seconds must be > 0".to_string());
            }
        }
        if self.rest_enabled {
            if let Err(e) = url::Url::parse(&self.rest_health_endpoint_url) {
                errors.push(format!("rest_health_endpoint_url is not a valid URL: {}", e));
            }
            if self.rest_timeout_seconds == 0 {
                errors.push("rest_timeout_seconds must be > 0".to_string());
            }
        }

        errors
    }
}

/// How the two per-protocol sub-scores combine into one health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreModel {
    WeightedAverage,
    Minimum,
    Maximum,
}

/// Aggregation policy: priority weights, status rules and score model.
///
/// Loaded once and hot-swappable; consumers must call [`validate`] before
/// installing a new instance and keep the prior one on rejection.
///
/// [`validate`]: AggregationConfig::validate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Trust weight of the MCP channel; must sum with `rest_priority_weight`
    /// to 1.0 within epsilon
    #[serde(default = "default_mcp_weight")]
    pub mcp_priority_weight: f64,
    #[serde(default = "default_rest_weight")]
    pub rest_priority_weight: f64,
    /// When set, a single failing leg can never be HEALTHY
    #[serde(default)]
    pub require_both_success_for_healthy: bool,
    /// When set, a single failing leg is always DEGRADED regardless of weights
    #[serde(default = "default_true")]
    pub degraded_on_single_failure: bool,
    #[serde(default = "default_score_model")]
    pub score_model: ScoreModel,
    /// Scores at or below this are outright failures
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    /// Scores below this (but above failure) are degraded; must be
    /// strictly greater than `failure_threshold`
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: f64,
}

fn default_mcp_weight() -> f64 {
    0.6
}

fn default_rest_weight() -> f64 {
    0.4
}

fn default_score_model() -> ScoreModel {
    ScoreModel::WeightedAverage
}

fn default_failure_threshold() -> f64 {
    0.3
}

fn default_degraded_threshold() -> f64 {
    0.7
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            mcp_priority_weight: default_mcp_weight(),
            rest_priority_weight: default_rest_weight(),
            require_both_success_for_healthy: false,
            degraded_on_single_failure: true,
            score_model: default_score_model(),
            failure_threshold: default_failure_threshold(),
            degraded_threshold: default_degraded_threshold(),
        }
    }
}

impl AggregationConfig {
    /// Validate aggregation rules. Empty vec means the config may be
    /// installed as the active default.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let weight_sum = self.mcp_priority_weight + self.rest_priority_weight;
        if (weight_sum - 1.0).abs() > WEIGHT_EPSILON {
            errors.push(format!(
                "priority weights must sum to 1.0, got {}",
                weight_sum
            ));
        }
        if self.mcp_priority_weight < 0.0 || self.rest_priority_weight < 0.0 {
            errors.push("priority weights must be non-negative".to_string());
        }
        if self.failure_threshold >= self.degraded_threshold {
            errors.push(format!(
                "failure_threshold ({}) must be strictly less than degraded_threshold ({})",
                self.failure_threshold, self.degraded_threshold
            ));
        }

        errors
    }
}

/// Concurrency limits for batched checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many servers are checked in parallel
    #[serde(default = "default_max_servers")]
    pub max_concurrent_servers: usize,
    /// How many leg tasks may run concurrently for one server
    #[serde(default = "default_max_per_server")]
    pub max_concurrent_per_server: usize,
}

fn default_max_servers() -> usize {
    10
}

fn default_max_per_server() -> usize {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_servers: default_max_servers(),
            max_concurrent_per_server: default_max_per_server(),
        }
    }
}

/// Circuit breaker tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive leg failures before that leg's circuit opens
    #[serde(default = "default_circuit_failures")]
    pub failure_threshold: u32,
    /// Cool-down before an OPEN circuit allows a HALF_OPEN trial
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    /// When set, one OPEN leg gates all traffic for the server
    #[serde(default)]
    pub open_gates_all: bool,
}

fn default_circuit_failures() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    60
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_circuit_failures(),
            cooldown_seconds: default_cooldown(),
            open_gates_all: false,
        }
    }
}

/// Top-level `healthcheck.toml` contents.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HealthFileConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub aggregation: Option<AggregationConfig>,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub circuit: Option<CircuitConfig>,
}

impl HealthFileConfig {
    /// Load `healthcheck.toml`.
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd
    /// 2. `~/.config/mcp-pulse/healthcheck.toml` (global fallback)
    pub fn load() -> Result<Option<Self>, ConfigError> {
        if let Some(config_path) = find_config_file("healthcheck.toml") {
            tracing::debug!("Loading health config from: {}", config_path.display());
            return Self::load_from_path(&config_path).map(Some);
        }

        tracing::debug!("No healthcheck.toml found");
        Ok(None)
    }

    /// Load from a specific path, rejecting malformed server entries.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: HealthFileConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        for server in &config.servers {
            let errors = server.validate();
            if !errors.is_empty() {
                return Err(ConfigError::InvalidServer {
                    server_name: server.server_name.clone(),
                    errors,
                });
            }
        }
        if let Some(aggregation) = &config.aggregation {
            let errors = aggregation.validate();
            if !errors.is_empty() {
                return Err(ConfigError::InvalidAggregation { errors });
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_aggregation_config_is_valid() {
        assert!(AggregationConfig::default().validate().is_empty());
    }

    #[test]
    fn bad_weight_sum_is_rejected() {
        let config = AggregationConfig {
            mcp_priority_weight: 0.9,
            rest_priority_weight: 0.6,
            ..AggregationConfig::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("sum to 1.0"));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let config = AggregationConfig {
            failure_threshold: 0.7,
            degraded_threshold: 0.7,
            ..AggregationConfig::default()
        };
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("strictly less")));
    }

    #[test]
    fn server_config_validates_urls() {
        let mut config = ServerConfig::new(
            "api-server",
            "http://localhost:9000/mcp",
            "http://localhost:9000/health",
        );
        assert!(config.validate().is_empty());

        config.mcp_endpoint_url = "not a url".to_string();
        assert_eq!(config.validate().len(), 1);

        // Disabling the broken leg makes it acceptable again
        config.mcp_enabled = false;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn both_legs_disabled_is_a_valid_config() {
        let mut config = ServerConfig::new("dormant", "", "");
        config.mcp_enabled = false;
        config.rest_enabled = false;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[servers]]
server_name = "auth-server"
mcp_endpoint_url = "http://localhost:8100/mcp"
rest_health_endpoint_url = "http://localhost:8100/health"
mcp_expected_tools = ["validate_token", "issue_token"]

[aggregation]
mcp_priority_weight = 0.7
rest_priority_weight = 0.3

[engine]
max_concurrent_servers = 5
"#
        )
        .unwrap();

        let config = HealthFileConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].server_name, "auth-server");
        assert_eq!(config.servers[0].mcp_expected_tools.len(), 2);
        assert!(config.servers[0].mcp_enabled);
        let aggregation = config.aggregation.unwrap();
        assert!((aggregation.mcp_priority_weight - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.engine.unwrap().max_concurrent_servers, 5);
        assert!(config.circuit.is_none());
    }

    #[test]
    fn invalid_server_in_file_is_rejected_with_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[servers]]
server_name = "broken"
mcp_endpoint_url = "::: no"
rest_health_endpoint_url = "http://localhost:1/health"
"#
        )
        .unwrap();

        let err = HealthFileConfig::load_from_path(file.path()).unwrap_err();
        match err {
            ConfigError::InvalidServer { server_name, .. } => assert_eq!(server_name, "broken"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
