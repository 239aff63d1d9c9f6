//! Per-server circuit breaker
//!
//! Tracks CLOSED/OPEN/HALF_OPEN independently for the MCP and REST legs of
//! every observed server, gating whether future probes run. A leg opens
//! after a run of consecutive failures, cools down, then admits a single
//! HALF_OPEN trial.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::DualHealthResult;
use crate::config::CircuitConfig;

/// State of one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Ordering used to derive the overall state from the two legs.
    fn severity(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Which probe legs the breaker currently admits for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Both legs may probe
    Full,
    /// Only the MCP leg may probe
    McpOnly,
    /// Only the REST leg may probe
    RestOnly,
    /// Neither leg may probe; the circuit is open
    Skip,
}

/// Snapshot of a server's circuit state for consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub server_name: String,
    pub overall_state: CircuitState,
    pub mcp_state: CircuitState,
    pub rest_state: CircuitState,
    pub mcp_consecutive_failures: u32,
    pub rest_consecutive_failures: u32,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Leg {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl Leg {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

#[derive(Debug)]
struct ServerCircuits {
    mcp: Leg,
    rest: Leg,
    last_transition: DateTime<Utc>,
}

impl ServerCircuits {
    fn new() -> Self {
        Self {
            mcp: Leg::new(),
            rest: Leg::new(),
            last_transition: Utc::now(),
        }
    }
}

/// Failure-gating state machine over aggregated results.
///
/// Entries are created on the first observed result for a server and kept
/// for as long as the breaker lives.
pub struct CircuitBreaker {
    config: CircuitConfig,
    servers: HashMap<String, ServerCircuits>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            servers: HashMap::new(),
        }
    }

    /// Feed one aggregated result into the breaker. Legs that never ran
    /// (absent results) leave their circuit untouched.
    pub fn evaluate_circuit_state(&mut self, server_name: &str, result: &DualHealthResult) {
        let threshold = self.config.failure_threshold;
        let circuits = self
            .servers
            .entry(server_name.to_string())
            .or_insert_with(ServerCircuits::new);

        let mut transitioned = false;
        if result.mcp_result.is_some() {
            transitioned |= Self::observe_leg(&mut circuits.mcp, result.mcp_success, threshold);
        }
        if result.rest_result.is_some() {
            transitioned |= Self::observe_leg(&mut circuits.rest, result.rest_success, threshold);
        }
        if transitioned {
            circuits.last_transition = Utc::now();
            tracing::info!(
                server = server_name,
                mcp_state = %circuits.mcp.state,
                rest_state = %circuits.rest.state,
                "Circuit transition"
            );
        }
    }

    fn observe_leg(leg: &mut Leg, success: bool, threshold: u32) -> bool {
        let before = leg.state;
        if success {
            leg.consecutive_failures = 0;
            leg.state = CircuitState::Closed;
            leg.opened_at = None;
        } else {
            match leg.state {
                CircuitState::Closed => {
                    leg.consecutive_failures += 1;
                    if leg.consecutive_failures >= threshold {
                        leg.state = CircuitState::Open;
                        leg.opened_at = Some(Utc::now());
                    }
                }
                // A failed trial re-opens and restarts the cool-down
                CircuitState::HalfOpen => {
                    leg.consecutive_failures += 1;
                    leg.state = CircuitState::Open;
                    leg.opened_at = Some(Utc::now());
                }
                CircuitState::Open => {
                    leg.consecutive_failures += 1;
                }
            }
        }
        leg.state != before
    }

    /// Which legs the breaker admits for the next check. Open legs whose
    /// cool-down has elapsed move to HALF_OPEN here and are admitted for
    /// one trial.
    pub fn probe_mode(&mut self, server_name: &str) -> ProbeMode {
        let cooldown = Duration::seconds(self.config.cooldown_seconds as i64);
        let Some(circuits) = self.servers.get_mut(server_name) else {
            // Never-seen servers probe normally
            return ProbeMode::Full;
        };

        let mut transitioned = false;
        transitioned |= Self::admit_trial(&mut circuits.mcp, cooldown);
        transitioned |= Self::admit_trial(&mut circuits.rest, cooldown);
        if transitioned {
            circuits.last_transition = Utc::now();
            tracing::info!(
                server = server_name,
                mcp_state = %circuits.mcp.state,
                rest_state = %circuits.rest.state,
                "Circuit cool-down elapsed, admitting trial"
            );
        }

        let mcp_open = circuits.mcp.state == CircuitState::Open;
        let rest_open = circuits.rest.state == CircuitState::Open;
        if self.config.open_gates_all && (mcp_open || rest_open) {
            return ProbeMode::Skip;
        }
        match (mcp_open, rest_open) {
            (true, true) => ProbeMode::Skip,
            (true, false) => ProbeMode::RestOnly,
            (false, true) => ProbeMode::McpOnly,
            (false, false) => ProbeMode::Full,
        }
    }

    fn admit_trial(leg: &mut Leg, cooldown: Duration) -> bool {
        if leg.state != CircuitState::Open {
            return false;
        }
        let elapsed = leg
            .opened_at
            .map(|opened| Utc::now() - opened >= cooldown)
            .unwrap_or(true);
        if elapsed {
            leg.state = CircuitState::HalfOpen;
            return true;
        }
        false
    }

    /// Snapshot of a server's circuit state; `None` until a first result
    /// has been observed.
    pub fn get_circuit_state(&self, server_name: &str) -> Option<CircuitBreakerState> {
        self.servers.get(server_name).map(|circuits| {
            let overall_state =
                if self.config.open_gates_all
                    && (circuits.mcp.state == CircuitState::Open
                        || circuits.rest.state == CircuitState::Open)
                {
                    CircuitState::Open
                } else if circuits.mcp.state.severity() >= circuits.rest.state.severity() {
                    circuits.mcp.state
                } else {
                    circuits.rest.state
                };
            CircuitBreakerState {
                server_name: server_name.to_string(),
                overall_state,
                mcp_state: circuits.mcp.state,
                rest_state: circuits.rest.state,
                mcp_consecutive_failures: circuits.mcp.consecutive_failures,
                rest_consecutive_failures: circuits.rest.consecutive_failures,
                last_transition: circuits.last_transition,
            }
        })
    }

    /// Snapshot of every tracked server, for status surfaces.
    pub fn all_states(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<CircuitBreakerState> = self
            .servers
            .keys()
            .filter_map(|name| self.get_circuit_state(name))
            .collect();
        states.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::probe::{McpCheckResult, RestCheckResult};

    fn result(server: &str, mcp_ok: bool, rest_ok: bool) -> DualHealthResult {
        let aggregator = Aggregator::default();
        let mcp = if mcp_ok {
            McpCheckResult {
                success: true,
                connection_error: None,
                ..McpCheckResult::connection_failure(server, "req", 1.0, String::new())
            }
        } else {
            McpCheckResult::connection_failure(server, "req", 1.0, "refused".to_string())
        };
        let rest = if rest_ok {
            RestCheckResult {
                success: true,
                status_code: Some(200),
                http_error: None,
                ..RestCheckResult::connection_failure(server, "http://x/health", 1.0, String::new())
            }
        } else {
            RestCheckResult::connection_failure(server, "http://x/health", 1.0, "refused".to_string())
        };
        aggregator.aggregate_dual_results(Some(mcp), Some(rest), None)
    }

    fn breaker(threshold: u32, cooldown_seconds: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig {
            failure_threshold: threshold,
            cooldown_seconds,
            open_gates_all: false,
        })
    }

    #[test]
    fn unseen_server_probes_fully() {
        let mut breaker = breaker(3, 60);
        assert_eq!(breaker.probe_mode("ghost"), ProbeMode::Full);
        assert!(breaker.get_circuit_state("ghost").is_none());
    }

    #[test]
    fn leg_opens_after_consecutive_failures() {
        let mut breaker = breaker(3, 60);
        for _ in 0..2 {
            breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        }
        let state = breaker.get_circuit_state("s1").unwrap();
        assert_eq!(state.mcp_state, CircuitState::Closed);
        assert_eq!(state.mcp_consecutive_failures, 2);

        breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        let state = breaker.get_circuit_state("s1").unwrap();
        assert_eq!(state.mcp_state, CircuitState::Open);
        assert_eq!(state.rest_state, CircuitState::Closed);
        assert_eq!(state.overall_state, CircuitState::Open);
    }

    #[test]
    fn success_resets_the_failure_run() {
        let mut breaker = breaker(3, 60);
        breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        breaker.evaluate_circuit_state("s1", &result("s1", true, true));
        breaker.evaluate_circuit_state("s1", &result("s1", false, true));

        let state = breaker.get_circuit_state("s1").unwrap();
        assert_eq!(state.mcp_state, CircuitState::Closed);
        assert_eq!(state.mcp_consecutive_failures, 1);
    }

    #[test]
    fn open_leg_forces_single_leg_mode() {
        let mut breaker = breaker(1, 3600);
        breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        assert_eq!(breaker.probe_mode("s1"), ProbeMode::RestOnly);

        breaker.evaluate_circuit_state("s2", &result("s2", true, false));
        assert_eq!(breaker.probe_mode("s2"), ProbeMode::McpOnly);

        breaker.evaluate_circuit_state("s3", &result("s3", false, false));
        assert_eq!(breaker.probe_mode("s3"), ProbeMode::Skip);
    }

    #[test]
    fn open_gates_all_policy_skips_on_one_open_leg() {
        let mut breaker = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 1,
            cooldown_seconds: 3600,
            open_gates_all: true,
        });
        breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        assert_eq!(breaker.probe_mode("s1"), ProbeMode::Skip);
        assert_eq!(
            breaker.get_circuit_state("s1").unwrap().overall_state,
            CircuitState::Open
        );
    }

    #[test]
    fn cooldown_admits_half_open_trial() {
        let mut breaker = breaker(1, 0);
        breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        assert_eq!(
            breaker.get_circuit_state("s1").unwrap().mcp_state,
            CircuitState::Open
        );

        // Zero cool-down: the next mode query admits the trial
        assert_eq!(breaker.probe_mode("s1"), ProbeMode::Full);
        assert_eq!(
            breaker.get_circuit_state("s1").unwrap().mcp_state,
            CircuitState::HalfOpen
        );
    }

    #[test]
    fn trial_success_closes_trial_failure_reopens() {
        let mut breaker = breaker(1, 0);

        breaker.evaluate_circuit_state("s1", &result("s1", false, true));
        let _ = breaker.probe_mode("s1");
        breaker.evaluate_circuit_state("s1", &result("s1", true, true));
        assert_eq!(
            breaker.get_circuit_state("s1").unwrap().mcp_state,
            CircuitState::Closed
        );

        breaker.evaluate_circuit_state("s2", &result("s2", false, true));
        let _ = breaker.probe_mode("s2");
        assert_eq!(
            breaker.get_circuit_state("s2").unwrap().mcp_state,
            CircuitState::HalfOpen
        );
        breaker.evaluate_circuit_state("s2", &result("s2", false, true));
        assert_eq!(
            breaker.get_circuit_state("s2").unwrap().mcp_state,
            CircuitState::Open
        );
    }

    #[test]
    fn absent_leg_leaves_its_circuit_untouched() {
        let mut breaker = breaker(1, 60);
        let aggregator = Aggregator::default();
        // Probe-level failure on MCP only; REST never ran
        let partial = aggregator.aggregate_dual_results(
            Some(McpCheckResult::connection_failure(
                "s1",
                "req",
                1.0,
                "refused".to_string(),
            )),
            None,
            None,
        );
        breaker.evaluate_circuit_state("s1", &partial);

        let state = breaker.get_circuit_state("s1").unwrap();
        assert_eq!(state.mcp_state, CircuitState::Open);
        assert_eq!(state.rest_state, CircuitState::Closed);
        assert_eq!(state.rest_consecutive_failures, 0);
    }

    #[test]
    fn states_survive_and_sort_in_snapshots() {
        let mut breaker = breaker(1, 60);
        breaker.evaluate_circuit_state("zeta", &result("zeta", true, true));
        breaker.evaluate_circuit_state("alpha", &result("alpha", true, true));

        let all = breaker.all_states();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].server_name, "alpha");
        assert_eq!(all[1].server_name, "zeta");
    }
}
