//! Dual health check engine
//!
//! Runs the MCP and REST probes for a server concurrently, aggregates the
//! pair, and layers on batching, retry with backoff, cancellation and the
//! per-server circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::{Aggregator, DualHealthResult};
use crate::circuit::{CircuitBreaker, CircuitBreakerState, ProbeMode};
use crate::config::{AggregationConfig, CircuitConfig, EngineConfig, ServerConfig};
use crate::pool::ClientPool;
use crate::probe::{McpCheckResult, McpProbe, McpProber, RestCheckResult, RestProbe, RestProber};

struct ActiveCheck {
    server_name: String,
    token: CancellationToken,
}

/// Concurrency-bounded orchestrator over the two probe legs.
///
/// Checks run as spawned tasks gated by two semaphore levels: a global
/// cap across servers and a per-server cap, so one slow fleet member
/// cannot monopolize the batch.
pub struct HealthCheckEngine {
    pool: Arc<ClientPool>,
    mcp_prober: Arc<dyn McpProber>,
    rest_prober: Arc<dyn RestProber>,
    aggregator: Aggregator,
    circuit: Mutex<CircuitBreaker>,
    server_permits: Arc<Semaphore>,
    per_server_limit: usize,
    per_server_permits: Mutex<HashMap<String, Arc<Semaphore>>>,
    active_checks: Mutex<HashMap<String, ActiveCheck>>,
}

impl HealthCheckEngine {
    pub fn new(
        engine_config: EngineConfig,
        aggregation: AggregationConfig,
        circuit_config: CircuitConfig,
    ) -> Self {
        let pool = Arc::new(ClientPool::new());
        let mcp_prober: Arc<dyn McpProber> = Arc::new(McpProbe::new(Arc::clone(&pool)));
        let rest_prober: Arc<dyn RestProber> = Arc::new(RestProbe::new(Arc::clone(&pool)));
        Self::with_probers(engine_config, aggregation, circuit_config, pool, mcp_prober, rest_prober)
    }

    /// Constructor with injected probe implementations.
    pub fn with_probers(
        engine_config: EngineConfig,
        aggregation: AggregationConfig,
        circuit_config: CircuitConfig,
        pool: Arc<ClientPool>,
        mcp_prober: Arc<dyn McpProber>,
        rest_prober: Arc<dyn RestProber>,
    ) -> Self {
        Self {
            pool,
            mcp_prober,
            rest_prober,
            aggregator: Aggregator::new(aggregation),
            circuit: Mutex::new(CircuitBreaker::new(circuit_config)),
            server_permits: Arc::new(Semaphore::new(engine_config.max_concurrent_servers.max(1))),
            per_server_limit: engine_config.max_concurrent_per_server.max(1),
            per_server_permits: Mutex::new(HashMap::new()),
            active_checks: Mutex::new(HashMap::new()),
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Run both enabled probe legs concurrently and aggregate the pair.
    ///
    /// The whole check shares one deadline: `timeout_override` when given,
    /// otherwise the longer of the two per-leg timeouts. A leg that blows
    /// the deadline comes back as a failed result whose message names the
    /// timeout; disabled legs are simply absent.
    pub async fn perform_dual_health_check(
        &self,
        config: &ServerConfig,
        timeout_override: Option<Duration>,
    ) -> DualHealthResult {
        let deadline = timeout_override.unwrap_or_else(|| {
            Duration::from_secs(config.mcp_timeout_seconds.max(config.rest_timeout_seconds))
        });
        let check_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        {
            let mut active = self.active_checks.lock().await;
            active.insert(
                check_id.clone(),
                ActiveCheck {
                    server_name: config.server_name.clone(),
                    token: token.clone(),
                },
            );
        }

        let mcp_handle = config.mcp_enabled.then(|| {
            let prober = Arc::clone(&self.mcp_prober);
            let config = config.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                tokio::select! {
                    _ = token.cancelled() => McpCheckResult::connection_failure(
                        &config.server_name,
                        "",
                        elapsed_ms(started),
                        "check cancelled".to_string(),
                    ),
                    probed = tokio::time::timeout(deadline, prober.probe(&config)) => match probed {
                        Ok(result) => result,
                        Err(_) => McpCheckResult::connection_failure(
                            &config.server_name,
                            "",
                            elapsed_ms(started),
                            format!("dual check timeout after {}s", deadline.as_secs_f64()),
                        ),
                    },
                }
            })
        });
        let rest_handle = config.rest_enabled.then(|| {
            let prober = Arc::clone(&self.rest_prober);
            let config = config.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                tokio::select! {
                    _ = token.cancelled() => RestCheckResult::connection_failure(
                        &config.server_name,
                        &config.rest_health_endpoint_url,
                        elapsed_ms(started),
                        "check cancelled".to_string(),
                    ),
                    probed = tokio::time::timeout(deadline, prober.probe(&config)) => match probed {
                        Ok(result) => result,
                        Err(_) => RestCheckResult::connection_failure(
                            &config.server_name,
                            &config.rest_health_endpoint_url,
                            elapsed_ms(started),
                            format!("dual check timeout after {}s", deadline.as_secs_f64()),
                        ),
                    },
                }
            })
        });

        let mcp_result = match mcp_handle {
            Some(handle) => Some(handle.await.unwrap_or_else(|join_error| {
                McpCheckResult::connection_failure(
                    &config.server_name,
                    "",
                    0.0,
                    format!("probe task failed: {}", join_error),
                )
            })),
            None => None,
        };
        let rest_result = match rest_handle {
            Some(handle) => Some(handle.await.unwrap_or_else(|join_error| {
                RestCheckResult::connection_failure(
                    &config.server_name,
                    &config.rest_health_endpoint_url,
                    0.0,
                    format!("probe task failed: {}", join_error),
                )
            })),
            None => None,
        };

        {
            let mut active = self.active_checks.lock().await;
            active.remove(&check_id);
        }

        self.aggregator.aggregate_dual_results(mcp_result, rest_result, None)
    }

    /// Check a fleet of servers under the two-level concurrency caps,
    /// returning results in input order. Empty input yields empty output.
    pub async fn check_multiple_servers_dual(
        self: &Arc<Self>,
        configs: &[ServerConfig],
        timeout_override: Option<Duration>,
    ) -> Vec<DualHealthResult> {
        let mut handles = Vec::with_capacity(configs.len());
        for config in configs {
            let engine = Arc::clone(self);
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                let _server_permit = engine.server_permits.clone().acquire_owned().await.ok();
                let slots = engine.per_server_semaphore(&config.server_name).await;
                let _slot_permit = slots.acquire_owned().await.ok();
                engine.perform_dual_health_check(&config, timeout_override).await
            }));
        }

        let settled = futures_util::future::join_all(handles).await;
        let mut results = Vec::with_capacity(settled.len());
        for (outcome, config) in settled.into_iter().zip(configs) {
            match outcome {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    let message = format!("check task failed: {}", join_error);
                    tracing::error!(server = %config.server_name, error = %message, "Check task lost");
                    results.push(self.synthesize_failure(config, &message));
                }
            }
        }
        results
    }

    /// Circuit-gated check. Open legs are not probed: a fully open (or
    /// policy-gated) circuit short-circuits to a synthesized failure with
    /// no network traffic, a half-open circuit admits one trial, and the
    /// outcome of every real probe feeds the breaker.
    pub async fn perform_health_check_with_circuit_breaker(
        &self,
        config: &ServerConfig,
        timeout_override: Option<Duration>,
    ) -> DualHealthResult {
        let mode = {
            let mut circuit = self.circuit.lock().await;
            circuit.probe_mode(&config.server_name)
        };

        let mut gated = config.clone();
        match mode {
            ProbeMode::Full => {}
            ProbeMode::McpOnly => gated.rest_enabled = false,
            ProbeMode::RestOnly => gated.mcp_enabled = false,
            ProbeMode::Skip => {
                tracing::debug!(server = %config.server_name, "Circuit open, skipping probes");
                return self.synthesize_failure(config, "circuit is open");
            }
        }

        let result = self.perform_dual_health_check(&gated, timeout_override).await;
        {
            let mut circuit = self.circuit.lock().await;
            circuit.evaluate_circuit_state(&config.server_name, &result);
        }
        result
    }

    /// Re-run a failed check with exponential backoff: the delay before
    /// retry N is `initial_backoff * backoff_factor^N`. Returns the first
    /// successful result, or the last attempt after `max_retries` retries.
    pub async fn health_check_with_retry_backoff(
        &self,
        config: &ServerConfig,
        max_retries: u32,
        initial_backoff: Duration,
        backoff_factor: f64,
    ) -> DualHealthResult {
        // Factors below 1.0 would shrink the delay each attempt
        let factor = backoff_factor.max(1.0);
        let mut attempt = 0u32;
        loop {
            let result = self.perform_dual_health_check(config, None).await;
            if result.overall_success || attempt >= max_retries {
                return result;
            }
            let backoff = initial_backoff.mul_f64(factor.powi(attempt.min(16) as i32));
            tracing::debug!(
                server = %config.server_name,
                attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64,
                "Check failed, retrying after backoff"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    pub async fn get_circuit_state(&self, server_name: &str) -> Option<CircuitBreakerState> {
        self.circuit.lock().await.get_circuit_state(server_name)
    }

    pub async fn circuit_states(&self) -> Vec<CircuitBreakerState> {
        self.circuit.lock().await.all_states()
    }

    /// Cancel every in-flight check. Their tasks settle as failed results
    /// and the registry drains.
    pub async fn cancel_all_checks(&self) {
        let cancelled: Vec<ActiveCheck> = {
            let mut active = self.active_checks.lock().await;
            active.drain().map(|(_, check)| check).collect()
        };
        for check in &cancelled {
            check.token.cancel();
        }
        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "Cancelled in-flight checks");
        }
    }

    /// Cancel in-flight checks for one server only. Also drops the
    /// server's concurrency slots; in-flight tasks keep their own handle
    /// and the entry is rebuilt on the next batch that names the server.
    pub async fn cancel_server_checks(&self, server_name: &str) {
        let cancelled: Vec<ActiveCheck> = {
            let mut active = self.active_checks.lock().await;
            let ids: Vec<String> = active
                .iter()
                .filter(|(_, check)| check.server_name == server_name)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| active.remove(&id)).collect()
        };
        self.per_server_permits.lock().await.remove(server_name);
        for check in &cancelled {
            check.token.cancel();
        }
        if !cancelled.is_empty() {
            tracing::info!(server = server_name, count = cancelled.len(), "Cancelled server checks");
        }
    }

    pub async fn active_check_count(&self) -> usize {
        self.active_checks.lock().await.len()
    }

    /// Cancel everything and close the client pool. Later probes through
    /// this engine fail fast without network traffic.
    pub async fn shutdown(&self) {
        self.cancel_all_checks().await;
        self.per_server_permits.lock().await.clear();
        self.pool.close_all();
        tracing::info!("Engine shut down");
    }

    async fn per_server_semaphore(&self, server_name: &str) -> Arc<Semaphore> {
        let mut permits = self.per_server_permits.lock().await;
        permits
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_server_limit)))
            .clone()
    }

    /// Failed result pair for a check that never probed, one synthesized
    /// leg per enabled channel.
    fn synthesize_failure(&self, config: &ServerConfig, message: &str) -> DualHealthResult {
        let mcp = config.mcp_enabled.then(|| {
            McpCheckResult::connection_failure(&config.server_name, "", 0.0, message.to_string())
        });
        let rest = config.rest_enabled.then(|| {
            RestCheckResult::connection_failure(
                &config.server_name,
                &config.rest_health_endpoint_url,
                0.0,
                message.to_string(),
            )
        });
        self.aggregator.aggregate_dual_results(mcp, rest, None)
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
