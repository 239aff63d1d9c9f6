//! REST probe client
//!
//! Plain HTTP GET against a server's health endpoint. Any 2xx is a success
//! regardless of body shape; the body is captured opportunistically for
//! scoring when it parses as JSON.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::ServerConfig;
use crate::pool::ClientPool;

use super::types::RestCheckResult;

/// Seam for the REST leg, so the orchestrator can be exercised with fakes.
#[async_trait]
pub trait RestProber: Send + Sync {
    async fn probe(&self, config: &ServerConfig) -> RestCheckResult;
}

/// Production REST probe backed by the shared client pool.
pub struct RestProbe {
    pool: Arc<ClientPool>,
}

impl RestProbe {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RestProber for RestProbe {
    async fn probe(&self, config: &ServerConfig) -> RestCheckResult {
        let url = &config.rest_health_endpoint_url;
        let started = Instant::now();
        let elapsed_ms = |started: Instant| started.elapsed().as_secs_f64() * 1000.0;

        let client = match self.pool.get_rest_client() {
            Ok(client) => client,
            Err(e) => {
                return RestCheckResult::connection_failure(
                    &config.server_name,
                    url,
                    elapsed_ms(started),
                    format!("REST client unavailable: {}", e),
                );
            }
        };

        let mut builder = client
            .get(url)
            .timeout(Duration::from_secs(config.rest_timeout_seconds));
        if let Some(token) = &config.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!(
                        "health endpoint request timeout after {}s",
                        config.rest_timeout_seconds
                    )
                } else {
                    format!("health endpoint request failed: {}", e)
                };
                tracing::warn!(server = %config.server_name, error = %message, "REST probe failed");
                return RestCheckResult::connection_failure(
                    &config.server_name,
                    url,
                    elapsed_ms(started),
                    message,
                );
            }
        };

        let status = response.status();
        // Body transfer problems after a received status are not fatal;
        // the status alone decides success
        let response_body = match response.bytes().await {
            Ok(body) => serde_json::from_slice(&body).ok(),
            Err(_) => None,
        };

        let success = status.is_success();
        let http_error = if success {
            None
        } else {
            Some(format!("HTTP {}", status))
        };
        if let Some(error) = &http_error {
            tracing::warn!(server = %config.server_name, error = %error, "REST probe unhealthy");
        }

        RestCheckResult {
            server_name: config.server_name.clone(),
            timestamp: chrono::Utc::now(),
            success,
            response_time_ms: elapsed_ms(started).max(0.0),
            status_code: Some(status.as_u16()),
            response_body,
            health_endpoint_url: url.clone(),
            http_error,
        }
    }
}
