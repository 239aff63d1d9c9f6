//! MCP probe client
//!
//! Issues a JSON-RPC 2.0 `tools/list` request against a server's MCP
//! endpoint and validates the advertised tool list against the expected
//! tool names from the server config.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::ServerConfig;
use crate::pool::ClientPool;

use super::types::{JsonRpcRequest, JsonRpcResponse, McpCheckResult, JSONRPC_VERSION};

/// Seam for the MCP leg, so the orchestrator can be exercised with fakes.
#[async_trait]
pub trait McpProber: Send + Sync {
    async fn probe(&self, config: &ServerConfig) -> McpCheckResult;
}

/// Production MCP probe backed by the shared client pool.
pub struct McpProbe {
    pool: Arc<ClientPool>,
}

impl McpProbe {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl McpProber for McpProbe {
    async fn probe(&self, config: &ServerConfig) -> McpCheckResult {
        let request = JsonRpcRequest::tools_list();
        let started = Instant::now();
        let elapsed_ms = |started: Instant| started.elapsed().as_secs_f64() * 1000.0;

        let client = match self.pool.get_mcp_client() {
            Ok(client) => client,
            Err(e) => {
                return McpCheckResult::connection_failure(
                    &config.server_name,
                    &request.id,
                    elapsed_ms(started),
                    format!("MCP client unavailable: {}", e),
                );
            }
        };

        let mut builder = client
            .post(&config.mcp_endpoint_url)
            .json(&request)
            .timeout(Duration::from_secs(config.mcp_timeout_seconds));
        if let Some(token) = &config.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!(
                        "tools/list request timeout after {}s",
                        config.mcp_timeout_seconds
                    )
                } else {
                    format!("tools/list request failed: {}", e)
                };
                tracing::warn!(server = %config.server_name, error = %message, "MCP probe failed");
                return McpCheckResult::connection_failure(
                    &config.server_name,
                    &request.id,
                    elapsed_ms(started),
                    message,
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            return McpCheckResult::connection_failure(
                &config.server_name,
                &request.id,
                elapsed_ms(started),
                format!("HTTP {}", status),
            );
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return McpCheckResult::connection_failure(
                    &config.server_name,
                    &request.id,
                    elapsed_ms(started),
                    format!("failed to read response body: {}", e),
                );
            }
        };

        evaluate_tools_response(
            &config.server_name,
            &request.id,
            elapsed_ms(started),
            &body,
            &config.mcp_expected_tools,
        )
    }
}

/// Validate a `tools/list` response body against the expected tool names.
///
/// Pure over the already-received bytes, so envelope and tool-shape
/// handling is testable without a live server.
pub fn evaluate_tools_response(
    server_name: &str,
    request_id: &str,
    response_time_ms: f64,
    body: &[u8],
    expected_tools: &[String],
) -> McpCheckResult {
    let envelope: JsonRpcResponse = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return McpCheckResult::validation_failure(
                server_name,
                request_id,
                response_time_ms,
                None,
                vec![format!("response body is not valid JSON-RPC: {}", e)],
            );
        }
    };

    if let Some(error) = envelope.error {
        return McpCheckResult::validation_failure(
            server_name,
            request_id,
            response_time_ms,
            None,
            vec![format!("server returned JSON-RPC error: {}", error.message)],
        );
    }

    let result = match envelope.result {
        Some(result) => result,
        None => {
            return McpCheckResult::validation_failure(
                server_name,
                request_id,
                response_time_ms,
                None,
                vec!["JSON-RPC response has neither result nor error".to_string()],
            );
        }
    };

    let tools = match result.get("tools").and_then(|t| t.as_array()) {
        Some(tools) => tools,
        None => {
            return McpCheckResult::validation_failure(
                server_name,
                request_id,
                response_time_ms,
                None,
                vec!["result.tools is missing or not a list".to_string()],
            );
        }
    };

    let mut validation_errors = Vec::new();
    let mut advertised = Vec::new();
    for (index, tool) in tools.iter().enumerate() {
        let name = tool.get("name").and_then(|n| n.as_str());
        let description = tool.get("description").and_then(|d| d.as_str());
        match (name, description) {
            (Some(name), Some(_)) => advertised.push(name.to_string()),
            (None, _) => validation_errors.push(format!("tool at index {} missing 'name'", index)),
            (Some(_), None) => {
                validation_errors.push(format!("tool at index {} missing 'description'", index))
            }
        }
    }

    if !validation_errors.is_empty() {
        return McpCheckResult::validation_failure(
            server_name,
            request_id,
            response_time_ms,
            Some(tools.len()),
            validation_errors,
        );
    }

    let expected_tools_found: Vec<String> = expected_tools
        .iter()
        .filter(|name| advertised.iter().any(|a| a == *name))
        .cloned()
        .collect();
    let missing_tools: Vec<String> = expected_tools
        .iter()
        .filter(|name| !advertised.iter().any(|a| a == *name))
        .cloned()
        .collect();

    // Reachable but non-conformant: missing expected tools fail the probe
    let success = missing_tools.is_empty();
    if !success {
        tracing::warn!(
            server = server_name,
            missing = %missing_tools.join(", "),
            "MCP server reachable but missing expected tools"
        );
    }

    McpCheckResult {
        server_name: server_name.to_string(),
        timestamp: chrono::Utc::now(),
        success,
        response_time_ms: response_time_ms.max(0.0),
        tools_count: Some(tools.len()),
        expected_tools_found,
        missing_tools,
        validation_errors: Vec::new(),
        connection_error: None,
        request_id: request_id.to_string(),
        jsonrpc_version: JSONRPC_VERSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn body(raw: &str) -> Vec<u8> {
        raw.as_bytes().to_vec()
    }

    #[test]
    fn full_tool_list_succeeds() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","result":{"tools":[
            {"name":"ping","description":"ping the host"},
            {"name":"trace","description":"trace a route"}
        ]}}"#;
        let result =
            evaluate_tools_response("s1", "req", 10.0, &body(raw), &expected(&["ping", "trace"]));
        assert!(result.success);
        assert_eq!(result.tools_count, Some(2));
        assert_eq!(result.expected_tools_found.len(), 2);
        assert!(result.missing_tools.is_empty());
        assert!(result.error_message().is_none());
    }

    #[test]
    fn missing_expected_tool_fails_but_is_reachable() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","result":{"tools":[
            {"name":"ping","description":"ping the host"}
        ]}}"#;
        let result =
            evaluate_tools_response("s1", "req", 10.0, &body(raw), &expected(&["ping", "trace"]));
        assert!(!result.success);
        assert!(result.reachable());
        assert_eq!(result.missing_tools, vec!["trace".to_string()]);
        assert!(result.error_message().unwrap().contains("trace"));
    }

    #[test]
    fn tool_without_name_is_a_validation_error_naming_the_index() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","result":{"tools":[
            {"name":"ping","description":"ok"},
            {"description":"anonymous"}
        ]}}"#;
        let result = evaluate_tools_response("s1", "req", 10.0, &body(raw), &[]);
        assert!(!result.success);
        assert_eq!(result.validation_errors.len(), 1);
        assert!(result.validation_errors[0].contains("index 1"));
    }

    #[test]
    fn jsonrpc_error_envelope_fails_with_server_message() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32000,"message":"backend melting"}}"#;
        let result = evaluate_tools_response("s1", "req", 10.0, &body(raw), &[]);
        assert!(!result.success);
        assert!(result.validation_errors[0].contains("backend melting"));
    }

    #[test]
    fn tools_not_a_list_is_rejected() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","result":{"tools":"lots"}}"#;
        let result = evaluate_tools_response("s1", "req", 10.0, &body(raw), &[]);
        assert!(!result.success);
        assert!(result.validation_errors[0].contains("not a list"));
    }

    #[test]
    fn garbage_body_is_rejected_without_panicking() {
        let result = evaluate_tools_response("s1", "req", 10.0, b"<html>502</html>", &[]);
        assert!(!result.success);
        assert!(result.validation_errors[0].contains("not valid JSON-RPC"));
    }

    #[test]
    fn no_expected_tools_means_any_valid_list_passes() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","result":{"tools":[]}}"#;
        let result = evaluate_tools_response("s1", "req", 10.0, &body(raw), &[]);
        assert!(result.success);
        assert_eq!(result.tools_count, Some(0));
    }
}
