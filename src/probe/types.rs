//! Probe result and wire protocol types
//!
//! Probe outcomes are values, never errors: a failed leg is a result struct
//! with its error message attached, so callers always get something to
//! aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version sent on every MCP probe.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request envelope for the `tools/list` probe.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub id: String,
}

impl JsonRpcRequest {
    /// Build a `tools/list` request with a fresh unique id.
    pub fn tools_list() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "tools/list".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Server-supplied JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
}

/// Outcome of one MCP `tools/list` probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpCheckResult {
    pub server_name: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response_time_ms: f64,
    /// Number of advertised tools; only set when the list was parsed
    pub tools_count: Option<usize>,
    /// Expected tool names the server did advertise
    pub expected_tools_found: Vec<String>,
    /// Expected tool names the server failed to advertise
    pub missing_tools: Vec<String>,
    pub validation_errors: Vec<String>,
    /// Transport-level failure (DNS/connect/timeout), when any
    pub connection_error: Option<String>,
    pub request_id: String,
    pub jsonrpc_version: String,
}

impl McpCheckResult {
    /// Transport-level failure; the server never answered usefully.
    pub fn connection_failure(
        server_name: &str,
        request_id: &str,
        response_time_ms: f64,
        error: String,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            timestamp: Utc::now(),
            success: false,
            response_time_ms: response_time_ms.max(0.0),
            tools_count: None,
            expected_tools_found: Vec::new(),
            missing_tools: Vec::new(),
            validation_errors: Vec::new(),
            connection_error: Some(error),
            request_id: request_id.to_string(),
            jsonrpc_version: JSONRPC_VERSION.to_string(),
        }
    }

    /// The server answered but the payload failed validation.
    pub fn validation_failure(
        server_name: &str,
        request_id: &str,
        response_time_ms: f64,
        tools_count: Option<usize>,
        validation_errors: Vec<String>,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            timestamp: Utc::now(),
            success: false,
            response_time_ms: response_time_ms.max(0.0),
            tools_count,
            expected_tools_found: Vec::new(),
            missing_tools: Vec::new(),
            validation_errors,
            connection_error: None,
            request_id: request_id.to_string(),
            jsonrpc_version: JSONRPC_VERSION.to_string(),
        }
    }

    /// Whether the server was reachable at the transport level, even if
    /// the payload was non-conformant.
    pub fn reachable(&self) -> bool {
        self.connection_error.is_none()
    }

    /// Probe error for display: connection error first, then validation.
    pub fn error_message(&self) -> Option<String> {
        if let Some(error) = &self.connection_error {
            return Some(error.clone());
        }
        if !self.validation_errors.is_empty() {
            return Some(self.validation_errors.join("; "));
        }
        if !self.missing_tools.is_empty() {
            return Some(format!(
                "missing expected tools: {}",
                self.missing_tools.join(", ")
            ));
        }
        None
    }
}

/// Outcome of one REST health endpoint probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestCheckResult {
    pub server_name: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response_time_ms: f64,
    pub status_code: Option<u16>,
    /// Opportunistically parsed JSON body; `None` for absent or
    /// unparseable bodies, which is not itself a failure
    pub response_body: Option<Value>,
    pub health_endpoint_url: String,
    pub http_error: Option<String>,
}

impl RestCheckResult {
    /// Transport-level failure; no HTTP status was received.
    pub fn connection_failure(server_name: &str, url: &str, response_time_ms: f64, error: String) -> Self {
        Self {
            server_name: server_name.to_string(),
            timestamp: Utc::now(),
            success: false,
            response_time_ms: response_time_ms.max(0.0),
            status_code: None,
            response_body: None,
            health_endpoint_url: url.to_string(),
            http_error: Some(error),
        }
    }

    /// Probe error for display.
    pub fn error_message(&self) -> Option<String> {
        self.http_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_list_request_has_stable_envelope() {
        let request = JsonRpcRequest::tools_list();
        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method, "tools/list");
        assert!(!request.id.is_empty());

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["jsonrpc"], "2.0");
        assert_eq!(encoded["method"], "tools/list");
        assert!(encoded["id"].is_string());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = JsonRpcRequest::tools_list();
        let b = JsonRpcRequest::tools_list();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn connection_failure_clamps_negative_response_time() {
        let result =
            McpCheckResult::connection_failure("s1", "req-1", -42.0, "connect refused".to_string());
        assert!(!result.success);
        assert_eq!(result.response_time_ms, 0.0);
        assert!(!result.reachable());
        assert_eq!(result.error_message().unwrap(), "connect refused");
    }

    #[test]
    fn validation_failure_is_reachable_but_failed() {
        let result = McpCheckResult::validation_failure(
            "s1",
            "req-2",
            12.5,
            Some(3),
            vec!["tool at index 1 missing 'name'".to_string()],
        );
        assert!(!result.success);
        assert!(result.reachable());
        assert_eq!(result.tools_count, Some(3));
        assert!(result.error_message().unwrap().contains("index 1"));
    }

    #[test]
    fn rest_connection_failure_has_no_status() {
        let result = RestCheckResult::connection_failure(
            "s1",
            "http://localhost:1/health",
            3.0,
            "dns lookup failed".to_string(),
        );
        assert!(!result.success);
        assert_eq!(result.status_code, None);
        assert!(result.response_body.is_none());
    }

    #[test]
    fn error_envelope_parses() {
        let raw = r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32601,"message":"no such method"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().message, "no such method");
    }
}
