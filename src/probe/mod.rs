//! Probe clients for the two health check legs

mod mcp;
mod rest;
mod types;

pub use mcp::{evaluate_tools_response, McpProbe, McpProber};
pub use rest::{RestProbe, RestProber};
pub use types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpCheckResult, RestCheckResult,
    JSONRPC_VERSION,
};
