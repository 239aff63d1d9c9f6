//! Dual MCP/REST health checking with aggregated scoring

pub mod aggregate;
pub mod circuit;
pub mod config;
pub mod orchestrator;
pub mod pool;
pub mod probe;
