//! Per-protocol HTTP client pool
//!
//! One long-lived `reqwest::Client` per probe protocol, lazily built on
//! first use. The MCP pool is sized larger than the REST pool since
//! `tools/list` payloads are heavier than health GETs. Creation is guarded
//! by a lock; steady-state use is a cheap client clone with no locking
//! beyond that guard.

use std::sync::Mutex;
use std::time::Duration;

use crate::config::ConfigError;

/// Idle connections kept per host for the MCP client.
pub const MCP_POOL_SIZE: usize = 16;
/// Idle connections kept per host for the REST client.
pub const REST_POOL_SIZE: usize = 8;

#[derive(Default)]
struct PoolInner {
    mcp: Option<reqwest::Client>,
    rest: Option<reqwest::Client>,
    closed: bool,
}

/// Owns the two reusable HTTP clients.
///
/// Acquired at engine startup and released via [`close_all`] on shutdown;
/// after close, `get_*` fails fast and in-flight probes surface that as
/// failed leg results rather than being awaited.
///
/// [`close_all`]: ClientPool::close_all
pub struct ClientPool {
    inner: Mutex<PoolInner>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Get the MCP client, building it on first call.
    pub fn get_mcp_client(&self) -> Result<reqwest::Client, ConfigError> {
        self.get_or_build(Protocol::Mcp)
    }

    /// Get the REST client, building it on first call.
    pub fn get_rest_client(&self) -> Result<reqwest::Client, ConfigError> {
        self.get_or_build(Protocol::Rest)
    }

    fn get_or_build(&self, protocol: Protocol) -> Result<reqwest::Client, ConfigError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(ConfigError::PoolClosed);
        }

        let slot = match protocol {
            Protocol::Mcp => &mut inner.mcp,
            Protocol::Rest => &mut inner.rest,
        };
        if let Some(client) = slot {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(protocol.configured_size())
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        tracing::debug!(protocol = protocol.as_str(), "Built probe HTTP client");
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Close and invalidate both clients. Safe to call multiple times;
    /// subsequent `get_*` calls fail with [`ConfigError::PoolClosed`].
    pub fn close_all(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return;
        }
        inner.mcp = None;
        inner.rest = None;
        inner.closed = true;
        tracing::debug!("Closed probe HTTP client pool");
    }

    /// Whether [`close_all`] has been called.
    ///
    /// [`close_all`]: ClientPool::close_all
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy)]
enum Protocol {
    Mcp,
    Rest,
}

impl Protocol {
    fn configured_size(self) -> usize {
        match self {
            Protocol::Mcp => MCP_POOL_SIZE,
            Protocol::Rest => REST_POOL_SIZE,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Protocol::Mcp => "mcp",
            Protocol::Rest => "rest",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_gets_return_a_live_client() {
        let pool = ClientPool::new();
        assert!(pool.get_mcp_client().is_ok());
        assert!(pool.get_mcp_client().is_ok());
        assert!(pool.get_rest_client().is_ok());
    }

    #[tokio::test]
    async fn close_all_is_idempotent_and_invalidates() {
        let pool = ClientPool::new();
        let _ = pool.get_mcp_client().unwrap();

        pool.close_all();
        pool.close_all();
        assert!(pool.is_closed());

        assert!(matches!(
            pool.get_mcp_client(),
            Err(ConfigError::PoolClosed)
        ));
        assert!(matches!(
            pool.get_rest_client(),
            Err(ConfigError::PoolClosed)
        ));
    }
}
