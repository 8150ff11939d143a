//! JSON-RPC access to a chain node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};

/// The node calls the fork layer relies on.
pub trait ChainRpc {
    fn chain_id(&self) -> Result<u64>;

    /// Take a revertible snapshot; returns its opaque id.
    fn snapshot(&self) -> Result<String>;

    /// Revert to `snapshot_id`. The node invalidates that id and every later one.
    fn revert(&self, snapshot_id: &str) -> Result<()>;

    fn get_code(&self, address: &str) -> Result<String>;

    /// Balance in wei.
    fn get_balance(&self, address: &str) -> Result<u128>;
}

/// Opens [`ChainRpc`] clients for URLs.
pub trait RpcConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn ChainRpc>>;
}

#[derive(Debug, Clone)]
pub struct HttpRpcConnector {
    timeout: Duration,
}

impl HttpRpcConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RpcConnector for HttpRpcConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn ChainRpc>> {
        Ok(Box::new(HttpChainRpc::new(url, self.timeout)?))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Blocking HTTP JSON-RPC client.
#[derive(Debug)]
pub struct HttpChainRpc {
    client: reqwest::blocking::Client,
    url: url::Url,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpChainRpc {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = url::Url::parse(url).with_context(|| format!("Invalid RPC URL: {url}"))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(%method, id, "rpc call");

        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .map_err(|err| self.transport_error(method, err))?;
        let response: RpcResponse = response
            .json()
            .map_err(|err| self.transport_error(method, err))?;

        if let Some(error) = response.error {
            return Err(anyhow::anyhow!(
                "RPC {} failed ({}): {}",
                method,
                error.code,
                error.message
            )
            .into());
        }
        response
            .result
            .ok_or_else(|| anyhow::anyhow!("RPC {method} returned no result").into())
    }

    fn transport_error(&self, method: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                operation: format!("RPC {method}"),
                seconds: self.timeout.as_secs(),
            }
        } else {
            anyhow::Error::new(err)
                .context(format!("RPC {} to {} failed", method, self.url))
                .into()
        }
    }

    fn call_str(&self, method: &str, params: Value) -> Result<String> {
        match self.call(method, params)? {
            Value::String(value) => Ok(value),
            other => Err(anyhow::anyhow!("RPC {method} returned {other}, expected a string").into()),
        }
    }
}

impl ChainRpc for HttpChainRpc {
    fn chain_id(&self) -> Result<u64> {
        let raw = self.call_str("eth_chainId", json!([]))?;
        parse_chain_id(&raw)
    }

    fn snapshot(&self) -> Result<String> {
        self.call_str("evm_snapshot", json!([]))
    }

    fn revert(&self, snapshot_id: &str) -> Result<()> {
        match self.call("evm_revert", json!([snapshot_id]))? {
            Value::Bool(true) => Ok(()),
            _ => Err(anyhow::anyhow!("Node rejected revert to snapshot {snapshot_id}").into()),
        }
    }

    fn get_code(&self, address: &str) -> Result<String> {
        self.call_str("eth_getCode", json!([address, "latest"]))
    }

    fn get_balance(&self, address: &str) -> Result<u128> {
        let raw = self.call_str("eth_getBalance", json!([address, "latest"]))?;
        parse_quantity(&raw)
    }
}

/// Parse a hex `QUANTITY` such as `0x1a`.
pub fn parse_quantity(raw: &str) -> Result<u128> {
    let body = raw
        .strip_prefix("0x")
        .ok_or_else(|| anyhow::anyhow!("Expected hex quantity, got '{raw}'"))?;
    if body.is_empty() {
        return Ok(0);
    }
    Ok(u128::from_str_radix(body, 16)
        .with_context(|| format!("Invalid hex quantity '{raw}'"))?)
}

/// Parse an `eth_chainId` result; ids beyond `u64` are rejected, not truncated.
pub fn parse_chain_id(raw: &str) -> Result<u64> {
    let id = parse_quantity(raw)?;
    Ok(u64::try_from(id).map_err(|_| anyhow::anyhow!("Chain id {raw} does not fit in 64 bits"))?)
}

/// Whether `eth_getCode` output means there is a contract.
pub fn has_code(code: &str) -> bool {
    !matches!(code.trim(), "" | "0x" | "0x0")
}
