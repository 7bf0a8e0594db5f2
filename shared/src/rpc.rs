//! JSON-RPC 2.0 wire types used to probe node endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{SharedError, SharedResult};

pub const JSONRPC_VERSION: &str = "2.0";

/// Substrate health-indicative method
pub const SYSTEM_CHAIN: &str = "system_chain";

/// Ethereum-compatible health-indicative method
pub const ETH_CHAIN_ID: &str = "eth_chainId";

/// Methods probed to decide whether an endpoint is a live RPC server
pub fn health_methods(is_ethereum_chain: bool) -> &'static [&'static str] {
    if is_ethereum_chain {
        &[SYSTEM_CHAIN, ETH_CHAIN_ID]
    } else {
        &[SYSTEM_CHAIN]
    }
}

/// Outbound request: `{"jsonrpc":"2.0","id":<int>,"method":<string>,"params":[]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params: Vec::new(),
        }
    }

    pub fn to_text(&self) -> SharedResult<String> {
        serde_json::to_string(self).map_err(|e| SharedError::SerializationError { message: e.to_string() })
    }
}

/// Inbound response or notification
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl JsonRpcResponse {
    pub fn parse(text: &str) -> SharedResult<Self> {
        serde_json::from_str(text).map_err(|e| SharedError::ProtocolError { message: e.to_string() })
    }

    /// A success carries `jsonrpc: "2.0"` and no `error` member
    pub fn is_success(&self) -> bool {
        self.jsonrpc.as_deref() == Some(JSONRPC_VERSION) && self.error.is_none()
    }

    /// Numeric request id this response answers, if any
    pub fn request_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }
}
