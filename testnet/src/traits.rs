//! Trait definitions with mockall annotations for testing
//!
//! These are the seams the orchestration core is composed from. Real
//! implementations live in `services`; tests swap in the generated mocks.

use shared::{FoundationKind, FoundationStatus};
use std::path::PathBuf;

use crate::error::TestnetResult;

/// What a test harness gets back once a foundation is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    /// WebSocket URL of the JSON-RPC endpoint
    pub endpoint: String,
    pub port: u16,
    /// Child process id, `None` for passive connections
    pub pid: Option<u32>,
    pub log_path: Option<PathBuf>,
}

/// Enumerates the TCP ports a process is listening on
#[mockall::automock]
#[async_trait::async_trait]
pub trait PortLister: Send + Sync {
    /// Ports currently in LISTEN state for `pid`, deduplicated
    async fn listening_ports(&self, pid: u32) -> TestnetResult<Vec<u16>>;
}

/// Confirms that an endpoint answers health-indicative JSON-RPC calls
#[mockall::automock]
#[async_trait::async_trait]
pub trait RpcProbe: Send + Sync {
    /// Succeeds once `endpoint` returns a JSON-RPC 2.0 success for `system_chain`
    /// (or `eth_chainId` when `is_ethereum_chain` is set)
    async fn probe(&self, endpoint: &str, is_ethereum_chain: bool) -> TestnetResult<()>;
}

/// Uniform start/stop/status contract implemented by every node topology
#[mockall::automock]
#[async_trait::async_trait]
pub trait Foundation: Send + Sync {
    fn kind(&self) -> FoundationKind;

    /// Bring the topology up and return its RPC endpoint
    async fn start(&self) -> TestnetResult<NodeEndpoint>;

    /// Tear the topology down; a no-op when nothing is running
    async fn stop(&self) -> TestnetResult<()>;

    async fn status(&self) -> FoundationStatus;
}

/// WebSocket URL for a port on the loopback interface
pub fn local_endpoint(port: u16) -> String {
    format!("ws://127.0.0.1:{port}")
}
