//! Test fixtures and data for orchestrator tests

use std::time::Duration;

use shared::PoolId;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Port the mocked node serves JSON-RPC on
    pub const RPC_PORT: u16 = 9944;

    /// Fixed substrate ports that must never be picked
    pub const P2P_PORT: u16 = 30333;
    pub const METRICS_PORT: u16 = 9615;

    pub const NODE_NAME: &'static str = "alice";

    /// Upper bound for any single orchestrator call in these tests
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(15);

    /// Ports a freshly started substrate node listens on
    pub fn node_ports() -> Vec<u16> {
        vec![Self::P2P_PORT, Self::METRICS_PORT, Self::RPC_PORT]
    }

    /// A long-lived stand-in for a node binary; extra arguments are ignored
    pub fn sleeping_node() -> (&'static str, Vec<String>) {
        ("sh", vec!["-c".to_string(), "exec sleep 30".to_string()])
    }

    /// A node that dies right after launch
    pub fn crashing_node() -> (&'static str, Vec<String>) {
        ("sh", vec!["-c".to_string(), "echo 'panicked at genesis'; exit 1".to_string()])
    }

    /// Dedicated pool per test so parallel tests don't share ranges
    pub fn pool(id: u32) -> PoolId {
        PoolId::new(id)
    }
}
