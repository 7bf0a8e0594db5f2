//! Test helpers and builder patterns for orchestrator tests
//!
//! The builder wires a real `NodeOrchestrator` (real processes, real port
//! allocator) to mocked port listing and RPC probing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use shared::{PoolId, RetryPolicy};
use testnet::services::file_lock::is_pid_alive;
use testnet::services::{PortAllocator, ProcessManager};
use testnet::traits::{MockPortLister, MockRpcProbe};
use testnet::{FoundationConfig, NodeLaunchConfig, NodeOrchestrator, TestnetError};

use super::fixtures::TestFixtures;

pub type MockOrchestrator = NodeOrchestrator<MockPortLister, MockRpcProbe>;

/// Orchestrator under test plus the resources it must outlive
pub struct TestNetwork {
    pub orchestrator: MockOrchestrator,
    pub allocator: Arc<PortAllocator>,
    pub log_dir: TempDir,
}

/// Builder pattern for creating test orchestrators with sensible defaults
pub struct OrchestratorBuilder {
    config: Option<FoundationConfig>,
    lister: MockPortLister,
    probe: MockRpcProbe,
    pool_id: PoolId,
    log_dir: TempDir,
}

impl OrchestratorBuilder {
    /// Dev node running `sleep`, listing the usual substrate ports, RPC answering on 9944
    pub fn new() -> Self {
        Self {
            config: None,
            lister: TestHelpers::lister_returning(TestFixtures::node_ports()),
            probe: TestHelpers::probe_accepting(vec![TestFixtures::RPC_PORT]),
            pool_id: TestFixtures::pool(130),
            log_dir: TempDir::new().expect("temp log dir"),
        }
    }

    pub fn log_dir(&self) -> &Path {
        self.log_dir.path()
    }

    /// Launch config writing logs into this builder's temp dir
    pub fn node(&self, command: &str, args: Vec<String>) -> NodeLaunchConfig {
        TestHelpers::launch_config(command, args, self.log_dir())
    }

    pub fn with_foundation(mut self, config: FoundationConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_listed_ports(mut self, ports: Vec<u16>) -> Self {
        self.lister = TestHelpers::lister_returning(ports);
        self
    }

    pub fn with_probe(mut self, probe: MockRpcProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_pool(mut self, pool_id: PoolId) -> Self {
        self.pool_id = pool_id;
        self
    }

    pub fn build(self) -> TestNetwork {
        let config = match self.config {
            Some(config) => config,
            None => {
                let (command, args) = TestFixtures::sleeping_node();
                FoundationConfig::Dev(TestHelpers::launch_config(command, args, self.log_dir.path()))
            }
        };

        let allocator = Arc::new(PortAllocator::new());
        let orchestrator = NodeOrchestrator::new(config, self.lister, Arc::new(self.probe))
            .with_process_manager(
                ProcessManager::new()
                    .with_log_dir(self.log_dir.path())
                    .with_grace_period(Duration::from_millis(500)),
            )
            .with_allocator(allocator.clone())
            .with_pool_id(self.pool_id)
            .with_discovery_policy(RetryPolicy::fixed(50, Duration::from_millis(20)))
            .with_readiness_policy(RetryPolicy::fixed(5, Duration::from_millis(20)));

        TestNetwork {
            orchestrator,
            allocator,
            log_dir: self.log_dir,
        }
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper functions for common test operations
pub struct TestHelpers;

impl TestHelpers {
    pub fn launch_config(command: &str, args: Vec<String>, log_dir: &Path) -> NodeLaunchConfig {
        NodeLaunchConfig::new(TestFixtures::NODE_NAME, command)
            .args(args)
            .log_dir(log_dir)
            .discovery_attempts(50)
            .readiness_attempts(3)
    }

    pub fn lister_returning(ports: Vec<u16>) -> MockPortLister {
        let mut lister = MockPortLister::new();
        lister.expect_listening_ports().returning(move |_| Ok(ports.clone()));
        lister
    }

    /// Probe that succeeds only for endpoints on `ports`
    pub fn probe_accepting(ports: Vec<u16>) -> MockRpcProbe {
        let mut probe = MockRpcProbe::new();
        probe.expect_probe().returning(move |endpoint, _| {
            let accepted = ports.iter().any(|port| endpoint.ends_with(&format!(":{port}")));
            if accepted {
                Ok(())
            } else {
                Err(TestnetError::probe(format!("{endpoint} refused")))
            }
        });
        probe
    }

    /// Probe that succeeds for every endpoint
    pub fn probe_accepting_all() -> MockRpcProbe {
        let mut probe = MockRpcProbe::new();
        probe.expect_probe().returning(|_, _| Ok(()));
        probe
    }

    pub fn probe_rejecting_all() -> MockRpcProbe {
        let mut probe = MockRpcProbe::new();
        probe
            .expect_probe()
            .returning(|endpoint, _| Err(TestnetError::probe(format!("{endpoint} refused"))));
        probe
    }

    /// Poll until `pid` is gone; false if it is still alive after a few seconds
    pub async fn wait_until_dead(pid: u32) -> bool {
        for _ in 0..100 {
            if !is_pid_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    pub fn log_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default()
    }

    /// Pid encoded at the end of a `<bin>_node_<port>_<pid>.log` name
    pub fn pid_from_log_name(path: &Path) -> Option<u32> {
        path.file_stem()?.to_str()?.rsplit('_').next()?.parse().ok()
    }
}
