//! Node orchestrator
//!
//! Composition root that turns a [`FoundationConfig`] into a running node:
//! launch the process, find or confirm its RPC port, and hand back an
//! endpoint plus everything needed to tear it down again.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::Instrument;

use shared::{logging, node_debug, node_info, node_warn, FoundationKind, FoundationStatus, LoggerRegistry, PoolId, RetryPolicy};

use crate::config::{endpoint_port, FoundationConfig, NodeLaunchConfig, RpcPortSource};
use crate::error::{TestnetError, TestnetResult};
use crate::services::readiness::DEFAULT_READINESS_ATTEMPTS;
use crate::services::{
    LaunchResult, LsofPortLister, PortAllocator, ProcessCleanup, ProcessManager, ReadinessProbe, RpcPortDiscovery,
    WsRpcProbe,
};
use crate::state::{NodeState, RunningNode};
use crate::traits::{local_endpoint, Foundation, NodeEndpoint, PortLister, RpcProbe};

const ABANDONED_REASON: &str = "orchestration abandoned";
const STARTUP_FAILED_REASON: &str = "startup failed";
const STOP_REASON: &str = "foundation stopped";

/// Brings one foundation up and down
pub struct NodeOrchestrator<L, P> {
    config: FoundationConfig,
    process_manager: ProcessManager,
    allocator: Arc<PortAllocator>,
    discovery: RpcPortDiscovery<L, P>,
    readiness: ReadinessProbe<P>,
    loggers: Arc<LoggerRegistry>,
    pool_id: PoolId,
    state: Mutex<NodeState>,
}

impl NodeOrchestrator<LsofPortLister, WsRpcProbe> {
    /// Orchestrator wired with `lsof` discovery and WebSocket probing
    pub fn local(config: FoundationConfig) -> Self {
        Self::new(config, LsofPortLister::new(), Arc::new(WsRpcProbe::new()))
    }
}

impl<L, P> NodeOrchestrator<L, P>
where
    L: PortLister + 'static,
    P: RpcProbe + 'static,
{
    pub fn new(config: FoundationConfig, lister: L, probe: Arc<P>) -> Self {
        Self {
            config,
            process_manager: ProcessManager::new(),
            allocator: PortAllocator::global(),
            discovery: RpcPortDiscovery::new(lister, probe.clone()),
            readiness: ReadinessProbe::new(probe),
            loggers: Arc::new(LoggerRegistry::new()),
            pool_id: *PoolId::current(),
            state: Mutex::new(NodeState::new()),
        }
    }

    /// Configure process spawning (fluent API)
    pub fn with_process_manager(mut self, process_manager: ProcessManager) -> Self {
        self.process_manager = process_manager;
        self
    }

    /// Use a specific allocator instead of the process-wide one (fluent API)
    pub fn with_allocator(mut self, allocator: Arc<PortAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Configure the pool reserved ports are taken from (fluent API)
    pub fn with_pool_id(mut self, pool_id: PoolId) -> Self {
        self.pool_id = pool_id;
        self
    }

    /// Share a logger registry with other orchestrators (fluent API)
    pub fn with_logger_registry(mut self, loggers: Arc<LoggerRegistry>) -> Self {
        self.loggers = loggers;
        self
    }

    /// Configure the pause between discovery cycles (fluent API)
    pub fn with_discovery_policy(mut self, policy: RetryPolicy) -> Self {
        self.discovery = self.discovery.with_policy(policy);
        self
    }

    /// Configure the backoff between readiness attempts (fluent API)
    pub fn with_readiness_policy(mut self, policy: RetryPolicy) -> Self {
        self.readiness = self.readiness.with_policy(policy);
        self
    }

    pub fn config(&self) -> &FoundationConfig {
        &self.config
    }

    /// Launch details of the running node, if a process was launched
    pub fn launch_result(&self) -> Option<LaunchResult> {
        self.state().running().and_then(|node| node.launch.clone())
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn start_foundation(&self) -> TestnetResult<NodeEndpoint> {
        let name = self.config.name().to_string();
        self.state().begin_start()?;
        let mut start_guard = StartGuard::new(self);

        logging::log_startup(&name, &format!("{} foundation", self.config.kind()));
        let outcome = match &self.config {
            FoundationConfig::Dev(node) | FoundationConfig::Chopsticks(node) => {
                self.launch_node(node, None, &mut start_guard).await
            }
            FoundationConfig::Zombie { launcher, rpc_ports } => {
                if rpc_ports.is_empty() {
                    Err(TestnetError::startup(
                        FoundationKind::Zombie,
                        None,
                        None,
                        TestnetError::config("zombie foundation needs at least one node RPC port"),
                    ))
                } else {
                    self.launch_node(launcher, Some(rpc_ports), &mut start_guard).await
                }
            }
            FoundationConfig::ReadOnly {
                endpoint, is_ethereum, ..
            } => self.connect(endpoint, *is_ethereum).await,
        };
        start_guard.disarm();

        match outcome {
            Ok(node) => {
                let endpoint = node.endpoint.clone();
                self.state().mark_running(node);
                logging::log_success(&name, &format!("{} ready at {}", self.config.kind(), endpoint.endpoint));
                Ok(endpoint)
            }
            Err(e) => {
                self.state().mark_failed(&e);
                logging::log_error(&name, "startup", &e);
                Err(e)
            }
        }
    }

    /// Launch a node process and wait until its RPC endpoint answers
    async fn launch_node(
        &self,
        node: &NodeLaunchConfig,
        readiness_ports: Option<&[u16]>,
        start_guard: &mut StartGuard<'_>,
    ) -> TestnetResult<RunningNode> {
        let kind = self.config.kind();
        let mut args = node.args.clone();
        let mut reserved_ports = Vec::new();

        let fixed_port = match node.rpc_port {
            RpcPortSource::Discover => None,
            RpcPortSource::Fixed(port) => Some(port),
            RpcPortSource::Reserve => {
                let port = self
                    .allocator
                    .allocate(self.pool_id)
                    .await
                    .map_err(|e| TestnetError::startup(kind, None, None, e))?;
                start_guard.track_ports(&[port]);
                reserved_ports.push(port);
                args.push(format!("--rpc-port={port}"));
                Some(port)
            }
        };

        let readiness_ports: Vec<u16> = match readiness_ports {
            Some(ports) => ports.to_vec(),
            None => fixed_port.into_iter().collect(),
        };
        let reported_port = readiness_ports.first().copied();

        let (launch, cleanup) = match self
            .process_manager
            .launch(&node.command, &args, &node.name, node.log_dir.as_deref())
            .await
        {
            Ok(launched) => launched,
            Err(e) => {
                self.allocator.release_many(&reserved_ports).await;
                start_guard.untrack_ports();
                return Err(TestnetError::startup(kind, reported_port, None, e));
            }
        };
        let pid = launch.process.pid;
        start_guard.track_process(cleanup.clone());

        let rpc_ready = self.wait_for_rpc(pid, node, &readiness_ports);
        let outcome = tokio::select! {
            result = rpc_ready => result,
            summary = launch.process.wait_for_exit() => Err(TestnetError::operation(
                Some(pid),
                "startup",
                format!("process exited before its RPC endpoint was ready: {}", summary.trailer()),
            )),
        };

        match outcome {
            Ok(port) => {
                start_guard.untrack_process();
                start_guard.untrack_ports();
                let launch = launch.with_discovered_port(port);
                node_debug!(node.name, "🔌 RPC port {} confirmed for pid {}", port, pid);
                Ok(RunningNode {
                    endpoint: NodeEndpoint {
                        endpoint: local_endpoint(port),
                        port,
                        pid: Some(pid),
                        log_path: Some(launch.log_path.clone()),
                    },
                    launch: Some(launch),
                    cleanup: Some(cleanup),
                    reserved_ports,
                })
            }
            Err(e) => {
                start_guard.untrack_process();
                if let Err(cleanup_error) = cleanup.run(STARTUP_FAILED_REASON).await {
                    node_warn!(node.name, "⚠️ Cleanup after failed start: {}", cleanup_error);
                }
                self.allocator.release_many(&reserved_ports).await;
                start_guard.untrack_ports();
                Err(TestnetError::startup(kind, reported_port, Some(pid), e))
            }
        }
    }

    /// Confirm the given ports in order, or discover one when none are known
    async fn wait_for_rpc(&self, pid: u32, node: &NodeLaunchConfig, ports: &[u16]) -> TestnetResult<u16> {
        let Some(&first) = ports.first() else {
            return self
                .discovery
                .discover_rpc_port(pid, node.is_ethereum, node.discovery_attempts)
                .await;
        };

        for &port in ports {
            self.readiness
                .check_ready(port, node.is_ethereum, node.readiness_attempts)
                .await?;
        }
        Ok(first)
    }

    /// Passive connection: only check that the endpoint answers
    async fn connect(&self, endpoint: &str, is_ethereum: bool) -> TestnetResult<RunningNode> {
        let kind = self.config.kind();
        let port = endpoint_port(endpoint).unwrap_or_default();

        self.readiness
            .check_endpoint(endpoint, port, is_ethereum, DEFAULT_READINESS_ATTEMPTS)
            .await
            .map_err(|e| TestnetError::startup(kind, Some(port), None, e))?;

        Ok(RunningNode::passive(NodeEndpoint {
            endpoint: endpoint.to_string(),
            port,
            pid: None,
            log_path: None,
        }))
    }

    async fn stop_foundation(&self) -> TestnetResult<()> {
        let name = self.config.name().to_string();
        let Some(node) = self.state().take_running() else {
            node_debug!(name, "Nothing to stop");
            return Ok(());
        };

        logging::log_shutdown(&name, STOP_REASON);
        let mut outcome = Ok(());
        if let Some(cleanup) = &node.cleanup {
            if let Err(e) = cleanup.run(STOP_REASON).await {
                outcome = Err(TestnetError::shutdown(self.config.kind(), node.endpoint.pid, e));
            }
        }
        self.allocator.release_many(&node.reserved_ports).await;

        match &outcome {
            Ok(()) => node_info!(name, "✅ {} foundation stopped", self.config.kind()),
            Err(e) => logging::log_error(&name, "shutdown", e),
        }
        outcome
    }
}

#[async_trait]
impl<L, P> Foundation for NodeOrchestrator<L, P>
where
    L: PortLister + 'static,
    P: RpcProbe + 'static,
{
    fn kind(&self) -> FoundationKind {
        self.config.kind()
    }

    async fn start(&self) -> TestnetResult<NodeEndpoint> {
        let logger = self.loggers.get_or_create(self.config.name());
        self.start_foundation().instrument(logger.span()).await
    }

    async fn stop(&self) -> TestnetResult<()> {
        let logger = self.loggers.get_or_create(self.config.name());
        self.stop_foundation().instrument(logger.span()).await
    }

    async fn status(&self) -> FoundationStatus {
        self.state().status()
    }
}

/// Undoes a start that is dropped before it completes: signals the child,
/// hands reserved ports back and records the failure
struct StartGuard<'a> {
    state: &'a Mutex<NodeState>,
    allocator: Arc<PortAllocator>,
    cleanup: Option<ProcessCleanup>,
    ports: Vec<u16>,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    fn new<L, P>(orchestrator: &'a NodeOrchestrator<L, P>) -> Self {
        Self {
            state: &orchestrator.state,
            allocator: orchestrator.allocator.clone(),
            cleanup: None,
            ports: Vec::new(),
            armed: true,
        }
    }

    fn track_process(&mut self, cleanup: ProcessCleanup) {
        self.cleanup = Some(cleanup);
    }

    fn untrack_process(&mut self) {
        self.cleanup = None;
    }

    fn track_ports(&mut self, ports: &[u16]) {
        self.ports.extend_from_slice(ports);
    }

    fn untrack_ports(&mut self) {
        self.ports.clear();
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort(ABANDONED_REASON);
        }

        let ports = std::mem::take(&mut self.ports);
        if !ports.is_empty() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let allocator = self.allocator.clone();
                runtime.spawn(async move { allocator.release_many(&ports).await });
            }
        }

        match self.state.lock() {
            Ok(mut state) => state.mark_failed(ABANDONED_REASON),
            Err(poisoned) => poisoned.into_inner().mark_failed(ABANDONED_REASON),
        }
    }
}
