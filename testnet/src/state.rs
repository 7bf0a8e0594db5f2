//! Foundation lifecycle state
//!
//! Pure bookkeeping of what a foundation is doing and what it owns while
//! running, testable without spawning anything.

use shared::FoundationStatus;

use crate::error::{TestnetError, TestnetResult};
use crate::services::{LaunchResult, ProcessCleanup, ProcessHandle};
use crate::traits::NodeEndpoint;

/// Everything a running foundation must give back when it stops
#[derive(Clone)]
pub struct RunningNode {
    pub endpoint: NodeEndpoint,
    /// `None` for passive connections
    pub launch: Option<LaunchResult>,
    pub cleanup: Option<ProcessCleanup>,
    /// Ports taken from the worker pool for this node
    pub reserved_ports: Vec<u16>,
}

impl RunningNode {
    pub fn passive(endpoint: NodeEndpoint) -> Self {
        Self {
            endpoint,
            launch: None,
            cleanup: None,
            reserved_ports: Vec::new(),
        }
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        self.launch.as_ref().map(|launch| &launch.process)
    }

    /// The node process is gone without anyone asking it to stop
    pub fn died_unexpectedly(&self) -> bool {
        self.process()
            .is_some_and(|process| process.has_exited() && !process.is_intentional_termination())
    }
}

/// Status plus the resources of the current run
pub struct NodeState {
    status: FoundationStatus,
    running: Option<RunningNode>,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            status: FoundationStatus::Stopped,
            running: None,
        }
    }

    /// Move to `Starting`; refused while a start is underway or a node is up
    pub fn begin_start(&mut self) -> TestnetResult<()> {
        match self.status {
            FoundationStatus::Starting | FoundationStatus::Running { .. } => Err(TestnetError::operation(
                None,
                "start",
                format!("foundation is already {}", self.status),
            )),
            FoundationStatus::Stopped | FoundationStatus::Failed { .. } => {
                self.status = FoundationStatus::Starting;
                Ok(())
            }
        }
    }

    pub fn mark_running(&mut self, node: RunningNode) {
        self.status = FoundationStatus::Running {
            endpoint: node.endpoint.endpoint.clone(),
            port: node.endpoint.port,
        };
        self.running = Some(node);
    }

    pub fn mark_failed(&mut self, error: impl std::fmt::Display) {
        self.status = FoundationStatus::Failed {
            error: error.to_string(),
        };
        self.running = None;
    }

    /// Hand over the running resources and mark the foundation stopped
    pub fn take_running(&mut self) -> Option<RunningNode> {
        let running = self.running.take();
        if running.is_some() || !matches!(self.status, FoundationStatus::Starting) {
            self.status = FoundationStatus::Stopped;
        }
        running
    }

    pub fn running(&self) -> Option<&RunningNode> {
        self.running.as_ref()
    }

    /// Current status; a running node whose process died reports `Failed`
    pub fn status(&self) -> FoundationStatus {
        match &self.running {
            Some(node) if node.died_unexpectedly() => FoundationStatus::Failed {
                error: format!("node process {} exited unexpectedly", node.endpoint.pid.unwrap_or_default()),
            },
            _ => self.status.clone(),
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}

/// A node still running when its state goes away is stopped best-effort
impl Drop for NodeState {
    fn drop(&mut self) {
        if let Some(cleanup) = self.running.take().and_then(|node| node.cleanup) {
            cleanup.abort("foundation dropped while running");
        }
    }
}
