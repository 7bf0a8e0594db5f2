//! Foundation configuration
//!
//! Plain structs with fluent setters describing what the orchestrator should
//! bring up. Loading these from files is left to the caller.

use shared::FoundationKind;
use std::path::PathBuf;
use url::Url;

use crate::services::port_discovery::DEFAULT_DISCOVERY_ATTEMPTS;
use crate::services::readiness::DEFAULT_READINESS_ATTEMPTS;

/// Where the RPC port of a launched node comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RpcPortSource {
    /// Find it among the process's listening ports
    #[default]
    Discover,
    /// The arguments already pin the node to this port
    Fixed(u16),
    /// Take a port from the worker pool and pass it as `--rpc-port=<p>`
    Reserve,
}

/// One node process to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLaunchConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub is_ethereum: bool,
    pub log_dir: Option<PathBuf>,
    pub rpc_port: RpcPortSource,
    pub discovery_attempts: u32,
    pub readiness_attempts: u32,
}

impl NodeLaunchConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            is_ethereum: false,
            log_dir: None,
            rpc_port: RpcPortSource::Discover,
            discovery_attempts: DEFAULT_DISCOVERY_ATTEMPTS,
            readiness_attempts: DEFAULT_READINESS_ATTEMPTS,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Probe with `eth_chainId` instead of `system_chain`
    pub fn ethereum(mut self, is_ethereum: bool) -> Self {
        self.is_ethereum = is_ethereum;
        self
    }

    pub fn log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn rpc_port(mut self, source: RpcPortSource) -> Self {
        self.rpc_port = source;
        self
    }

    pub fn discovery_attempts(mut self, attempts: u32) -> Self {
        self.discovery_attempts = attempts;
        self
    }

    pub fn readiness_attempts(mut self, attempts: u32) -> Self {
        self.readiness_attempts = attempts;
        self
    }
}

/// The topology a foundation brings up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoundationConfig {
    /// Single development node
    Dev(NodeLaunchConfig),
    /// Forked chain; usually launched without a port argument
    Chopsticks(NodeLaunchConfig),
    /// Network launcher plus the RPC ports of the nodes it starts; the first
    /// port is the endpoint handed back
    Zombie {
        launcher: NodeLaunchConfig,
        rpc_ports: Vec<u16>,
    },
    /// Existing network, nothing is launched
    ReadOnly {
        name: String,
        endpoint: String,
        is_ethereum: bool,
    },
}

impl FoundationConfig {
    pub fn kind(&self) -> FoundationKind {
        match self {
            FoundationConfig::Dev(_) => FoundationKind::Dev,
            FoundationConfig::Chopsticks(_) => FoundationKind::Chopsticks,
            FoundationConfig::Zombie { .. } => FoundationKind::Zombie,
            FoundationConfig::ReadOnly { .. } => FoundationKind::ReadOnly,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FoundationConfig::Dev(node) | FoundationConfig::Chopsticks(node) => &node.name,
            FoundationConfig::Zombie { launcher, .. } => &launcher.name,
            FoundationConfig::ReadOnly { name, .. } => name,
        }
    }
}

/// Port of a WebSocket URL, falling back to the scheme default
pub fn endpoint_port(endpoint: &str) -> Option<u16> {
    Url::parse(endpoint).ok()?.port_or_known_default()
}
