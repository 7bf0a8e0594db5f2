//! Dynamic RPC port discovery
//!
//! A freshly started node may open its RPC listener after its P2P listener,
//! so every cycle re-lists the process's listening ports, filters out the
//! well-known non-RPC ones and races a JSON-RPC probe against each remaining
//! candidate. The first candidate to answer wins; the other probes are dropped
//! along with their sockets.

use async_trait::async_trait;
use futures_util::future::select_ok;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::process::Command;

use crate::error::{TestnetError, TestnetResult};
use crate::traits::{local_endpoint, PortLister, RpcProbe};
use shared::retry::{self, RetryPolicy};

/// Fixed peer-to-peer port of substrate nodes
pub const P2P_PORT: u16 = 30333;

/// Fixed Prometheus metrics port of substrate nodes
pub const METRICS_PORT: u16 = 9615;

/// Lowest port considered a plausible RPC listener
const MIN_RPC_PORT: u16 = 1024;

pub const DEFAULT_DISCOVERY_ATTEMPTS: u32 = 600;

fn listen_port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r":(\d+)(?:\s+\(LISTEN\))?\s*$").expect("valid listen port regex"))
}

/// Extract the trailing `:<port>` of every LISTEN line, sorted and deduplicated
pub fn parse_listening_ports(output: &str) -> Vec<u16> {
    let mut ports: Vec<u16> = output
        .lines()
        .filter(|line| line.contains("LISTEN"))
        .filter_map(|line| listen_port_pattern().captures(line.trim_end()))
        .filter_map(|captures| captures.get(1)?.as_str().parse().ok())
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

/// Drop the P2P and metrics ports and anything privileged
pub fn rpc_candidates(ports: &[u16]) -> Vec<u16> {
    ports
        .iter()
        .copied()
        .filter(|port| *port != P2P_PORT && *port != METRICS_PORT && *port >= MIN_RPC_PORT)
        .collect()
}

/// Lists listening sockets with `lsof`
#[derive(Debug, Clone, Default)]
pub struct LsofPortLister;

impl LsofPortLister {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PortLister for LsofPortLister {
    async fn listening_ports(&self, pid: u32) -> TestnetResult<Vec<u16>> {
        let output = Command::new("lsof")
            .arg("-Pan") // numeric ports, AND the filters below
            .arg("-p")
            .arg(pid.to_string())
            .arg("-iTCP")
            .arg("-sTCP:LISTEN")
            .output()
            .await
            .map_err(|e| TestnetError::operation(Some(pid), "lsof", e))?;

        // lsof exits non-zero when nothing matches - that's normal
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_listening_ports(&stdout))
    }
}

/// Finds the RPC port of a running process
pub struct RpcPortDiscovery<L, P> {
    lister: L,
    probe: Arc<P>,
    policy: RetryPolicy,
}

impl<L, P> RpcPortDiscovery<L, P>
where
    L: PortLister,
    P: RpcProbe,
{
    pub fn new(lister: L, probe: Arc<P>) -> Self {
        Self {
            lister,
            probe,
            policy: RetryPolicy::port_discovery(),
        }
    }

    /// Configure the polling policy (fluent API)
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll until one of `pid`'s listening ports answers JSON-RPC, for at most `max_attempts` cycles
    pub async fn discover_rpc_port(&self, pid: u32, is_ethereum_chain: bool, max_attempts: u32) -> TestnetResult<u16> {
        let policy = self.policy.with_max_attempts(max_attempts);
        let this = self;

        let port = retry::execute(&policy, move |_| this.discovery_cycle(pid, is_ethereum_chain))
            .await
            .map_err(|e| TestnetError::PortDiscovery {
                pid,
                attempts: Some(e.attempts),
                cause: e.last_error.to_string(),
            })?;

        tracing::debug!("🔍 Discovered RPC port {} for pid {}", port, pid);
        Ok(port)
    }

    async fn discovery_cycle(&self, pid: u32, is_ethereum_chain: bool) -> TestnetResult<u16> {
        let ports = self.lister.listening_ports(pid).await?;
        if ports.is_empty() {
            return Err(TestnetError::PortDiscovery {
                pid,
                attempts: None,
                cause: "no listening ports".to_string(),
            });
        }

        let candidates = rpc_candidates(&ports);
        if candidates.is_empty() {
            return Err(TestnetError::PortDiscovery {
                pid,
                attempts: None,
                cause: format!("no RPC candidates among {ports:?}"),
            });
        }

        let probes = candidates.iter().map(|&port| {
            let probe = self.probe.clone();
            Box::pin(async move { probe.probe(&local_endpoint(port), is_ethereum_chain).await.map(|()| port) })
        });

        match select_ok(probes).await {
            Ok((port, losers)) => {
                drop(losers);
                Ok(port)
            }
            Err(e) => Err(TestnetError::PortDiscovery {
                pid,
                attempts: None,
                cause: format!("no candidate among {candidates:?} answered: {e}"),
            }),
        }
    }
}
