//! Entry point for the `testnet` binary
//!
//! Brings one foundation up, prints its RPC endpoint and keeps it running
//! until Ctrl+C.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::signal;

use shared::{logging, node_info, FoundationKind, PoolId};
use testnet::{Foundation, FoundationConfig, NodeLaunchConfig, NodeOrchestrator, RpcPortSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FoundationArg {
    Dev,
    Chopsticks,
    Zombie,
    ReadOnly,
}

impl From<FoundationArg> for FoundationKind {
    fn from(arg: FoundationArg) -> Self {
        match arg {
            FoundationArg::Dev => FoundationKind::Dev,
            FoundationArg::Chopsticks => FoundationKind::Chopsticks,
            FoundationArg::Zombie => FoundationKind::Zombie,
            FoundationArg::ReadOnly => FoundationKind::ReadOnly,
        }
    }
}

/// Launch a blockchain test network and wait for its RPC endpoint
#[derive(Parser, Debug)]
#[command(name = "testnet")]
#[command(about = "Launches a test network node and keeps it running until Ctrl+C")]
pub struct Args {
    /// Network topology to bring up
    #[arg(long, value_enum, default_value = "dev")]
    pub foundation: FoundationArg,

    /// Binary to launch (not used for read-only)
    #[arg(long)]
    pub command: Option<String>,

    /// Argument passed to the binary; repeat for several
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Name used for logs
    #[arg(long, default_value = "node")]
    pub name: String,

    /// Directory for node log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Probe with eth_chainId instead of system_chain
    #[arg(long)]
    pub ethereum: bool,

    /// RPC port the arguments already pin the node to
    #[arg(long, conflicts_with = "reserve_port")]
    pub rpc_port: Option<u16>,

    /// Reserve an RPC port from the worker pool and pass it as --rpc-port
    #[arg(long)]
    pub reserve_port: bool,

    /// RPC port of a node started by the network launcher; repeat for several
    #[arg(long = "zombie-rpc-port")]
    pub zombie_rpc_ports: Vec<u16>,

    /// Endpoint of an existing network (read-only)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    fn foundation_config(&self) -> anyhow::Result<FoundationConfig> {
        Ok(match self.foundation {
            FoundationArg::Dev => FoundationConfig::Dev(self.node_config()?),
            FoundationArg::Chopsticks => FoundationConfig::Chopsticks(self.node_config()?),
            FoundationArg::Zombie => FoundationConfig::Zombie {
                launcher: self.node_config()?,
                rpc_ports: self.zombie_rpc_ports.clone(),
            },
            FoundationArg::ReadOnly => FoundationConfig::ReadOnly {
                name: self.name.clone(),
                endpoint: self.endpoint.clone().context("--endpoint is required for read-only")?,
                is_ethereum: self.ethereum,
            },
        })
    }

    fn node_config(&self) -> anyhow::Result<NodeLaunchConfig> {
        let Some(command) = self.command.clone() else {
            bail!("--command is required for the {} foundation", FoundationKind::from(self.foundation));
        };

        let rpc_port = match (self.rpc_port, self.reserve_port) {
            (Some(port), _) => RpcPortSource::Fixed(port),
            (None, true) => RpcPortSource::Reserve,
            (None, false) => RpcPortSource::Discover,
        };

        let mut node = NodeLaunchConfig::new(self.name.clone(), command)
            .args(self.args.iter().cloned())
            .ethereum(self.ethereum)
            .rpc_port(rpc_port);
        if let Some(ref log_dir) = self.log_dir {
            node = node.log_dir(log_dir.clone());
        }
        Ok(node)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    logging::init_tracing(Some(&args.log_level));

    let config = args.foundation_config()?;
    let name = config.name().to_string();
    let orchestrator = NodeOrchestrator::local(config);

    let endpoint = orchestrator
        .start()
        .await
        .with_context(|| format!("starting {} foundation in {}", orchestrator.kind(), PoolId::current()))?;

    node_info!(name, "🌐 RPC endpoint: {}", endpoint.endpoint);
    if let Some(ref log_path) = endpoint.log_path {
        node_info!(name, "📝 Logs: {}", log_path.display());
    }
    println!("{}", endpoint.endpoint);

    if let Err(err) = signal::ctrl_c().await {
        logging::log_error(&name, "Signal handling", &err);
    }
    logging::log_shutdown(&name, "Received Ctrl+C signal");

    orchestrator.stop().await.context("stopping foundation")?;
    logging::log_success(&name, "Foundation stopped gracefully");
    Ok(())
}
