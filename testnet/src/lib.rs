//! Test-network orchestration for blockchain nodes
//!
//! Launches node processes (or connects to running networks), finds and
//! health-checks their RPC endpoints, and tears them down again, while
//! keeping parallel test workers out of each other's ports and caches.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod state;
pub mod traits;

// Re-export commonly used types
pub use config::{FoundationConfig, NodeLaunchConfig, RpcPortSource};
pub use error::{LockFailure, TestnetError, TestnetResult};
pub use orchestrator::NodeOrchestrator;
pub use traits::{Foundation, NodeEndpoint, PortLister, RpcProbe};
