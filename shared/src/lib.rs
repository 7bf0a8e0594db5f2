//! Shared types for the test-network orchestrator
//!
//! Contains the pieces every worker needs regardless of which node topology
//! it runs: pool identity, lifecycle status, JSON-RPC wire types, the retry
//! framework and logging setup.

pub mod types;
pub mod errors;
pub mod logging;
pub mod retry;
pub mod rpc;

pub use types::*;
pub use errors::*;

pub use logging::{LoggerRegistry, NodeLogger};
pub use retry::{RetryError, RetryPolicy};
pub use rpc::{JsonRpcRequest, JsonRpcResponse};
