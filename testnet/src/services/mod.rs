//! Service implementations
//!
//! Real implementations of the seam traits plus the concrete building blocks
//! the orchestrator composes: process supervision, port pools, discovery,
//! readiness, cross-process locking and the artifact cache.

pub mod artifact_cache;
pub mod file_lock;
pub mod port_allocator;
pub mod port_discovery;
pub mod process_manager;
pub mod process_output_handler;
pub mod readiness;
pub mod rpc_probe;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use artifact_cache::ArtifactCache;
pub use file_lock::{FileLock, LockMetadata};
pub use port_allocator::{AllocatorStats, PoolStats, PortAllocator};
pub use port_discovery::{LsofPortLister, RpcPortDiscovery};
pub use process_manager::{ExitSummary, LaunchResult, ProcessCleanup, ProcessHandle, ProcessManager};
pub use readiness::ReadinessProbe;
pub use rpc_probe::WsRpcProbe;
