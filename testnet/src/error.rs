//! Testnet orchestration error types

use shared::SharedError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a file lock could not be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    AcquisitionFailed,
    Timeout,
}

impl fmt::Display for LockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockFailure::AcquisitionFailed => write!(f, "acquisition_failed"),
            LockFailure::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TestnetError {
    #[error("Failed to launch {command} {args:?}: {source}")]
    ProcessLaunch {
        command: String,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    #[error("Process operation '{operation}' failed (pid {pid:?}): {message}")]
    ProcessOperation {
        pid: Option<u32>,
        operation: String,
        message: String,
    },

    #[error("No free port in pool {pool_id} ({start}-{end})")]
    PortAllocationExhausted { pool_id: u32, start: u16, end: u16 },

    #[error("RPC port discovery failed for pid {pid} (attempts: {attempts:?}): {cause}")]
    PortDiscovery {
        pid: u32,
        attempts: Option<u32>,
        cause: String,
    },

    #[error("Node on port {port} not ready after {attempts_exhausted} attempts: {cause}")]
    Readiness {
        port: u16,
        attempts_exhausted: u32,
        cause: String,
    },

    #[error("File lock {reason} at {}", .lock_path.display())]
    FileLock { reason: LockFailure, lock_path: PathBuf },

    #[error("Failed to start {foundation} (port {port:?}, pid {pid:?}): {source}")]
    Startup {
        foundation: String,
        port: Option<u16>,
        pid: Option<u32>,
        #[source]
        source: Box<TestnetError>,
    },

    #[error("Failed to stop {foundation} (pid {pid:?}): {source}")]
    Shutdown {
        foundation: String,
        pid: Option<u32>,
        #[source]
        source: Box<TestnetError>,
    },

    #[error("Configuration error: {field}")]
    Config { field: String },

    #[error("RPC probe failed: {message}")]
    Probe { message: String },

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TestnetError {
    pub fn config(field: impl Into<String>) -> Self {
        TestnetError::Config { field: field.into() }
    }

    pub fn probe(message: impl Into<String>) -> Self {
        TestnetError::Probe { message: message.into() }
    }

    pub fn operation(pid: Option<u32>, operation: impl Into<String>, message: impl fmt::Display) -> Self {
        TestnetError::ProcessOperation {
            pid,
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a component failure raised while bringing a foundation up
    pub fn startup(foundation: impl fmt::Display, port: Option<u16>, pid: Option<u32>, source: TestnetError) -> Self {
        TestnetError::Startup {
            foundation: foundation.to_string(),
            port,
            pid,
            source: Box::new(source),
        }
    }

    /// Wrap a component failure raised while tearing a foundation down
    pub fn shutdown(foundation: impl fmt::Display, pid: Option<u32>, source: TestnetError) -> Self {
        TestnetError::Shutdown {
            foundation: foundation.to_string(),
            pid,
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through startup/shutdown wrappers
    pub fn root_cause(&self) -> &TestnetError {
        match self {
            TestnetError::Startup { source, .. } | TestnetError::Shutdown { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type TestnetResult<T> = Result<T, TestnetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nesting() {
        let inner = TestnetError::Readiness {
            port: 9944,
            attempts_exhausted: 3,
            cause: "connection refused".to_string(),
        };
        let wrapped = TestnetError::startup("dev", Some(9944), Some(42), inner);
        let message = wrapped.to_string();
        assert!(message.contains("dev"));
        assert!(message.contains("9944"));
        assert!(matches!(
            wrapped.root_cause(),
            TestnetError::Readiness { attempts_exhausted: 3, .. }
        ));
    }

    #[test]
    fn test_lock_failure_display() {
        let err = TestnetError::FileLock {
            reason: LockFailure::Timeout,
            lock_path: PathBuf::from("/tmp/x.lock"),
        };
        assert_eq!(err.to_string(), "File lock timeout at /tmp/x.lock");
    }
}
