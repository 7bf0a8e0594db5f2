//! Core types used throughout the test-network system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::errors::{SharedError, SharedResult};

/// Environment variable carrying the parallel worker identity
pub const POOL_ID_ENV: &str = "TESTNET_POOL_ID";

/// First port of pool 0
pub const POOL_BASE_PORT: u16 = 10_000;

/// Number of ports reserved for each pool
pub const POOL_SIZE: u16 = 100;

/// Global pool identity - resolved once per worker process
static POOL_ID: OnceLock<PoolId> = OnceLock::new();

/// Identifier of a parallel test worker, used to partition ports across workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(u32);

impl PoolId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Read the pool identity from the environment (default 1)
    pub fn from_env() -> Self {
        Self::parse(std::env::var(POOL_ID_ENV).ok().as_deref())
    }

    /// Pool identity from a raw `TESTNET_POOL_ID` value; unset or invalid means pool 1
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match raw.trim().parse::<u32>() {
            Ok(id) => Self(id),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring invalid {}={:?}, using pool 1", POOL_ID_ENV, raw);
                Self::default()
            }
        }
    }

    /// Pool identity of the current worker process, read from the environment on first use
    pub fn current() -> &'static PoolId {
        POOL_ID.get_or_init(PoolId::from_env)
    }

    /// Inclusive port range `[10000 + 100 * id, 10099 + 100 * id]` owned by this pool
    pub fn port_range(self) -> SharedResult<(u16, u16)> {
        let start = u64::from(POOL_BASE_PORT) + u64::from(self.0) * u64::from(POOL_SIZE);
        let end = start + u64::from(POOL_SIZE) - 1;
        match (u16::try_from(start), u16::try_from(end)) {
            (Ok(start), Ok(end)) => Ok((start, end)),
            _ => Err(SharedError::InvalidConfig {
                field: POOL_ID_ENV.to_string(),
                value: self.0.to_string(),
            }),
        }
    }
}

impl Default for PoolId {
    fn default() -> Self {
        PoolId(1)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool_{}", self.0)
    }
}

/// Supported network topologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FoundationKind {
    /// Single development node binary
    Dev,
    /// Forked chain served by a chopsticks process
    Chopsticks,
    /// Multi-node network started by a network launcher
    Zombie,
    /// Passive connection to an already running network
    ReadOnly,
}

impl fmt::Display for FoundationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FoundationKind::Dev => write!(f, "dev"),
            FoundationKind::Chopsticks => write!(f, "chopsticks"),
            FoundationKind::Zombie => write!(f, "zombie"),
            FoundationKind::ReadOnly => write!(f, "read_only"),
        }
    }
}

/// Lifecycle status exposed uniformly by every foundation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FoundationStatus {
    Starting,
    Running { endpoint: String, port: u16 },
    Stopped,
    Failed { error: String },
}

impl FoundationStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, FoundationStatus::Running { .. })
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            FoundationStatus::Running { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }
}

impl fmt::Display for FoundationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FoundationStatus::Starting => write!(f, "starting"),
            FoundationStatus::Running { endpoint, .. } => write!(f, "running at {endpoint}"),
            FoundationStatus::Stopped => write!(f, "stopped"),
            FoundationStatus::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}
