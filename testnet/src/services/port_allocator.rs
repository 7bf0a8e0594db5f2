//! Per-worker port pools
//!
//! Each parallel test worker owns a disjoint range of 100 ports derived from
//! its pool id. Availability is check-then-act against both the in-process
//! allocated set and the OS, so every public operation runs inside one
//! exclusive section.

use std::collections::{HashMap, HashSet};
use std::net::TcpListener;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

use crate::error::{TestnetError, TestnetResult};
use shared::{PoolId, POOL_SIZE};

/// Candidates examined per allocation before giving up
const MAX_PROBE_ATTEMPTS: u16 = POOL_SIZE;

static GLOBAL_ALLOCATOR: OnceLock<Arc<PortAllocator>> = OnceLock::new();

/// Range and rotation state of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortPool {
    start: u16,
    end: u16,
    rotation_offset: u16,
}

impl PortPool {
    fn for_pool(pool_id: PoolId) -> TestnetResult<Self> {
        let (start, end) = pool_id
            .port_range()
            .map_err(|e| TestnetError::config(format!("{pool_id}: {e}")))?;
        Ok(Self {
            start,
            end,
            rotation_offset: 0,
        })
    }

    fn size(&self) -> u16 {
        self.end - self.start + 1
    }

    fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

#[derive(Debug, Default)]
struct AllocatorState {
    pools: HashMap<PoolId, PortPool>,
    allocated: HashSet<u16>,
}

impl AllocatorState {
    fn pool(&mut self, pool_id: PoolId) -> TestnetResult<&mut PortPool> {
        if !self.pools.contains_key(&pool_id) {
            let pool = PortPool::for_pool(pool_id)?;
            self.pools.insert(pool_id, pool);
        }
        self.pools
            .get_mut(&pool_id)
            .ok_or_else(|| TestnetError::config(format!("port pool {pool_id} unavailable")))
    }

    fn allocate_one(&mut self, pool_id: PoolId) -> TestnetResult<u16> {
        let pool = *self.pool(pool_id)?;
        let size = pool.size();

        for step in 0..MAX_PROBE_ATTEMPTS.min(size) {
            let index = (pool.rotation_offset + step) % size;
            let candidate = pool.start + index;
            if self.allocated.contains(&candidate) || !is_port_bindable(candidate) {
                continue;
            }

            self.allocated.insert(candidate);
            if let Some(entry) = self.pools.get_mut(&pool_id) {
                entry.rotation_offset = (index + 1) % size;
            }
            return Ok(candidate);
        }

        Err(TestnetError::PortAllocationExhausted {
            pool_id: pool_id.get(),
            start: pool.start,
            end: pool.end,
        })
    }
}

/// Snapshot of one pool for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_id: PoolId,
    pub start: u16,
    pub end: u16,
    pub rotation_offset: u16,
    pub allocated: usize,
}

/// Snapshot of the whole allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorStats {
    pub total_allocated: usize,
    pub pools: Vec<PoolStats>,
}

/// Mutex-serialized allocator over all pools of this worker process
#[derive(Debug, Default)]
pub struct PortAllocator {
    state: Mutex<AllocatorState>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide allocator instance
    pub fn global() -> Arc<PortAllocator> {
        GLOBAL_ALLOCATOR.get_or_init(|| Arc::new(PortAllocator::new())).clone()
    }

    /// Reserve one free port from the pool's range
    pub async fn allocate(&self, pool_id: PoolId) -> TestnetResult<u16> {
        let mut state = self.state.lock().await;
        let port = state.allocate_one(pool_id)?;
        tracing::debug!("🔌 Allocated port {} from {}", port, pool_id);
        Ok(port)
    }

    /// Reserve `count` ports, or none at all
    pub async fn allocate_many(&self, pool_id: PoolId, count: usize) -> TestnetResult<Vec<u16>> {
        let mut state = self.state.lock().await;
        let mut ports = Vec::with_capacity(count);

        for _ in 0..count {
            match state.allocate_one(pool_id) {
                Ok(port) => ports.push(port),
                Err(e) => {
                    for port in &ports {
                        state.allocated.remove(port);
                    }
                    tracing::warn!("⚠️ Rolled back {} ports from {}: {}", ports.len(), pool_id, e);
                    return Err(e);
                }
            }
        }

        tracing::debug!("🔌 Allocated ports {:?} from {}", ports, pool_id);
        Ok(ports)
    }

    /// Return a port to the pool; unknown ports are ignored
    pub async fn release(&self, port: u16) {
        self.state.lock().await.allocated.remove(&port);
    }

    pub async fn release_many(&self, ports: &[u16]) {
        let mut state = self.state.lock().await;
        for port in ports {
            state.allocated.remove(port);
        }
    }

    /// Release every port of the pool and restart its rotation
    pub async fn reset_pool(&self, pool_id: PoolId) -> TestnetResult<()> {
        let mut state = self.state.lock().await;
        let pool = state.pool(pool_id)?;
        pool.rotation_offset = 0;
        let pool = *pool;
        state.allocated.retain(|port| !pool.contains(*port));
        tracing::debug!("♻️ Reset {}", pool_id);
        Ok(())
    }

    pub async fn stats(&self) -> AllocatorStats {
        let state = self.state.lock().await;
        let mut pools: Vec<PoolStats> = state
            .pools
            .iter()
            .map(|(pool_id, pool)| PoolStats {
                pool_id: *pool_id,
                start: pool.start,
                end: pool.end,
                rotation_offset: pool.rotation_offset,
                allocated: state.allocated.iter().filter(|port| pool.contains(**port)).count(),
            })
            .collect();
        pools.sort_by_key(|pool| pool.pool_id);

        AllocatorStats {
            total_allocated: state.allocated.len(),
            pools,
        }
    }
}

/// Bind-then-close test on the loopback interface
fn is_port_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
