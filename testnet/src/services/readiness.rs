//! Readiness polling against a known RPC port

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{TestnetError, TestnetResult};
use crate::traits::{local_endpoint, RpcProbe};
use shared::retry::{self, RetryPolicy};

pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;

/// Upper bound on a single readiness attempt
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls a fixed endpoint until it answers the health methods
pub struct ReadinessProbe<P> {
    probe: Arc<P>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl<P: RpcProbe> ReadinessProbe<P> {
    pub fn new(probe: Arc<P>) -> Self {
        Self {
            probe,
            policy: RetryPolicy::health_check(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Configure the retry policy (fluent API)
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Configure the per-attempt timeout (fluent API)
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Wait until the node on local `port` is ready, for at most `max_attempts` attempts
    pub async fn check_ready(&self, port: u16, is_ethereum_chain: bool, max_attempts: u32) -> TestnetResult<()> {
        self.check_endpoint(&local_endpoint(port), port, is_ethereum_chain, max_attempts)
            .await
    }

    /// Same as [`check_ready`](Self::check_ready) for an arbitrary endpoint URL;
    /// `port` is only used for error reporting
    pub async fn check_endpoint(
        &self,
        endpoint: &str,
        port: u16,
        is_ethereum_chain: bool,
        max_attempts: u32,
    ) -> TestnetResult<()> {
        let policy = self.policy.with_max_attempts(max_attempts);
        let this = self;

        retry::execute(&policy, move |_| this.attempt(endpoint, is_ethereum_chain))
            .await
            .map_err(|e| TestnetError::Readiness {
                port,
                attempts_exhausted: e.attempts,
                cause: e.last_error.to_string(),
            })?;

        tracing::debug!("💚 {} is ready", endpoint);
        Ok(())
    }

    async fn attempt(&self, endpoint: &str, is_ethereum_chain: bool) -> TestnetResult<()> {
        match timeout(self.attempt_timeout, self.probe.probe(endpoint, is_ethereum_chain)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TestnetError::probe(format!(
                "attempt timed out after {:?}",
                self.attempt_timeout
            ))),
        }
    }
}
