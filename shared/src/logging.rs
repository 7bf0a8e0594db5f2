//! Shared logging utilities for consistent tracing across test workers

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

use crate::types::PoolId;

/// Build the default filter directives for a given base level
fn default_filter(base_level: &str) -> String {
    format!("testnet={base_level},shared={base_level},tungstenite=warn,tokio_tungstenite=warn")
}

/// Initialize tracing subscriber with an optional log level.
///
/// `RUST_LOG`, when set, takes precedence over the computed directives.
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt};

    let base_level = log_level.unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(base_level)));

    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for node-aware info logging
#[macro_export]
macro_rules! node_info {
    ($node:expr, $($arg:tt)*) => {
        tracing::info!(
            node = %$node,
            pool = %$crate::PoolId::current(),
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for node-aware warning logging
#[macro_export]
macro_rules! node_warn {
    ($node:expr, $($arg:tt)*) => {
        tracing::warn!(
            node = %$node,
            pool = %$crate::PoolId::current(),
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for node-aware error logging
#[macro_export]
macro_rules! node_error {
    ($node:expr, $($arg:tt)*) => {
        tracing::error!(
            node = %$node,
            pool = %$crate::PoolId::current(),
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for node-aware debug logging
#[macro_export]
macro_rules! node_debug {
    ($node:expr, $($arg:tt)*) => {
        tracing::debug!(
            node = %$node,
            pool = %$crate::PoolId::current(),
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(node: &str, details: &str) {
    info!(
        node = %node,
        pool = %PoolId::current(),
        timestamp = format_timestamp(),
        "🚀 Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(node: &str, reason: &str) {
    info!(
        node = %node,
        pool = %PoolId::current(),
        timestamp = format_timestamp(),
        "🛑 Shutting down: {}",
        reason
    );
}

/// Contextual logging helper for error conditions
pub fn log_error(node: &str, context: &str, error: &dyn std::fmt::Display) {
    error!(
        node = %node,
        pool = %PoolId::current(),
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(node: &str, message: &str) {
    info!(
        node = %node,
        pool = %PoolId::current(),
        timestamp = format_timestamp(),
        "✅ {}",
        message
    );
}

/// Named logger handed out by a [`LoggerRegistry`]
#[derive(Debug)]
pub struct NodeLogger {
    name: String,
    span: tracing::Span,
}

impl NodeLogger {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            span: tracing::info_span!("node", name = %name, pool = %PoolId::current()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Span that scopes every event emitted on behalf of this node
    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }
}

/// Registry of named loggers, owned by whoever composes the nodes
#[derive(Debug, Default)]
pub struct LoggerRegistry {
    loggers: Mutex<HashMap<String, Arc<NodeLogger>>>,
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the logger registered under `name`, creating it on first request
    pub fn get_or_create(&self, name: &str) -> Arc<NodeLogger> {
        let mut loggers = match self.loggers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loggers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(NodeLogger::new(name)))
            .clone()
    }

    pub fn len(&self) -> usize {
        match self.loggers.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
