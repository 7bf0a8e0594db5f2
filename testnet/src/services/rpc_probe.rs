//! WebSocket JSON-RPC probe
//!
//! Opens a short-lived socket, fires every health method at once and accepts
//! the first JSON-RPC 2.0 success.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{TestnetError, TestnetResult};
use crate::traits::RpcProbe;
use shared::rpc::{self, JsonRpcRequest, JsonRpcResponse};

type RpcSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Real probe over `ws://` / `wss://`
#[derive(Debug, Clone)]
pub struct WsRpcProbe {
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl WsRpcProbe {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Configure per-connection and per-call timeouts (fluent API)
    pub fn with_timeouts(mut self, connect_timeout: Duration, call_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.call_timeout = call_timeout;
        self
    }

    async fn exchange(&self, socket: &mut RpcSocket, is_ethereum_chain: bool) -> TestnetResult<()> {
        let mut pending = HashMap::new();
        for (index, method) in rpc::health_methods(is_ethereum_chain).iter().enumerate() {
            let id = index as u64 + 1;
            let request = JsonRpcRequest::new(id, *method).to_text()?;
            socket.send(Message::Text(request)).await?;
            pending.insert(id, *method);
        }

        match timeout(self.call_timeout, first_success(socket, pending)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TestnetError::probe(format!(
                "no response within {:?}",
                self.call_timeout
            ))),
        }
    }
}

impl Default for WsRpcProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcProbe for WsRpcProbe {
    async fn probe(&self, endpoint: &str, is_ethereum_chain: bool) -> TestnetResult<()> {
        let (mut socket, _) = timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| TestnetError::probe(format!("connect to {endpoint} timed out")))??;

        let outcome = self.exchange(&mut socket, is_ethereum_chain).await;
        let _ = socket.close(None).await;
        outcome
    }
}

/// Read frames until one pending request is answered successfully
async fn first_success(socket: &mut RpcSocket, mut pending: HashMap<u64, &'static str>) -> TestnetResult<()> {
    let mut failures = Vec::new();

    while let Some(frame) = socket.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };

        // Subscriptions and unrelated notifications are skipped
        let Ok(response) = JsonRpcResponse::parse(&text) else {
            continue;
        };
        let Some(method) = response.request_id().and_then(|id| pending.remove(&id)) else {
            continue;
        };

        if response.is_success() {
            return Ok(());
        }
        failures.push(format!("{method} returned {}", response.error.unwrap_or_default()));
        if pending.is_empty() {
            break;
        }
    }

    if failures.is_empty() {
        Err(TestnetError::probe("connection closed before any response"))
    } else {
        Err(TestnetError::probe(failures.join("; ")))
    }
}
