//! Service-specific tests
//!
//! Each service has its own test file; shared fixtures live in `common`.

#[cfg(test)]
mod process_manager;

// Common test utilities for services
#[cfg(test)]
pub mod common {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    use shared::{JsonRpcRequest, RetryPolicy};

    /// Standard timeout for async operations in tests
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Helper to run async operations with timeout
    pub async fn with_timeout<T, F>(future: F) -> Result<T, tokio::time::error::Elapsed>
    where
        F: std::future::Future<Output = T>,
    {
        timeout(TEST_TIMEOUT, future).await
    }

    /// Fixed, short-interval policy so exhaustion tests finish quickly
    pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(10))
    }

    /// A loopback port with nothing listening on it
    pub fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        listener.local_addr().expect("local addr").port()
    }

    /// How the local JSON-RPC server answers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RpcBehaviour {
        /// Answers every method successfully
        Healthy,
        /// Rejects `system_chain`, answers `eth_chainId`
        EthOnly,
        /// Returns a JSON-RPC error for everything
        ErrorReply,
        /// Sends an unrelated notification before each answer
        NotifyFirst,
        /// Completes the handshake and closes
        CloseImmediately,
    }

    /// Start a WebSocket JSON-RPC server on an ephemeral loopback port
    pub async fn spawn_rpc_server(behaviour: RpcBehaviour) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind rpc server");
        let port = listener.local_addr().expect("local addr").port();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, behaviour));
            }
        });
        (port, handle)
    }

    async fn serve_connection(stream: TcpStream, behaviour: RpcBehaviour) {
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };
        if behaviour == RpcBehaviour::CloseImmediately {
            let _ = ws.close(None).await;
            return;
        }

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(request) = serde_json::from_str::<JsonRpcRequest>(&text) else {
                continue;
            };

            if behaviour == RpcBehaviour::NotifyFirst {
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "chain_newHead",
                    "params": {"subscription": "abc", "result": {}}
                });
                if ws.send(Message::Text(notification.to_string())).await.is_err() {
                    break;
                }
            }

            let reply = match (behaviour, request.method.as_str()) {
                (RpcBehaviour::ErrorReply, _) | (RpcBehaviour::EthOnly, "system_chain") => json!({
                    "jsonrpc": "2.0",
                    "id": request.id,
                    "error": {"code": -32601, "message": "Method not found"}
                }),
                (_, "eth_chainId") => json!({"jsonrpc": "2.0", "id": request.id, "result": "0x501"}),
                _ => json!({"jsonrpc": "2.0", "id": request.id, "result": "Development"}),
            };
            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                break;
            }
        }
    }
}
