use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::wait::{wait_for, TokioClock};
use crate::AutomationError;

pub const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:17373";
const CLIENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// Reduce type complexity for Clippy
type BridgeResult = Result<serde_json::Value, String>;
type PendingMap = HashMap<String, oneshot::Sender<BridgeResult>>;
type Pending = Arc<Mutex<PendingMap>>;
type Clients = Arc<Mutex<Vec<Client>>>;

#[derive(Debug, Serialize, Deserialize)]
struct EvalRequest {
    id: String,
    action: String,
    code: String,
    #[serde(default)]
    await_promise: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum BridgeIncoming {
    EvalResult {
        id: String,
        ok: bool,
        result: Option<serde_json::Value>,
        error: Option<String>,
    },
    Typed(TypedIncoming),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum TypedIncoming {
    #[serde(rename = "hello")]
    Hello { from: Option<String> },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "console_event")]
    ConsoleEvent {
        level: Option<String>,
        args: Option<serde_json::Value>,
    },
}

struct Client {
    id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

/// WebSocket endpoint the browser extension connects to.
///
/// The extension's content script evaluates the code of each `eval` request
/// in the active tab and answers with an `EvalResult` carrying the same id.
pub struct ExtensionBridge {
    addr: SocketAddr,
    server_task: JoinHandle<()>,
    clients: Clients,
    pending: Pending,
}

impl ExtensionBridge {
    pub async fn start(addr: &str) -> Result<Arc<ExtensionBridge>, AutomationError> {
        let clients: Clients = Arc::new(Mutex::new(Vec::new()));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(%addr, ?e, "failed to bind extension bridge");
            AutomationError::PlatformError(format!("extension bridge bind {addr}: {e}"))
        })?;
        let local = listener.local_addr()?;
        tracing::info!("Autocart extension bridge listening on {}", local);

        let clients_clone = clients.clone();
        let pending_clone = pending.clone();
        let server_task = tokio::spawn(async move {
            let mut next_id = 0u64;
            loop {
                let (stream, _peer) = match listener.accept().await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("ws accept error: {}", e);
                        continue;
                    }
                };
                next_id += 1;
                let client_id = next_id;
                let ws_clients = clients_clone.clone();
                let ws_pending = pending_clone.clone();
                tokio::spawn(async move {
                    let ws_stream = match accept_async(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!("ws handshake error: {}", e);
                            return;
                        }
                    };
                    let (mut sink, mut stream) = ws_stream.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

                    // writer task
                    let writer = tokio::spawn(async move {
                        while let Some(msg) = rx.recv().await {
                            if let Err(e) = sink.send(msg).await {
                                tracing::warn!("ws send error: {}", e);
                                break;
                            }
                        }
                    });

                    ws_clients.lock().await.push(Client {
                        id: client_id,
                        sender: tx,
                    });

                    // reader loop
                    while let Some(Ok(msg)) = stream.next().await {
                        if !msg.is_text() {
                            continue;
                        }
                        let txt = msg.into_text().unwrap_or_default();
                        handle_incoming(&txt, &ws_pending).await;
                    }

                    ws_clients.lock().await.retain(|c| c.id != client_id);
                    tracing::info!(client = client_id, "Extension disconnected");
                    writer.abort();
                });
            }
        });

        Ok(Arc::new(ExtensionBridge {
            addr: local,
            server_task,
            clients,
            pending,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn is_client_connected(&self) -> bool {
        !self.clients.lock().await.is_empty()
    }

    /// Poll until an extension connects. Returns `false` on timeout.
    pub async fn wait_for_client(&self, timeout: Duration) -> bool {
        wait_for(&TokioClock::new(), timeout, CLIENT_POLL_INTERVAL, || {
            self.is_client_connected()
        })
        .await
    }

    /// Evaluate `code` in the active tab and return its (JSON) result
    pub async fn eval(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, AutomationError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel::<BridgeResult>();
        self.pending.lock().await.insert(id.clone(), tx);
        let req = EvalRequest {
            id: id.clone(),
            action: "eval".into(),
            code: code.to_string(),
            await_promise: true,
        };
        let payload = serde_json::to_string(&req)
            .map_err(|e| AutomationError::PlatformError(format!("bridge serialize: {e}")))?;

        // send over first client
        let sent = {
            let clients = self.clients.lock().await;
            tracing::debug!(clients = clients.len(), preview = %payload.chars().take(120).collect::<String>(), "Sending eval to extension");
            clients
                .first()
                .map(|c| c.sender.send(Message::Text(payload)).is_ok())
        };
        match sent {
            Some(true) => {}
            Some(false) | None => {
                self.pending.lock().await.remove(&id);
                return Err(AutomationError::PlatformError(
                    "no browser extension connected".into(),
                ));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(val))) => Ok(val),
            Ok(Ok(Err(err))) => Err(AutomationError::PlatformError(format!(
                "JavaScript execution failed: {err}"
            ))),
            Ok(Err(_canceled)) => Err(AutomationError::PlatformError(
                "extension dropped the eval request".into(),
            )),
            Err(_elapsed) => {
                let _ = self.pending.lock().await.remove(&id);
                tracing::warn!("ExtensionBridge: timed out waiting for EvalResult (id={})", id);
                Err(AutomationError::Timeout(format!(
                    "no EvalResult within {timeout:?}"
                )))
            }
        }
    }
}

impl Drop for ExtensionBridge {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

async fn handle_incoming(txt: &str, pending: &Pending) {
    match serde_json::from_str::<BridgeIncoming>(txt) {
        Ok(BridgeIncoming::EvalResult {
            id,
            ok,
            result,
            error,
        }) => {
            if !ok {
                let head: String = error
                    .as_deref()
                    .unwrap_or("unknown error")
                    .chars()
                    .take(400)
                    .collect();
                tracing::debug!(id = %id, error = %head, "Bridge received EvalResult error");
            }
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(if ok {
                    Ok(result.unwrap_or(serde_json::Value::Null))
                } else {
                    Err(error.unwrap_or_else(|| "unknown error".into()))
                });
            }
        }
        Ok(BridgeIncoming::Typed(TypedIncoming::ConsoleEvent { level, args })) => {
            let args_str = args.map(|v| v.to_string()).unwrap_or_else(|| "[]".into());
            match level.as_deref().unwrap_or("log") {
                "error" => tracing::error!(args = %args_str, "Page console error"),
                "warning" | "warn" => tracing::warn!(args = %args_str, "Page console warning"),
                _ => tracing::debug!(args = %args_str, "Page console message"),
            }
        }
        Ok(BridgeIncoming::Typed(TypedIncoming::Hello { from })) => {
            tracing::info!(from = ?from, "Extension connected");
        }
        Ok(BridgeIncoming::Typed(TypedIncoming::Pong)) => {}
        Err(e) => tracing::warn!("Invalid incoming JSON: {}", e),
    }
}
