//! Host <-> engine control channel.
//!
//! Both ends speak [`Frame`]s over a [`Link`], a pair of unbounded queues.
//! A link can be in-process ([`Link::pair`]) or carried over a WebSocket
//! ([`connect`], [`ControlServer::listen`]); the client and server never know
//! which.

use crate::automation::Automation;
use crate::cart::CartSnapshot;
use crate::errors::{AutomationError, ChannelError};
use crate::protocol::{Command, Event, Frame, Reply};
use crate::selector::TargetSet;
use crate::types::{AutomationConfig, AutomationStatus};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:17380";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_BUFFER: usize = 256;

type PendingMap = HashMap<String, oneshot::Sender<Reply>>;
type Pending = Arc<Mutex<PendingMap>>;

/// One end of a bidirectional frame pipe
pub struct Link {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl Link {
    /// Two connected in-process ends
    pub fn pair() -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Link { tx: a_tx, rx: a_rx }, Link { tx: b_tx, rx: b_rx })
    }

    pub fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        self.tx.send(frame).map_err(|_| ChannelError::Closed)
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

/// Carry frames over an established WebSocket as JSON text messages
fn ws_link<S>(ws: WebSocketStream<S>) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

    // writer task
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match frame.to_json() {
                Ok(t) => t,
                Err(e) => {
                    warn!("dropping unserializable frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!("ws send error: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    // reader loop
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    debug!("ws read error: {}", e);
                    break;
                }
            };
            if msg.is_close() {
                break;
            }
            if !msg.is_text() {
                continue;
            }
            let txt = msg.into_text().unwrap_or_default();
            match Frame::from_json(&txt) {
                Ok(frame) => {
                    if in_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Invalid incoming frame: {}", e),
            }
        }
        writer.abort();
    });

    Link {
        tx: out_tx,
        rx: in_rx,
    }
}

/// Open a WebSocket link to an engine, e.g. `ws://127.0.0.1:17380`.
///
/// The TCP connect and the WebSocket handshake together must finish within
/// `timeout`; a port that accepts but never answers is a [`ChannelError::Timeout`].
pub async fn connect(url: &str, timeout: Duration) -> Result<Link, ChannelError> {
    let (ws, _response) = match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(ChannelError::Unreachable(format!("{url}: {e}"))),
        Err(_elapsed) => {
            warn!(%url, ?timeout, "engine accepted the connection but never completed the handshake");
            return Err(ChannelError::Timeout(timeout));
        }
    };
    debug!(%url, "control link connected");
    Ok(ws_link(ws))
}

/// Engine side: answers commands against one [`Automation`] and pushes its
/// events to every connected host.
#[derive(Clone)]
pub struct ControlServer {
    automation: Automation,
}

impl ControlServer {
    pub fn new(automation: Automation) -> Self {
        Self { automation }
    }

    pub fn automation(&self) -> &Automation {
        &self.automation
    }

    /// Execute one command and build its reply
    #[instrument(level = "debug", skip(self, command), fields(command = command.name()))]
    pub async fn handle(&self, command: Command) -> Reply {
        match command {
            Command::Start { config, targets } => match self.automation.start(config, targets).await {
                Ok(()) => Reply::Start {
                    success: true,
                    error: None,
                },
                Err(e) => Reply::Start {
                    success: false,
                    error: Some(e.to_string()),
                },
            },
            // Stopping an idle engine is not a failure
            Command::Stop => Reply::Stop {
                success: true,
                stopped: self.automation.stop().await,
            },
            Command::GetStatus => Reply::Status {
                status: self.automation.status(),
            },
            Command::GetCart => Reply::Cart {
                cart: self.automation.snapshot().await,
            },
            Command::Reset => match self.automation.reset().await {
                Ok(()) => Reply::Reset {
                    success: true,
                    error: None,
                },
                Err(e) => Reply::Reset {
                    success: false,
                    error: Some(e.to_string()),
                },
            },
        }
    }

    /// Serve a single link until its peer goes away
    #[instrument(level = "debug", skip_all)]
    pub async fn serve(&self, mut link: Link) {
        let mut events = self.automation.subscribe();
        loop {
            tokio::select! {
                frame = link.recv() => match frame {
                    Some(Frame::Request { id, command }) => {
                        let reply = self.handle(command).await;
                        if link.send(Frame::Reply { id, reply }).is_err() {
                            break;
                        }
                    }
                    Some(other) => warn!(?other, "engine ignoring non-request frame"),
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        if link.send(Frame::Event { event }).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "host fell behind; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("control link closed");
    }

    /// Spawn a server task on one end of an in-process pair and return the other
    pub fn connect_in_process(&self) -> Link {
        let (host, engine) = Link::pair();
        let server = self.clone();
        tokio::spawn(async move { server.serve(engine).await });
        host
    }

    /// Accept WebSocket hosts on `addr`; each connection gets its own link
    pub async fn listen(
        self,
        addr: &str,
    ) -> Result<(SocketAddr, JoinHandle<()>), AutomationError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Control server listening on ws://{}", local);

        let handle = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("ws accept error: {}", e);
                        continue;
                    }
                };
                let server = self.clone();
                tokio::spawn(async move {
                    let ws = match accept_async(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("ws handshake error: {}", e);
                            return;
                        }
                    };
                    info!(%peer, "host connected");
                    server.serve(ws_link(ws)).await;
                    info!(%peer, "host disconnected");
                });
            }
        });
        Ok((local, handle))
    }
}

/// Host side of the channel.
///
/// Every request carries a timeout; a peer that is gone surfaces as
/// [`ChannelError::Unreachable`], a peer that is silent as
/// [`ChannelError::Timeout`].
pub struct ControlClient {
    outgoing: mpsc::UnboundedSender<Frame>,
    pending: Pending,
    events: broadcast::Sender<Event>,
    terminal: Arc<watch::Sender<Option<Event>>>,
    closed: CancellationToken,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl ControlClient {
    pub fn new(link: Link) -> Self {
        let Link { tx, rx } = link;
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (terminal, _) = watch::channel(None);
        let terminal = Arc::new(terminal);
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            rx,
            pending.clone(),
            events.clone(),
            terminal.clone(),
            closed.clone(),
        ));

        Self {
            outgoing: tx,
            pending,
            events,
            terminal,
            closed,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            reader,
        }
    }

    /// Connect to a WebSocket engine. `timeout` bounds the handshake and
    /// becomes the per-request timeout of the returned client.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ChannelError> {
        Ok(Self::new(connect(url, timeout).await?).with_timeout(timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Events pushed by the engine from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Send a command and wait for its reply, bounded by the client timeout
    #[instrument(level = "debug", skip(self, command), fields(command = command.name()))]
    pub async fn request(&self, command: Command) -> Result<Reply, ChannelError> {
        if self.closed.is_cancelled() {
            return Err(ChannelError::Unreachable("control link is closed".into()));
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        // The reader may have shut down between the check above and the insert.
        if self.closed.is_cancelled() {
            self.pending.lock().await.remove(&id);
            return Err(ChannelError::Unreachable("control link is closed".into()));
        }

        let frame = Frame::Request {
            id: id.clone(),
            command,
        };
        if self.outgoing.send(frame).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ChannelError::Unreachable("engine is not listening".into()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_canceled)) => Err(ChannelError::Unreachable(
                "control link closed before reply".into(),
            )),
            Err(_elapsed) => {
                self.pending.lock().await.remove(&id);
                warn!(%id, timeout = ?self.timeout, "timed out waiting for reply");
                Err(ChannelError::Timeout(self.timeout))
            }
        }
    }

    /// Ask the engine to begin a run
    pub async fn start(
        &self,
        config: AutomationConfig,
        targets: TargetSet,
    ) -> Result<(), AutomationError> {
        match self.request(Command::Start { config, targets }).await? {
            Reply::Start { success: true, .. } => Ok(()),
            Reply::Start { error, .. } => Err(AutomationError::Rejected(
                error.unwrap_or_else(|| "start refused".into()),
            )),
            other => Err(unexpected(&other).into()),
        }
    }

    /// `Ok(false)` when the engine had nothing to stop
    pub async fn stop(&self) -> Result<bool, ChannelError> {
        match self.request(Command::Stop).await? {
            Reply::Stop { stopped, .. } => Ok(stopped),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn get_status(&self) -> Result<AutomationStatus, ChannelError> {
        match self.request(Command::GetStatus).await? {
            Reply::Status { status } => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    /// Cart of the current or most recent run, even if this host missed it
    pub async fn get_cart(&self) -> Result<CartSnapshot, ChannelError> {
        match self.request(Command::GetCart).await? {
            Reply::Cart { cart } => Ok(cart),
            other => Err(unexpected(&other)),
        }
    }

    /// Return a finished engine to idle; refused while a run is in progress
    pub async fn reset(&self) -> Result<(), AutomationError> {
        match self.request(Command::Reset).await? {
            Reply::Reset { success: true, .. } => Ok(()),
            Reply::Reset { error, .. } => Err(AutomationError::Rejected(
                error.unwrap_or_else(|| "reset refused".into()),
            )),
            other => Err(unexpected(&other).into()),
        }
    }

    /// Resolve on the terminal event (`complete` or `error`) of the run
    /// most recently started through this client, or of the last run seen
    /// if none was started here.
    pub async fn wait_for_terminal(&self) -> Result<Event, ChannelError> {
        let mut rx = self.terminal.subscribe();
        tokio::select! {
            biased;
            seen = rx.wait_for(Option::is_some) => match seen {
                Ok(event) => event.clone().ok_or(ChannelError::Closed),
                Err(_) => Err(ChannelError::Closed),
            },
            _ = self.closed.cancelled() => Err(ChannelError::Closed),
        }
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn unexpected(reply: &Reply) -> ChannelError {
    match reply {
        Reply::Rejected { error } => ChannelError::Protocol(format!("engine rejected request: {error}")),
        other => ChannelError::Protocol(format!("unexpected reply: {other:?}")),
    }
}

async fn read_loop(
    mut rx: mpsc::UnboundedReceiver<Frame>,
    pending: Pending,
    events: broadcast::Sender<Event>,
    terminal: Arc<watch::Sender<Option<Event>>>,
    closed: CancellationToken,
) {
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Reply { id, reply } => match pending.lock().await.remove(&id) {
                Some(tx) => {
                    // Frames arrive in order, so the accepted run's events
                    // all follow this reply.
                    if matches!(reply, Reply::Start { success: true, .. }) {
                        terminal.send_replace(None);
                    }
                    let _ = tx.send(reply);
                }
                None => debug!(%id, "reply for unknown or expired request"),
            },
            Frame::Event { event } => {
                if event.is_terminal() {
                    terminal.send_replace(Some(event.clone()));
                }
                let _ = events.send(event);
            }
            Frame::Request { id, .. } => warn!(%id, "host ignoring request frame"),
        }
    }
    closed.cancel();
    // Dropping the senders wakes every in-flight request
    pending.lock().await.clear();
    debug!("control link reader finished");
}
