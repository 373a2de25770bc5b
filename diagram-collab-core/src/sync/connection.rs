//! Resilient WebSocket connection to the room's sync endpoint.
//!
//! One background task owns the socket. It reports [`ConnectionEvent`]s in
//! delivery order and reconnects after a fixed delay whenever the socket
//! closes for any reason other than an explicit [`ConnectionManager::teardown`].
//! There is no backoff growth and no retry limit.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::error::TransportError;
use super::protocol::OutboundMessage;
use super::timer::Timer;

/// Fixed wait between a close and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Closed; a reconnect is scheduled
    Closed,
    /// Explicitly torn down; no reconnect will happen
    TornDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::TornDown => "torn down",
        };
        f.write_str(label)
    }
}

/// Lifecycle and inbound traffic of the managed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    /// One inbound text frame
    Message(String),
    Closed,
}

/// Send side of the live connection.
///
/// Sending while no connection is open drops the message. Nothing is
/// queued for a later connection: the `init` that follows a reconnect
/// supersedes any interim edit.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Opens a fresh frame channel for a newly opened socket. Frames sent
    /// from now on arrive on the returned receiver until [`Outbox::detach`].
    pub fn attach(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.slot() = Some(tx);
        rx
    }

    /// Marks the connection closed. Frames not yet written are dropped
    /// together with the receiver.
    pub fn detach(&self) {
        *self.slot() = None;
    }

    pub fn is_open(&self) -> bool {
        self.slot().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Hands `message` to the live socket. Returns false if it was
    /// suppressed because no connection is open.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, kind = message.kind(), "dropping unencodable message");
                return false;
            }
        };

        let slot = self.slot();
        match slot.as_ref() {
            Some(tx) if tx.send(frame).is_ok() => true,
            _ => {
                debug!(kind = message.kind(), "send suppressed: connection not open");
                false
            }
        }
    }
}

/// Owner of the background connection task.
///
/// Dropping the manager tears the connection down.
#[derive(Debug)]
pub struct ConnectionManager {
    endpoint: String,
    outbox: Outbox,
    state: watch::Receiver<ConnectionState>,
    teardown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Starts connecting to `endpoint` and returns the manager together
    /// with the stream of connection events.
    pub fn connect(
        endpoint: impl Into<String>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let endpoint = endpoint.into();
        let outbox = Outbox::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (teardown_tx, teardown_rx) = watch::channel(false);

        let task = tokio::spawn(run_connection(
            endpoint.clone(),
            reconnect_delay,
            outbox.clone(),
            events_tx,
            state_tx,
            teardown_rx,
        ));

        let manager = Self {
            endpoint,
            outbox,
            state: state_rx,
            teardown: teardown_tx,
            task: Some(task),
        };
        (manager, events_rx)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Closes the connection for good, cancelling any scheduled reconnect.
    pub fn teardown(&self) {
        self.teardown.send_replace(true);
    }

    /// Tears down and waits for the background task to finish.
    pub async fn shutdown(mut self) {
        self.teardown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "connection task ended abnormally");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown.send_replace(true);
    }
}

async fn run_connection(
    endpoint: String,
    reconnect_delay: Duration,
    outbox: Outbox,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    mut teardown: watch::Receiver<bool>,
) {
    let mut reconnect = Timer::new();

    loop {
        if *teardown.borrow() {
            break;
        }
        state.send_replace(ConnectionState::Connecting);

        let attempt = tokio::select! {
            result = connect_async(endpoint.as_str()) => result,
            _ = teardown.changed() => break,
        };

        match attempt {
            Ok((socket, _)) => {
                info!(endpoint = %endpoint, "WebSocket connected");
                let frames = outbox.attach();
                state.send_replace(ConnectionState::Open);
                if events.send(ConnectionEvent::Opened).is_err() {
                    break;
                }

                let torn_down = pump(socket, frames, &events, &mut teardown).await;
                outbox.detach();
                state.send_replace(ConnectionState::Closed);
                let _ = events.send(ConnectionEvent::Closed);
                if torn_down {
                    break;
                }
            }
            Err(e) => {
                let error = TransportError::Connect(e.to_string());
                warn!(endpoint = %endpoint, error = %error, "connection attempt failed");
                state.send_replace(ConnectionState::Closed);
            }
        }

        info!(
            delay_ms = reconnect_delay.as_millis() as u64,
            "WebSocket closed, reconnect scheduled"
        );
        reconnect.schedule(reconnect_delay);
        tokio::select! {
            _ = reconnect.fired() => {}
            _ = teardown.changed() => break,
        }
    }

    outbox.detach();
    state.send_replace(ConnectionState::TornDown);
    debug!(endpoint = %endpoint, "connection torn down");
}

/// Moves frames both ways until the socket closes. Returns true if the
/// close was an explicit teardown or nobody listens to events anymore.
async fn pump(
    socket: Socket,
    mut frames: mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    teardown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    return false;
                };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    let error = TransportError::WebSocket(e.to_string());
                    warn!(error = %error, "send failed");
                    return false;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if events.send(ConnectionEvent::Message(text.as_str().to_owned())).is_err() {
                        let _ = sink.send(Message::Close(None)).await;
                        return true;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return false,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let error = TransportError::WebSocket(e.to_string());
                    warn!(error = %error, "connection dropped");
                    return false;
                }
            },
            _ = teardown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return true;
            }
        }
    }
}
