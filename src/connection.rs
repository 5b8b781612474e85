//! Connection manager: owns the one WebSocket and keeps it alive.
//!
//! LIFECYCLE
//! =========
//! 1. `connecting` → dial the configured URL
//! 2. `open` → install a writer, emit `Opened`, relay text frames upward
//! 3. socket drops → `closed`, emit `Closed`, wait the policy interval, retry
//! 4. `close()` → `closing`, flush queued frames, send a close frame, stop
//!
//! The attempt counter resets every time a socket opens, so a bounded policy
//! limits consecutive failures, not lifetime reconnects.
//!
//! DESIGN
//! ======
//! Consumers never touch the socket. They see the [`FrameSink`] seam:
//! current state plus a `send` that refuses immediately unless the socket is
//! open. Inbound traffic and lifecycle changes arrive as [`ConnectionEvent`]s
//! on one ordered channel.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::config::ReconnectPolicy;

/// How long to wait for the peer to acknowledge our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// TYPES
// =============================================================================

/// Lifecycle of the underlying socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// Something the socket did, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A new socket finished its opening handshake.
    Opened,
    /// One inbound text frame.
    Frame(String),
    /// The open socket went away.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection is {0}, not open")]
    NotOpen(ConnectionState),
}

/// Outbound half of a connection as seen by the correlator and registry.
pub trait FrameSink: Send + Sync {
    fn state(&self) -> ConnectionState;

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotOpen`] without queuing anything when the
    /// socket is not open.
    fn send(&self, frame: String) -> Result<(), ConnectionError>;

    /// Stop the connection for good. No reconnect follows.
    fn close(&self);
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable handle to a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    /// Present only while a socket is open.
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionHandle {
    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

impl FrameSink for ConnectionHandle {
    fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    fn send(&self, frame: String) -> Result<(), ConnectionError> {
        let writer = self.shared.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.state();
        match writer.as_ref() {
            Some(tx) if state == ConnectionState::Open => tx
                .send(frame)
                .map_err(|_| ConnectionError::NotOpen(ConnectionState::Closed)),
            _ => Err(ConnectionError::NotOpen(state)),
        }
    }

    fn close(&self) {
        self.shared.shutdown.send_replace(true);
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Forwards one event to the consumer; `false` once the consumer is gone.
type Emit = Box<dyn Fn(ConnectionEvent) -> bool + Send + Sync>;

pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    emit: Emit,
}

impl ConnectionManager {
    /// Start dialing `url` on the current tokio runtime.
    ///
    /// Returns the handle used to send and close, plus the ordered stream of
    /// lifecycle events and inbound frames.
    pub fn spawn(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (Self::spawn_into(url, policy, events), events_rx)
    }

    /// Like [`ConnectionManager::spawn`], but events go into a queue the
    /// caller owns, converted to its input type. Whatever else the caller
    /// sends on that queue stays ordered with the connection's events.
    pub fn spawn_into<E>(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<E>,
    ) -> ConnectionHandle
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared { state, writer: Mutex::new(None), shutdown });
        let emit: Emit = Box::new(move |event| events.send(E::from(event)).is_ok());

        let manager = Self { url: url.into(), policy, shared: Arc::clone(&shared), emit };
        tokio::spawn(manager.run());

        ConnectionHandle { shared }
    }

    async fn run(self) {
        let mut shutdown = self.shared.shutdown.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                () = shutdown_requested(&mut shutdown) => break,
            };
            match connected {
                Ok((stream, _)) => {
                    attempt = 0;
                    self.run_socket(stream, &mut shutdown).await;
                }
                Err(e) => warn!(url = %self.url, error = %e, "conn: connect failed"),
            }
            self.set_state(ConnectionState::Closed);

            if *shutdown.borrow() {
                break;
            }
            attempt = attempt.saturating_add(1);
            if !self.policy.should_reconnect(attempt) {
                warn!(url = %self.url, attempt, "conn: reconnect policy exhausted");
                break;
            }
            debug!(url = %self.url, attempt, interval_ms = self.policy.interval.as_millis(), "conn: reconnect scheduled");
            tokio::select! {
                () = tokio::time::sleep(self.policy.interval) => {}
                () = shutdown_requested(&mut shutdown) => break,
            }
        }

        self.set_state(ConnectionState::Closed);
        info!(url = %self.url, "conn: stopped");
    }

    /// Relay frames for one open socket until it drops or shutdown is requested.
    async fn run_socket(&self, stream: WsStream, shutdown: &mut watch::Receiver<bool>) {
        let (mut write, mut read) = stream.split();
        let (tx, mut outbound) = mpsc::unbounded_channel::<String>();

        self.install_writer(Some(tx));
        self.set_state(ConnectionState::Open);
        info!(url = %self.url, "conn: open");
        self.emit(ConnectionEvent::Opened);

        loop {
            tokio::select! {
                biased;

                () = shutdown_requested(shutdown) => {
                    self.set_state(ConnectionState::Closing);
                    self.install_writer(None);
                    while let Ok(frame) = outbound.try_recv() {
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            debug!(error = %e, "conn: flush before close failed");
                            break;
                        }
                    }
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "conn: close frame not sent");
                    }
                    let drained = tokio::time::timeout(CLOSE_GRACE, async {
                        while let Some(Ok(msg)) = read.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    });
                    if drained.await.is_err() {
                        debug!(url = %self.url, "conn: peer did not acknowledge close");
                    }
                    break;
                }
                Some(frame) = outbound.recv() => {
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        warn!(url = %self.url, error = %e, "conn: send failed");
                        break;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.emit(ConnectionEvent::Frame(text.as_str().to_owned())),
                    Some(Ok(Message::Binary(bytes))) => debug!(len = bytes.len(), "conn: ignoring binary frame"),
                    Some(Ok(Message::Close(frame))) => {
                        info!(url = %self.url, ?frame, "conn: closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(url = %self.url, error = %e, "conn: read failed");
                        break;
                    }
                    None => break,
                },
            }
        }

        self.install_writer(None);
        self.set_state(ConnectionState::Closed);
        self.emit(ConnectionEvent::Closed);
    }

    fn install_writer(&self, writer: Option<mpsc::UnboundedSender<String>>) {
        *self.shared.writer.lock().unwrap_or_else(PoisonError::into_inner) = writer;
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                trace!(from = %current, to = %state, "conn: state");
                *current = state;
                true
            }
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        if !(self.emit)(event) {
            trace!("conn: event consumer gone");
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // The sender lives in `Shared`, which the manager itself holds, so the
    // wait only ends once `close()` flips the flag.
    if rx.wait_for(|closed| *closed).await.is_err() {
        trace!("conn: shutdown sender dropped");
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
