//! Unified client facade.
//!
//! DESIGN
//! ======
//! [`Client`] is a cheap, cloneable front for one dispatch task. That task
//! exclusively owns the [`Correlator`], the [`Registry`] and the handshake
//! flag, and handles one input at a time.
//!
//! Connection events (open, inbound frame, close) and facade commands
//! (request, subscribe, unsubscribe, shutdown) share one queue, so they are
//! applied in the order they happened. A listener added before an event
//! arrives sees it; one removed before does not. Request timers arrive on a
//! second queue.
//!
//! Each input runs to completion before the next, so no state is shared or
//! locked.
//!
//! LIFECYCLE
//! =========
//! `shutdown()` or dropping the last `Client` clone tears down: one
//! `unsubscribe` per active channel (if open), pending requests rejected
//! with [`RpcError::Shutdown`], transport closed. [`Subscription`] handles
//! hold only a weak sender and never keep the client alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use envelopes::{Channel, ServerEnvelope};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, FrameSink};
use crate::correlator::{Correlator, Reply, RequestKind};
use crate::error::RpcError;
use crate::registry::{Handler, ListenerId, Registry};

/// What the daemon reported in its `connected` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub version: String,
    /// Daemon clock at handshake time, in the units it reports.
    pub timestamp: u64,
}

pub(crate) enum Command {
    Request { kind: RequestKind, method: String, params: Option<Value>, reply: Reply },
    Subscribe { channel: Channel, id: ListenerId, handler: Handler },
    Remove { channel: Channel, id: ListenerId },
    Unsubscribe { channel: Channel },
    PendingCount { reply: oneshot::Sender<usize> },
    ListenerCount { channel: Channel, reply: oneshot::Sender<usize> },
    Shutdown { done: oneshot::Sender<()> },
    /// The last `Client` clone was dropped.
    Release,
}

/// One entry on the dispatch queue.
pub(crate) enum Input {
    Connection(ConnectionEvent),
    Command(Command),
}

impl From<ConnectionEvent> for Input {
    fn from(event: ConnectionEvent) -> Self {
        Self::Connection(event)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    inputs: mpsc::UnboundedSender<Input>,
    link: Arc<dyn FrameSink>,
    handshake: watch::Receiver<Option<ServerInfo>>,
    next_listener: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.inputs.send(Input::Command(Command::Release)).is_err() {
            trace!("client: dropped after dispatch stopped");
        }
    }
}

impl Client {
    /// Start the connection manager and the dispatch task for `config`.
    ///
    /// Returns at once; the socket connects in the background. Must be called
    /// from within a tokio runtime.
    #[must_use]
    pub fn connect(config: ClientConfig) -> Self {
        info!(url = %config.url, "client: connecting");
        let (inputs, inputs_rx) = mpsc::unbounded_channel();
        let handle = ConnectionManager::spawn_into(config.url.clone(), config.reconnect, inputs.clone());
        Self::from_parts(Arc::new(handle), inputs, inputs_rx, &config)
    }

    /// Build a client over any [`FrameSink`] whose events are fed into
    /// `inputs`.
    pub(crate) fn from_parts(
        link: Arc<dyn FrameSink>,
        inputs: mpsc::UnboundedSender<Input>,
        inputs_rx: mpsc::UnboundedReceiver<Input>,
        config: &ClientConfig,
    ) -> Self {
        let (handshake_tx, handshake) = watch::channel(None);
        let (correlator, expired) = Correlator::new(config.request_timeout);

        let driver = Driver {
            link: Arc::clone(&link),
            correlator,
            registry: Registry::new(),
            handshake: handshake_tx,
            resubscribe: config.resubscribe_on_handshake,
        };
        tokio::spawn(driver.run(inputs_rx, expired));

        Self { inner: Arc::new(Inner { inputs, link, handshake, next_listener: AtomicU64::new(1) }) }
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Issue a read-only call and wait for its result.
    ///
    /// # Errors
    ///
    /// [`RpcError::NotConnected`] at once if the transport is not open;
    /// otherwise whichever of remote error, timeout, or connection-closed
    /// settles the call.
    pub async fn query(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.request(RequestKind::Query, method, params).await
    }

    /// Issue a state-changing call and wait for its result.
    ///
    /// # Errors
    ///
    /// Same as [`Client::query`].
    pub async fn command(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.request(RequestKind::Command, method, params).await
    }

    /// [`Client::query`], deserializing the result into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`Client::query`], plus [`RpcError::UnexpectedResult`] when
    /// the result does not fit `T`.
    pub async fn query_as<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, RpcError> {
        decode_result(self.query(method, params).await?)
    }

    /// [`Client::command`], deserializing the result into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`Client::query_as`].
    pub async fn command_as<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, RpcError> {
        decode_result(self.command(method, params).await?)
    }

    async fn request(&self, kind: RequestKind, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let state = self.inner.link.state();
        if state != ConnectionState::Open {
            return Err(RpcError::NotConnected(state));
        }

        let (reply, settled) = oneshot::channel();
        let command = Command::Request { kind, method: method.to_owned(), params, reply };
        if self.inner.inputs.send(Input::Command(command)).is_err() {
            return Err(RpcError::Shutdown);
        }
        settled.await.map_err(|_| RpcError::Shutdown)?
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register `handler` for every event on `channel`.
    ///
    /// The listener is recorded even while disconnected; a `subscribe`
    /// frame goes out only when this is the channel's first listener and
    /// the transport is open.
    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.post(Command::Subscribe { channel, id, handler: Arc::new(handler) });
        Subscription { channel, id, inputs: self.inner.inputs.downgrade() }
    }

    /// [`Client::subscribe`] with each payload deserialized into `T`.
    ///
    /// Payloads that do not fit `T` are logged and skipped for this listener.
    pub fn subscribe_as<T, F>(&self, channel: Channel, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(channel, move |data: &Value| match <T as serde::Deserialize>::deserialize(data) {
            Ok(payload) => handler(payload),
            Err(e) => warn!(%channel, error = %e, "client: event payload skipped"),
        })
    }

    /// Remove every listener on `channel`, sending one `unsubscribe` if open.
    pub fn unsubscribe(&self, channel: Channel) {
        self.post(Command::Unsubscribe { channel });
    }

    fn post(&self, command: Command) {
        if self.inner.inputs.send(Input::Command(command)).is_err() {
            debug!("client: command after shutdown ignored");
        }
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.link.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.link.is_open()
    }

    /// Whether the handshake arrived on the current connection.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.handshake.borrow().is_some()
    }

    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.handshake.borrow().clone()
    }

    /// Wait until the handshake arrives.
    ///
    /// # Errors
    ///
    /// [`RpcError::Timeout`] if it does not arrive within `timeout`;
    /// [`RpcError::Shutdown`] if the client stops first.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<ServerInfo, RpcError> {
        let mut handshake = self.inner.handshake.clone();
        let waited = tokio::time::timeout(timeout, async move {
            handshake.wait_for(Option::is_some).await.map(|info| (*info).clone())
        })
        .await;

        match waited {
            Err(_) => Err(RpcError::Timeout { method: "handshake".to_owned(), after: timeout }),
            Ok(Err(_)) => Err(RpcError::Shutdown),
            Ok(Ok(info)) => info.ok_or(RpcError::Shutdown),
        }
    }

    /// Number of requests awaiting settlement.
    pub async fn pending_requests(&self) -> usize {
        let (reply, count) = oneshot::channel();
        self.post(Command::PendingCount { reply });
        count.await.unwrap_or(0)
    }

    /// Number of listeners registered on `channel`.
    pub async fn listener_count(&self, channel: Channel) -> usize {
        let (reply, count) = oneshot::channel();
        self.post(Command::ListenerCount { channel, reply });
        count.await.unwrap_or(0)
    }

    /// Tear down subscriptions, reject pending requests, close the transport.
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self.inner.inputs.send(Input::Command(Command::Shutdown { done })).is_err() {
            return;
        }
        if finished.await.is_err() {
            trace!("client: dispatch stopped before acknowledging shutdown");
        }
    }
}

fn decode_result<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::UnexpectedResult(e.to_string()))
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// One registered listener. Dropping it leaves the listener in place.
pub struct Subscription {
    channel: Channel,
    id: ListenerId,
    inputs: mpsc::WeakUnboundedSender<Input>,
}

impl Subscription {
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Remove this listener; the last one off a channel sends `unsubscribe`.
    pub fn unsubscribe(self) {
        let Some(inputs) = self.inputs.upgrade() else {
            return;
        };
        if inputs.send(Input::Command(Command::Remove { channel: self.channel, id: self.id })).is_err() {
            trace!(channel = %self.channel, "client: unsubscribe after shutdown ignored");
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

struct Driver {
    link: Arc<dyn FrameSink>,
    correlator: Correlator,
    registry: Registry,
    handshake: watch::Sender<Option<ServerInfo>>,
    resubscribe: bool,
}

impl Driver {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<Input>, mut expired: mpsc::UnboundedReceiver<String>) {
        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(Input::Connection(event)) => self.on_connection(event),
                    Some(Input::Command(Command::Shutdown { done })) => {
                        self.teardown();
                        if done.send(()).is_err() {
                            trace!("client: shutdown caller gone");
                        }
                        break;
                    }
                    Some(Input::Command(Command::Release)) | None => {
                        self.teardown();
                        break;
                    }
                    Some(Input::Command(command)) => self.on_command(command),
                },
                Some(id) = expired.recv() => {
                    self.correlator.expire(&id);
                }
            }
        }
        debug!("client: dispatch stopped");
    }

    fn on_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => debug!("client: transport open, awaiting handshake"),
            ConnectionEvent::Frame(text) => match envelopes::decode(&text) {
                Ok(Some(envelope)) => self.on_envelope(envelope),
                Ok(None) => trace!("client: heartbeat"),
                Err(e) => warn!(error = %e, len = text.len(), "client: undecodable frame dropped"),
            },
            ConnectionEvent::Closed => {
                let rejected = self.correlator.reject_all(&RpcError::ConnectionClosed);
                self.handshake.send_replace(None);
                info!(rejected, "client: transport closed");
            }
        }
    }

    fn on_envelope(&mut self, envelope: ServerEnvelope) {
        match envelope {
            ServerEnvelope::Response { id, result, error } => {
                self.correlator.settle(&id, result, error);
            }
            ServerEnvelope::Event { channel, data } => {
                self.registry.dispatch(channel, &data);
            }
            ServerEnvelope::Connected { version, timestamp } => {
                info!(%version, timestamp, "client: handshake complete");
                self.handshake.send_replace(Some(ServerInfo { version, timestamp }));
                if self.resubscribe {
                    let sent = self.registry.resubscribe(self.link.as_ref());
                    debug!(sent, "client: resubscribed after handshake");
                }
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        let link = self.link.as_ref();
        match command {
            Command::Request { kind, method, params, reply } => {
                self.correlator.issue(link, kind, method, params, reply);
            }
            Command::Subscribe { channel, id, handler } => {
                self.registry.add(link, channel, id, handler);
            }
            Command::Remove { channel, id } => {
                self.registry.remove(link, channel, id);
            }
            Command::Unsubscribe { channel } => {
                self.registry.clear_channel(link, channel);
            }
            Command::PendingCount { reply } => answer(reply, self.correlator.len()),
            Command::ListenerCount { channel, reply } => answer(reply, self.registry.listener_count(channel)),
            Command::Shutdown { .. } | Command::Release => {}
        }
    }

    fn teardown(&mut self) {
        self.registry.teardown(self.link.as_ref());
        self.correlator.reject_all(&RpcError::Shutdown);
        self.handshake.send_replace(None);
        self.link.close();
        info!("client: shut down");
    }
}

fn answer(reply: oneshot::Sender<usize>, count: usize) {
    if reply.send(count).is_err() {
        trace!("client: introspection caller gone");
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
