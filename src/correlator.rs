//! Request correlator: pairs each query/command with its response.
//!
//! DESIGN
//! ======
//! One map of pending requests keyed by a v4 UUID, so ids never repeat for
//! the life of the process, across reconnects included. Every pending entry
//! owns a timer task that, when it fires, only posts the id back to the
//! dispatch task. The dispatch task then calls [`Correlator::expire`], which
//! does nothing if a response or a close already removed the entry.
//! Whichever of response, timeout, or close removes the entry first is the
//! only one that settles it.

use std::collections::HashMap;
use std::time::Duration;

use envelopes::{ClientEnvelope, RemoteError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::FrameSink;
use crate::error::RpcError;

/// Where the outcome of one request is delivered.
pub type Reply = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    Command,
}

struct Pending {
    method: String,
    reply: Reply,
    timer: JoinHandle<()>,
}

pub struct Correlator {
    timeout: Duration,
    pending: HashMap<String, Pending>,
    expired: mpsc::UnboundedSender<String>,
}

impl Correlator {
    /// Create an empty correlator.
    ///
    /// The receiver yields the id of every request whose timer fired; feed
    /// each one back into [`Correlator::expire`].
    #[must_use]
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (expired, expired_rx) = mpsc::unbounded_channel();
        (Self { timeout, pending: HashMap::new(), expired }, expired_rx)
    }

    /// Register and send one request.
    ///
    /// Returns the id on success. On refusal (link not open, or the send
    /// failed) the error has already been delivered through `reply`, nothing
    /// stays pending, and `None` is returned.
    pub fn issue(
        &mut self,
        link: &dyn FrameSink,
        kind: RequestKind,
        method: String,
        params: Option<Value>,
        reply: Reply,
    ) -> Option<String> {
        if !link.is_open() {
            deliver(reply, Err(RpcError::NotConnected(link.state())));
            return None;
        }

        let id = Uuid::new_v4().to_string();
        let envelope = match kind {
            RequestKind::Query => ClientEnvelope::Query { id: id.clone(), method: method.clone(), params },
            RequestKind::Command => ClientEnvelope::Command { id: id.clone(), method: method.clone(), params },
        };
        let frame = match envelopes::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(id = %id, method = %method, error = %e, "rpc: request not encoded");
                deliver(reply, Err(e.into()));
                return None;
            }
        };

        let timer = self.start_timer(id.clone());
        self.pending.insert(id.clone(), Pending { method, reply, timer });

        if let Err(e) = link.send(frame) {
            if let Some(pending) = self.pending.remove(&id) {
                pending.timer.abort();
                warn!(id = %id, method = %pending.method, error = %e, "rpc: send failed");
                deliver(pending.reply, Err(e.into()));
            }
            return None;
        }

        debug!(id = %id, ?kind, "rpc: request sent");
        Some(id)
    }

    fn start_timer(&self, id: String) -> JoinHandle<()> {
        let expired = self.expired.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if expired.send(id).is_err() {
                trace!("rpc: timer fired after dispatch stopped");
            }
        })
    }

    /// Settle a request from its response envelope.
    ///
    /// An `error` body rejects, otherwise the request resolves with `result`
    /// (`null` when absent). Returns `false` for an id with nothing pending.
    pub fn settle(&mut self, id: &str, result: Option<Value>, error: Option<RemoteError>) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            warn!(id, "rpc: response for unknown id dropped");
            return false;
        };
        pending.timer.abort();

        let outcome = match error {
            Some(err) => {
                debug!(id, method = %pending.method, code = err.code, "rpc: remote error");
                Err(RpcError::from(err))
            }
            None => Ok(result.unwrap_or(Value::Null)),
        };
        deliver(pending.reply, outcome);
        true
    }

    /// Reject a request whose timer fired. Returns `false` if it already settled.
    pub fn expire(&mut self, id: &str) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            trace!(id, "rpc: stale timer ignored");
            return false;
        };
        warn!(id, method = %pending.method, timeout_secs = self.timeout.as_secs(), "rpc: request timed out");
        deliver(pending.reply, Err(RpcError::Timeout { method: pending.method, after: self.timeout }));
        true
    }

    /// Reject everything pending with `reason` and empty the map.
    pub fn reject_all(&mut self, reason: &RpcError) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            pending.timer.abort();
            deliver(pending.reply, Err(reason.clone()));
        }
        if count > 0 {
            debug!(count, reason = %reason, "rpc: pending requests rejected");
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

fn deliver(reply: Reply, outcome: Result<Value, RpcError>) {
    if reply.send(outcome).is_err() {
        trace!("rpc: caller gone before settlement");
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
