//! Subscription registry: per-channel listener sets.
//!
//! DESIGN
//! ======
//! The daemon only needs to know whether *anyone* listens on a channel, so
//! control frames go out on the edges: `subscribe` when a set goes from empty
//! to one listener, `unsubscribe` when it drains back to empty. Control
//! frames are one-way. Their id exists for wire symmetry and is never
//! tracked.
//!
//! Listeners added while the link is down are kept locally. Nothing is sent
//! for them when the link comes back unless the caller asks for
//! [`Registry::resubscribe`].
//!
//! ERROR HANDLING
//! ==============
//! A panicking handler is caught and logged; the remaining handlers on the
//! channel still run.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use envelopes::{Channel, ClientEnvelope};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::FrameSink;

/// Callback invoked with each event payload on a channel.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

#[derive(Default)]
pub struct Registry {
    listeners: HashMap<Channel, Vec<(ListenerId, Handler)>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. Sends `subscribe` if it is the channel's first
    /// listener and the link is open; returns whether a frame went out.
    pub fn add(&mut self, link: &dyn FrameSink, channel: Channel, id: ListenerId, handler: Handler) -> bool {
        let set = self.listeners.entry(channel).or_default();
        set.push((id, handler));
        if set.len() == 1 && link.is_open() {
            send_control(link, ClientEnvelope::Subscribe { id: control_id(), channel });
            return true;
        }
        false
    }

    /// Remove one handler. Sends `unsubscribe` if that drained the channel
    /// and the link is open. Returns whether the handler was registered.
    pub fn remove(&mut self, link: &dyn FrameSink, channel: Channel, id: ListenerId) -> bool {
        let Some(set) = self.listeners.get_mut(&channel) else {
            return false;
        };
        let before = set.len();
        set.retain(|(listener, _)| *listener != id);
        if set.len() == before {
            return false;
        }
        if set.is_empty() {
            self.listeners.remove(&channel);
            if link.is_open() {
                send_control(link, ClientEnvelope::Unsubscribe { id: control_id(), channel });
            }
        }
        true
    }

    /// Drop every handler on `channel` and send one `unsubscribe` if the link
    /// is open, however many handlers there were. Returns how many were removed.
    pub fn clear_channel(&mut self, link: &dyn FrameSink, channel: Channel) -> usize {
        let removed = self.listeners.remove(&channel).map_or(0, |set| set.len());
        if link.is_open() {
            send_control(link, ClientEnvelope::Unsubscribe { id: control_id(), channel });
        }
        removed
    }

    /// Run every handler on `channel` with `data`. Returns how many ran
    /// without panicking.
    pub fn dispatch(&self, channel: Channel, data: &Value) -> usize {
        let Some(set) = self.listeners.get(&channel) else {
            debug!(%channel, "sub: event with no listeners");
            return 0;
        };

        let mut delivered = 0;
        for (id, handler) in set {
            match catch_unwind(AssertUnwindSafe(|| handler(data))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    warn!(%channel, listener = id.0, reason = panic_message(payload.as_ref()), "sub: handler panicked");
                }
            }
        }
        delivered
    }

    /// Send one `unsubscribe` per active channel if the link is open, then
    /// forget every handler.
    pub fn teardown(&mut self, link: &dyn FrameSink) {
        if link.is_open() {
            for channel in self.active_channels() {
                send_control(link, ClientEnvelope::Unsubscribe { id: control_id(), channel });
            }
        }
        self.listeners.clear();
    }

    /// Send `subscribe` for every active channel. Returns how many were sent.
    pub fn resubscribe(&self, link: &dyn FrameSink) -> usize {
        if !link.is_open() {
            return 0;
        }
        let channels = self.active_channels();
        for channel in &channels {
            send_control(link, ClientEnvelope::Subscribe { id: control_id(), channel: *channel });
        }
        channels.len()
    }

    /// Channels with at least one listener, in wire order.
    #[must_use]
    pub fn active_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|channel| self.listeners.get(channel).is_some_and(|set| !set.is_empty()))
            .collect()
    }

    #[must_use]
    pub fn listener_count(&self, channel: Channel) -> usize {
        self.listeners.get(&channel).map_or(0, Vec::len)
    }
}

fn control_id() -> String {
    Uuid::new_v4().to_string()
}

fn send_control(link: &dyn FrameSink, envelope: ClientEnvelope) {
    let kind = match &envelope {
        ClientEnvelope::Subscribe { .. } => "subscribe",
        _ => "unsubscribe",
    };
    let id = envelope.id().to_owned();
    let frame = match envelopes::encode(&envelope) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(kind, id, error = %e, "sub: control frame not encoded");
            return;
        }
    };
    match link.send(frame) {
        Ok(()) => debug!(kind, id, "sub: control frame sent"),
        Err(e) => warn!(kind, id, error = %e, "sub: control frame not sent"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
