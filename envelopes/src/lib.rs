//! Envelope model and JSON codec for the daemon RPC socket.
//!
//! This crate owns the wire representation shared by the client runtime and
//! any test server. Every frame is one JSON document carrying a `type` tag;
//! payloads stay flexible (`serde_json::Value`) so new methods never need a
//! codec change.
//!
//! LEGACY FRAMES
//! =============
//! Older daemons pushed bare `{type, payload}` frames for three event kinds
//! plus a heartbeat. [`decode`] maps those onto the current channel names so
//! callers only ever see [`ServerEnvelope`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Invalid JSON was received by the daemon.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request envelope.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal daemon error.
pub const INTERNAL_ERROR: i32 = -32603;

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame text is not JSON at all.
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// The frame is JSON but matches neither the envelope nor the legacy shape.
    #[error("unrecognized envelope: {0}")]
    Envelope(#[source] serde_json::Error),
}

/// Error returned by [`encode`].
#[derive(Debug, thiserror::Error)]
#[error("envelope could not be serialized: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Error returned when parsing a [`Channel`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

// =============================================================================
// CHANNEL
// =============================================================================

/// Broadcast topic a client can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Modifier, lock, and layer snapshots.
    DaemonState,
    /// Individual key press/release events.
    Events,
    /// Processing latency statistics.
    Latency,
}

impl Channel {
    /// Every channel, in wire-name order.
    pub const ALL: [Channel; 3] = [Channel::DaemonState, Channel::Events, Channel::Latency];

    /// Wire name of the channel.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DaemonState => "daemon-state",
            Self::Events => "events",
            Self::Latency => "latency",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_owned()))
    }
}

// =============================================================================
// ENVELOPES
// =============================================================================

/// Frames sent from the client to the daemon.
///
/// Every variant carries an `id`. Only `query`/`command` ids are correlated
/// to a response; `subscribe`/`unsubscribe` are one-way.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEnvelope {
    /// Read-only request.
    Query {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    /// State-modifying request.
    Command {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    /// Start receiving events on a channel.
    Subscribe { id: String, channel: Channel },
    /// Stop receiving events on a channel.
    Unsubscribe { id: String, channel: Channel },
}

impl ClientEnvelope {
    /// Correlation id of the envelope.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Query { id, .. }
            | Self::Command { id, .. }
            | Self::Subscribe { id, .. }
            | Self::Unsubscribe { id, .. } => id,
        }
    }
}

/// Frames sent from the daemon to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEnvelope {
    /// Reply to a query or command. A missing `error` means success.
    Response {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    /// Broadcast on a channel.
    Event { channel: Channel, data: Value },
    /// Handshake sent once per socket after it opens.
    Connected { version: String, timestamp: u64 },
}

impl ServerEnvelope {
    /// Short tag name, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Response { .. } => "response",
            Self::Event { .. } => "event",
            Self::Connected { .. } => "connected",
        }
    }
}

/// Error body carried by a failed response, following JSON-RPC 2.0 codes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a client envelope as one text frame.
///
/// # Errors
///
/// Returns [`EncodeError`] if serialization fails; no partial frame is
/// produced.
pub fn encode(envelope: &ClientEnvelope) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for frames that are recognized but carry nothing for
/// the application (the legacy heartbeat).
///
/// # Errors
///
/// Returns [`DecodeError::Json`] when the text is not JSON and
/// [`DecodeError::Envelope`] when it matches no known shape.
pub fn decode(text: &str) -> Result<Option<ServerEnvelope>, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;

    match ServerEnvelope::deserialize(&value) {
        Ok(envelope) => Ok(Some(envelope)),
        Err(envelope_err) => match LegacyFrame::deserialize(&value) {
            Ok(legacy) => Ok(legacy.into_envelope()),
            Err(_) => Err(DecodeError::Envelope(envelope_err)),
        },
    }
}

#[derive(Deserialize)]
struct LegacyFrame {
    #[serde(rename = "type")]
    kind: LegacyKind,
    payload: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LegacyKind {
    Latency,
    State,
    Event,
    Heartbeat,
}

impl LegacyFrame {
    fn into_envelope(self) -> Option<ServerEnvelope> {
        let channel = match self.kind {
            LegacyKind::Heartbeat => return None,
            LegacyKind::Latency => Channel::Latency,
            LegacyKind::State => Channel::DaemonState,
            LegacyKind::Event => Channel::Events,
        };
        Some(ServerEnvelope::Event { channel, data: self.payload })
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
