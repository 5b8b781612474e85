//! Caller-facing error taxonomy.
//!
//! ERROR HANDLING
//! ==============
//! Only failures that belong to one specific call reach the caller:
//! not-connected, timeout, remote error, and connection-closed. Undecodable
//! frames and responses for unknown ids are operational noise; the dispatch
//! task logs them and keeps going.

use std::time::Duration;

use serde_json::Value;

use crate::connection::{ConnectionError, ConnectionState};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// The transport was not open when the call was issued.
    #[error("not connected (connection is {0})")]
    NotConnected(ConnectionState),
    /// No response arrived within the request timeout.
    #[error("{method} timed out after {}s", .after.as_secs())]
    Timeout { method: String, after: Duration },
    /// The daemon answered with an error body.
    #[error("{message} (code {code})")]
    Remote { code: i32, message: String, data: Option<Value> },
    /// The transport dropped while the call was pending.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    /// The client was shut down before the call settled.
    #[error("client shut down")]
    Shutdown,
    /// The request envelope could not be serialized; nothing was sent.
    #[error("request not encoded: {0}")]
    Encode(String),
    /// The result did not deserialize into the requested type.
    #[error("unexpected result shape: {0}")]
    UnexpectedResult(String),
}

impl RpcError {
    /// Whether re-issuing the same call may succeed.
    ///
    /// Remote errors are terminal: the daemon saw the call and refused it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotConnected(_) | Self::Timeout { .. } | Self::ConnectionClosed)
    }
}

impl From<envelopes::RemoteError> for RpcError {
    fn from(err: envelopes::RemoteError) -> Self {
        Self::Remote { code: err.code, message: err.message, data: err.data }
    }
}

impl From<envelopes::EncodeError> for RpcError {
    fn from(err: envelopes::EncodeError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<ConnectionError> for RpcError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::NotOpen(state) => Self::NotConnected(state),
        }
    }
}
