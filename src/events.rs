//! Typed payloads for the three broadcast channels.
//!
//! Every field defaults when absent so that older daemons, and the legacy
//! frames they send, still deserialize. Use with [`crate::Client::subscribe_as`].

use serde::{Deserialize, Serialize};

/// Payload of the `daemon-state` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonState {
    /// Active modifier ids.
    pub modifiers: Vec<String>,
    /// Active lock ids.
    pub locks: Vec<String>,
    /// Current layer name.
    pub layer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<String>,
}

/// Payload of the `events` channel: one processed key event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyEvent {
    /// Microseconds since the UNIX epoch.
    pub timestamp: u64,
    #[serde(rename = "keyCode")]
    pub key_code: String,
    /// `press` or `release`.
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Input key as captured.
    pub input: String,
    /// Output key after remapping.
    pub output: String,
    /// Processing latency in microseconds.
    pub latency: u64,
}

impl KeyEvent {
    #[must_use]
    pub fn is_press(&self) -> bool {
        self.event_type == "press"
    }
}

/// Payload of the `latency` channel. All values in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyStats {
    pub min: u64,
    pub avg: u64,
    pub max: u64,
    pub p95: u64,
    pub p99: u64,
    pub timestamp: u64,
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
