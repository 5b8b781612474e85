//! # rpc-client
//!
//! Client runtime for the daemon's JSON-over-WebSocket RPC channel.
//!
//! One [`Client`] holds one socket to `/ws-rpc` and multiplexes over it:
//!
//! - correlated `query`/`command` calls, settled by response, timeout, or
//!   transport close
//! - `subscribe`/`unsubscribe` to the broadcast channels in
//!   [`Channel`], fanned out to local listeners
//! - reconnection under a configurable [`ReconnectPolicy`]
//!
//! The wire envelopes live in the `envelopes` crate and are re-exported here.
//!
//! ```no_run
//! # async fn demo() -> Result<(), rpc_client::RpcError> {
//! use rpc_client::{Channel, Client, ClientConfig, methods};
//!
//! let client = Client::connect(ClientConfig::new("ws://127.0.0.1:9867/ws-rpc"));
//! client.wait_ready(std::time::Duration::from_secs(5)).await?;
//!
//! let profiles = client.query(methods::GET_PROFILES, None).await?;
//! println!("{profiles}");
//!
//! let sub = client.subscribe(Channel::Latency, |data| println!("{data}"));
//! sub.unsubscribe();
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod events;
pub mod methods;
pub mod registry;

#[cfg(test)]
#[path = "memory_sink_test.rs"]
mod memory_sink;

pub use client::{Client, ServerInfo, Subscription};
pub use config::{ClientConfig, ConfigError, ReconnectPolicy};
pub use connection::{ConnectionError, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, FrameSink};
pub use envelopes::{Channel, ClientEnvelope, DecodeError, EncodeError, RemoteError, ServerEnvelope};
pub use error::RpcError;
