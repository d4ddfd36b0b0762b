//! Empath Client
//!
//! The client half of the relay's transport channel: a WebSocket connection
//! that carries `message` events to the relay, delivers `response` and
//! `error` events back, and reconnects on its own with a bounded,
//! fixed-delay policy.

mod client;
pub mod policy;

pub use client::{ChannelError, ChannelEvent, ConnectionState, RelayClient};
pub use policy::{ClientConfig, ReconnectPolicy};
