//! WebSocket Relay Sessions
//!
//! Each browser connection is one session. The session loop reads `message`
//! events one at a time, hands each to the shared dispatcher, and writes back
//! exactly one `response` or `error` event before reading the next frame.

pub mod session;

pub use session::ws_handler;
