//! WebSocket Session Management
//!
//! This module contains the real-time side of the server. It is structured
//! into submodules:
//!
//! - `protocol`: the JSON message format exchanged with the browser client.
//! - `error`: how failures are scoped and reported to the client.
//! - `registry`: the in-memory table of live sessions and their teardown.
//! - `session`: the connection lifecycle and the per-message dispatcher.
//! - `monitor`: the cancellable periodic vision summaries.
//! - `relay`: one streamed query/response exchange.

pub mod error;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;

pub use session::ws_handler;
