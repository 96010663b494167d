//! WorldSense API Library Crate
//!
//! This library contains the session server: configuration, application
//! state, the HTTP handlers, the WebSocket session machinery and routing.
//! The `api` binary is a thin wrapper around it.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;

#[cfg(test)]
mod testing;
