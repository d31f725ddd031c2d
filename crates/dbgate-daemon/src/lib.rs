//! dbgate daemon library
//!
//! Bridges HTTP callers to one long-lived interactive database engine:
//! - Engine supervision with coalesced restarts
//! - Prompt-framed command channel with an inactivity timeout
//! - FIFO request queue guaranteeing one command in flight
//! - HTTP gateway (`/execute`, `/health`)

pub mod engine;
pub mod gateway;
pub mod queue;
pub mod server;

pub use gateway::{Gateway, Health};
