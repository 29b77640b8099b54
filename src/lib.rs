//! SMS Relay - forward incoming text messages to webhook endpoints
//!
//! Resolves which SIM slot received a message, looks up that slot's webhook
//! configuration, delivers the message as JSON, and records per-slot
//! statistics and an error history.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod line;
pub mod store;
pub mod webhook;

pub use error::{Error, Result};
