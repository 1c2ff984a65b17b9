//! Shared building blocks for the release manager relay.
//!
//! The session manager, the orchestrator workers and the terminal chat client
//! all speak the types defined here: the client WebSocket frames, the
//! request/response contracts carried over the broker, and the transcript
//! model a chat client reconciles inbound frames into.

pub mod broker;
pub mod cache;
pub mod config;
pub mod contracts;
pub mod endpoint;
pub mod error;
pub mod transcript;

pub use error::{RelayError, Result};
