//! Provider stream protocol and session coordination
//!
//! Owns the bidirectional event protocol spoken with the speech-to-speech
//! provider, the connector seam that keeps the provider external, and the
//! per-session coordinator that fans provider events out to local consumers.

pub mod protocol;
pub mod provider;
pub mod session;

pub use protocol::{Envelope, Event, InferenceConfiguration, ToolSpec, INTERRUPTED_MARKER};
pub use provider::{LoopbackConnector, LoopbackHandle, ProviderConnector, ProviderSink, ProviderSource};
pub use session::{OutputConsumer, SessionState, StreamEvent, StreamSession, StreamSessionConfig};

use thiserror::Error;

/// Stream-layer errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Provider connection failed: {0}")]
    Connection(String),

    #[error("Timed out connecting to provider after {0}s")]
    ConnectionTimeout(u64),

    #[error("Stream is not active")]
    NotActive,

    #[error("Invalid session state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Failed to send event: {0}")]
    Send(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("An output consumer is already attached to this session")]
    ConsumerConflict,
}
