//! Typed error hierarchy for the ensemble client.
//!
//! Two enums cover the two failure surfaces:
//! - `ProtocolError` — a single frame that cannot be decoded
//! - `ClientError` — connection-manager lifecycle failures
//!
//! The orchestrator server reports failures through `anyhow` at its edges;
//! it has no enum of its own.

use thiserror::Error;

/// A downstream frame that could not be decoded into an event.
///
/// Protocol errors are always scoped to one frame: the frame is dropped and
/// logged, and neither the connection nor the accumulated display state is
/// affected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame has no string \"type\" discriminator")]
    MissingType,

    #[error("malformed \"{event_type}\" payload: {source}")]
    InvalidPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the connection manager's user-facing operations.
///
/// Transport-level failures (refused connections, dropped sockets) never
/// appear here — they surface as `ConnectionState` transitions instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to encode outgoing message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection task is no longer running")]
    ConnectionGone,
}
