use thiserror::Error;

use crate::graph::GraphError;
use crate::reactive::{FlushError, RenderError};
use crate::task::StormError;
use crate::tree::Hid;
use crate::wire::WireError;

/// Session-fatal failures. Anything surfacing here destroys the session;
/// recoverable conditions (throttled starts, async query errors) never
/// reach this type.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol version mismatch: client {client}, server {server}")]
    VersionMismatch { client: u16, server: u16 },

    #[error("unexpected frame type 0x{0:02x} from client")]
    UnexpectedFrame(u8),

    #[error("event targets unknown hid {0}")]
    UnknownTarget(Hid),

    #[error("no handler named {0:?}")]
    UnknownHandler(String),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("effect storm: {0}")]
    EffectStorm(FlushError),

    #[error("storm breaker: {0}")]
    Storm(#[from] StormError),

    #[error("persisted session blob is corrupt: {0}")]
    CorruptBlob(#[from] rmp_serde::decode::Error),

    #[error("failed to snapshot durable state: {0}")]
    Snapshot(#[from] rmp_serde::encode::Error),
}

impl SessionError {
    /// Wire error code reported to the client before teardown.
    pub fn close_code(&self) -> u16 {
        match self {
            SessionError::Wire(_) | SessionError::UnexpectedFrame(_) => 4000,
            SessionError::VersionMismatch { .. } => 4001,
            SessionError::UnknownTarget(_) | SessionError::UnknownHandler(_) => 4002,
            SessionError::Render(_) | SessionError::Graph(_) => 4003,
            SessionError::EffectStorm(_) | SessionError::Storm(_) => 4004,
            SessionError::CorruptBlob(_) | SessionError::Snapshot(_) => 4005,
        }
    }
}
