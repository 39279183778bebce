//! Frame and Message Types
//!
//! Every frame is `[type: u8] [flags: u8] [payload_len: varint] [payload]`.
//! Payload layouts are defined per message in `codec`. The only flag in use
//! is [`FLAG_FULL`] on a patch batch, marking a full-tree resync where the
//! single patch replaces the root.

use crate::tree::{EventKind, Hid, Patch};

/// Bumped on any incompatible layout change. Carried as fixed big-endian
/// `u16` in both hello messages so a version check never depends on varint
/// decoding.
pub const PROTOCOL_VERSION: u16 = 1;

pub const FRAME_CLIENT_HELLO: u8 = 0x01;
pub const FRAME_SERVER_HELLO: u8 = 0x02;
pub const FRAME_EVENT: u8 = 0x03;
pub const FRAME_PATCH_BATCH: u8 = 0x04;
pub const FRAME_PING: u8 = 0x05;
pub const FRAME_PONG: u8 = 0x06;
pub const FRAME_RESYNC: u8 = 0x07;
pub const FRAME_CLOSE: u8 = 0x08;
pub const FRAME_ERROR: u8 = 0x09;

/// Set on a `PatchBatch` that carries a complete tree after a resync.
pub const FLAG_FULL: u8 = 0b0000_0001;

/// Kind-specific event data. Click, Submit, Focus and Blur carry nothing;
/// the target HID is already in the frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    /// Current value of the input that fired the event.
    Value(String),
    /// Key name for keyboard events.
    Key(String),
    /// Application-defined payload for custom events.
    Json(serde_json::Value),
}

/// One decoded frame.
///
/// `seq` on `Event` and `PatchBatch` is a per-direction counter starting at
/// 1. The receiver checks for gaps; a gap triggers `Resync` rather than any
/// in-codec recovery.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientHello {
        protocol_version: u16,
        route: String,
        resume_token: Option<Vec<u8>>,
    },
    ServerHello {
        protocol_version: u16,
        session_id: u64,
        resumed: bool,
    },
    Event {
        seq: u64,
        kind: EventKind,
        target: Hid,
        payload: EventPayload,
    },
    PatchBatch {
        seq: u64,
        full: bool,
        patches: Vec<Patch>,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
    },
    /// Client asks for a full tree; `last_seq` is the last batch it applied.
    Resync {
        last_seq: u64,
    },
    Close {
        code: u16,
    },
    Error {
        code: u16,
        message: String,
    },
}

impl Message {
    pub fn frame_type(&self) -> u8 {
        match self {
            Message::ClientHello { .. } => FRAME_CLIENT_HELLO,
            Message::ServerHello { .. } => FRAME_SERVER_HELLO,
            Message::Event { .. } => FRAME_EVENT,
            Message::PatchBatch { .. } => FRAME_PATCH_BATCH,
            Message::Ping { .. } => FRAME_PING,
            Message::Pong { .. } => FRAME_PONG,
            Message::Resync { .. } => FRAME_RESYNC,
            Message::Close { .. } => FRAME_CLOSE,
            Message::Error { .. } => FRAME_ERROR,
        }
    }
}
