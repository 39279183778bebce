//! Binary Wire Protocol
//!
//! The framing and message layouts shared by the server and the client
//! runtime. The format is hand-written rather than serde-derived because
//! its byte layout is part of the protocol contract: varint-heavy, one
//! frame per websocket binary message, and decodable with bounded
//! allocation no matter what the peer sends.
//!
//! # Frame layout
//!
//! ```text
//! [type: u8] [flags: u8] [payload_len: varint] [payload...]
//! ```
//!
//! See [`frame`] for the message families and [`codec`] for payload
//! layouts and limits. Decode failures are typed [`WireError`]s and are
//! always fatal for the connection.

pub mod codec;
mod error;
mod frame;
pub mod varint;

pub use codec::{decode, encode, MAX_BLOB_LEN, MAX_NODE_DEPTH, MAX_STRING_LEN};
pub use error::WireError;
pub use frame::{
    EventPayload, Message, FLAG_FULL, FRAME_CLIENT_HELLO, FRAME_CLOSE, FRAME_ERROR, FRAME_EVENT,
    FRAME_PATCH_BATCH, FRAME_PING, FRAME_PONG, FRAME_RESYNC, FRAME_SERVER_HELLO, PROTOCOL_VERSION,
};
