use thiserror::Error;

/// Protocol-level decode failures.
///
/// Every variant is fatal for the connection that produced it. The codec
/// never attempts partial recovery; the session layer tears the connection
/// down and relies on reconnect + resync.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of input (needed {needed} more bytes)")]
    UnexpectedEof { needed: usize },

    #[error("varint exceeds 10 bytes")]
    VarintOverflow,

    #[error("declared length {declared} exceeds limit {limit}")]
    LengthLimit { declared: u64, limit: usize },

    #[error("node nesting exceeds depth {0}")]
    DepthLimit(usize),

    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("unknown event kind tag {0}")]
    UnknownEventKind(u8),

    #[error("unknown patch op tag {0}")]
    UnknownPatchOp(u8),

    #[error("unknown payload tag {0}")]
    UnknownPayloadTag(u8),

    #[error("unknown node tag {0}")]
    UnknownNodeTag(u8),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload is not valid JSON")]
    InvalidJson,

    #[error("{0} trailing bytes after frame payload")]
    TrailingBytes(usize),

    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),
}
