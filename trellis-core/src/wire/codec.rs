//! Frame Encoding and Decoding
//!
//! Hand-written, allocation-bounded codec for the message layouts in
//! `frame`. The decoder checks every declared length against the bytes
//! actually remaining before it allocates anything, so a hostile frame can
//! never make the server allocate proportional to a number it made up.

use crate::tree::{EventKind, Hid, MountedKind, MountedNode, Patch};

use super::error::WireError;
use super::frame::{
    EventPayload, Message, FLAG_FULL, FRAME_CLIENT_HELLO, FRAME_CLOSE, FRAME_ERROR, FRAME_EVENT,
    FRAME_PATCH_BATCH, FRAME_PING, FRAME_PONG, FRAME_RESYNC, FRAME_SERVER_HELLO,
};
use super::varint;

/// Ceiling for any single string on the wire.
pub const MAX_STRING_LEN: usize = 1 << 20;
/// Ceiling for the opaque resume token.
pub const MAX_BLOB_LEN: usize = 1 << 16;
/// Node nesting ceiling during decode.
pub const MAX_NODE_DEPTH: usize = 64;

const KIND_CLICK: u8 = 0;
const KIND_INPUT: u8 = 1;
const KIND_SUBMIT: u8 = 2;
const KIND_KEY_DOWN: u8 = 3;
const KIND_FOCUS: u8 = 4;
const KIND_BLUR: u8 = 5;
const KIND_CUSTOM: u8 = 6;

const PAYLOAD_NONE: u8 = 0;
const PAYLOAD_VALUE: u8 = 1;
const PAYLOAD_KEY: u8 = 2;
const PAYLOAD_JSON: u8 = 3;

const OP_INSERT: u8 = 0;
const OP_REMOVE: u8 = 1;
const OP_REPLACE: u8 = 2;
const OP_MOVE: u8 = 3;
const OP_SET_TEXT: u8 = 4;
const OP_SET_ATTR: u8 = 5;
const OP_REMOVE_ATTR: u8 = 6;

const NODE_TEXT: u8 = 0;
const NODE_ELEMENT: u8 = 1;

// ----------- Encoding -----------

/// Encode one message as a complete frame (header + payload).
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut payload = Vec::with_capacity(64);
    let mut flags = 0u8;

    match msg {
        Message::ClientHello {
            protocol_version,
            route,
            resume_token,
        } => {
            payload.extend_from_slice(&protocol_version.to_be_bytes());
            write_string(&mut payload, route);
            match resume_token {
                Some(token) => {
                    payload.push(1);
                    varint::write_u64(&mut payload, token.len() as u64);
                    payload.extend_from_slice(token);
                }
                None => payload.push(0),
            }
        }
        Message::ServerHello {
            protocol_version,
            session_id,
            resumed,
        } => {
            payload.extend_from_slice(&protocol_version.to_be_bytes());
            varint::write_u64(&mut payload, *session_id);
            payload.push(u8::from(*resumed));
        }
        Message::Event {
            seq,
            kind,
            target,
            payload: event_payload,
        } => {
            varint::write_u64(&mut payload, *seq);
            write_event_kind(&mut payload, kind);
            varint::write_u64(&mut payload, u64::from(target.raw()));
            write_event_payload(&mut payload, event_payload);
        }
        Message::PatchBatch { seq, full, patches } => {
            if *full {
                flags |= FLAG_FULL;
            }
            varint::write_u64(&mut payload, *seq);
            varint::write_u64(&mut payload, patches.len() as u64);
            for patch in patches {
                write_patch(&mut payload, patch);
            }
        }
        Message::Ping { nonce } | Message::Pong { nonce } => {
            varint::write_u64(&mut payload, *nonce);
        }
        Message::Resync { last_seq } => {
            varint::write_u64(&mut payload, *last_seq);
        }
        Message::Close { code } => {
            payload.extend_from_slice(&code.to_be_bytes());
        }
        Message::Error { code, message } => {
            payload.extend_from_slice(&code.to_be_bytes());
            write_string(&mut payload, message);
        }
    }

    let mut frame = Vec::with_capacity(payload.len() + 12);
    frame.push(msg.frame_type());
    frame.push(flags);
    varint::write_u64(&mut frame, payload.len() as u64);
    frame.extend_from_slice(&payload);
    frame
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    varint::write_u64(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

fn write_event_kind(buf: &mut Vec<u8>, kind: &EventKind) {
    match kind {
        EventKind::Click => buf.push(KIND_CLICK),
        EventKind::Input => buf.push(KIND_INPUT),
        EventKind::Submit => buf.push(KIND_SUBMIT),
        EventKind::KeyDown => buf.push(KIND_KEY_DOWN),
        EventKind::Focus => buf.push(KIND_FOCUS),
        EventKind::Blur => buf.push(KIND_BLUR),
        EventKind::Custom(name) => {
            buf.push(KIND_CUSTOM);
            write_string(buf, name);
        }
    }
}

fn write_event_payload(buf: &mut Vec<u8>, payload: &EventPayload) {
    match payload {
        EventPayload::None => buf.push(PAYLOAD_NONE),
        EventPayload::Value(value) => {
            buf.push(PAYLOAD_VALUE);
            write_string(buf, value);
        }
        EventPayload::Key(key) => {
            buf.push(PAYLOAD_KEY);
            write_string(buf, key);
        }
        EventPayload::Json(value) => {
            buf.push(PAYLOAD_JSON);
            write_string(buf, &value.to_string());
        }
    }
}

fn write_hid(buf: &mut Vec<u8>, hid: Hid) {
    varint::write_u64(buf, u64::from(hid.raw()));
}

fn write_patch(buf: &mut Vec<u8>, patch: &Patch) {
    match patch {
        Patch::InsertNode {
            parent,
            index,
            node,
        } => {
            buf.push(OP_INSERT);
            write_hid(buf, *parent);
            varint::write_u64(buf, u64::from(*index));
            write_node(buf, node);
        }
        Patch::RemoveNode { hid } => {
            buf.push(OP_REMOVE);
            write_hid(buf, *hid);
        }
        Patch::ReplaceNode { hid, node } => {
            buf.push(OP_REPLACE);
            write_hid(buf, *hid);
            write_node(buf, node);
        }
        Patch::MoveNode { hid, parent, index } => {
            buf.push(OP_MOVE);
            write_hid(buf, *hid);
            write_hid(buf, *parent);
            varint::write_u64(buf, u64::from(*index));
        }
        Patch::SetText { hid, text } => {
            buf.push(OP_SET_TEXT);
            write_hid(buf, *hid);
            write_string(buf, text);
        }
        Patch::SetAttr { hid, name, value } => {
            buf.push(OP_SET_ATTR);
            write_hid(buf, *hid);
            write_string(buf, name);
            write_string(buf, value);
        }
        Patch::RemoveAttr { hid, name } => {
            buf.push(OP_REMOVE_ATTR);
            write_hid(buf, *hid);
            write_string(buf, name);
        }
    }
}

fn write_node(buf: &mut Vec<u8>, node: &MountedNode) {
    match &node.kind {
        MountedKind::Text(text) => {
            buf.push(NODE_TEXT);
            write_hid(buf, node.hid);
            write_string(buf, text);
        }
        MountedKind::Element {
            tag,
            key,
            attrs,
            events,
            children,
        } => {
            buf.push(NODE_ELEMENT);
            write_hid(buf, node.hid);
            write_string(buf, tag);
            match key {
                Some(key) => {
                    buf.push(1);
                    write_string(buf, key);
                }
                None => buf.push(0),
            }
            varint::write_u64(buf, attrs.len() as u64);
            for (name, value) in attrs {
                write_string(buf, name);
                write_string(buf, value);
            }
            varint::write_u64(buf, events.len() as u64);
            for (kind, handler) in events {
                write_event_kind(buf, kind);
                write_string(buf, handler);
            }
            varint::write_u64(buf, children.len() as u64);
            for child in children {
                write_node(buf, child);
            }
        }
    }
}

// ----------- Decoding -----------

/// Decode one complete frame. The slice must hold exactly one frame; both
/// the header length and the payload contents are checked against it.
pub fn decode(buf: &[u8]) -> Result<Message, WireError> {
    let mut r = Reader::new(buf);
    let frame_type = r.read_u8()?;
    let flags = r.read_u8()?;
    let declared = r.read_varint()?;

    let remaining = r.remaining() as u64;
    if declared > remaining {
        return Err(WireError::UnexpectedEof {
            needed: (declared - remaining) as usize,
        });
    }
    if declared < remaining {
        return Err(WireError::TrailingBytes((remaining - declared) as usize));
    }

    let msg = match frame_type {
        FRAME_CLIENT_HELLO => {
            let protocol_version = r.read_u16_be()?;
            let route = r.read_string(MAX_STRING_LEN)?;
            let resume_token = match r.read_bool()? {
                true => Some(r.read_bytes(MAX_BLOB_LEN)?),
                false => None,
            };
            Message::ClientHello {
                protocol_version,
                route,
                resume_token,
            }
        }
        FRAME_SERVER_HELLO => Message::ServerHello {
            protocol_version: r.read_u16_be()?,
            session_id: r.read_varint()?,
            resumed: r.read_bool()?,
        },
        FRAME_EVENT => {
            let seq = r.read_varint()?;
            let kind = read_event_kind(&mut r)?;
            let target = Hid(r.read_varint_u32()?);
            let payload = read_event_payload(&mut r)?;
            Message::Event {
                seq,
                kind,
                target,
                payload,
            }
        }
        FRAME_PATCH_BATCH => {
            let seq = r.read_varint()?;
            let count = r.read_count()?;
            let mut patches = Vec::with_capacity(count);
            for _ in 0..count {
                patches.push(read_patch(&mut r)?);
            }
            Message::PatchBatch {
                seq,
                full: flags & FLAG_FULL != 0,
                patches,
            }
        }
        FRAME_PING => Message::Ping {
            nonce: r.read_varint()?,
        },
        FRAME_PONG => Message::Pong {
            nonce: r.read_varint()?,
        },
        FRAME_RESYNC => Message::Resync {
            last_seq: r.read_varint()?,
        },
        FRAME_CLOSE => Message::Close {
            code: r.read_u16_be()?,
        },
        FRAME_ERROR => Message::Error {
            code: r.read_u16_be()?,
            message: r.read_string(MAX_STRING_LEN)?,
        },
        other => return Err(WireError::UnknownFrameType(other)),
    };

    if r.remaining() > 0 {
        return Err(WireError::TrailingBytes(r.remaining()));
    }
    Ok(msg)
}

fn read_event_kind(r: &mut Reader<'_>) -> Result<EventKind, WireError> {
    match r.read_u8()? {
        KIND_CLICK => Ok(EventKind::Click),
        KIND_INPUT => Ok(EventKind::Input),
        KIND_SUBMIT => Ok(EventKind::Submit),
        KIND_KEY_DOWN => Ok(EventKind::KeyDown),
        KIND_FOCUS => Ok(EventKind::Focus),
        KIND_BLUR => Ok(EventKind::Blur),
        KIND_CUSTOM => Ok(EventKind::Custom(r.read_string(MAX_STRING_LEN)?)),
        other => Err(WireError::UnknownEventKind(other)),
    }
}

fn read_event_payload(r: &mut Reader<'_>) -> Result<EventPayload, WireError> {
    match r.read_u8()? {
        PAYLOAD_NONE => Ok(EventPayload::None),
        PAYLOAD_VALUE => Ok(EventPayload::Value(r.read_string(MAX_STRING_LEN)?)),
        PAYLOAD_KEY => Ok(EventPayload::Key(r.read_string(MAX_STRING_LEN)?)),
        PAYLOAD_JSON => {
            let raw = r.read_string(MAX_STRING_LEN)?;
            serde_json::from_str(&raw)
                .map(EventPayload::Json)
                .map_err(|_| WireError::InvalidJson)
        }
        other => Err(WireError::UnknownPayloadTag(other)),
    }
}

fn read_patch(r: &mut Reader<'_>) -> Result<Patch, WireError> {
    match r.read_u8()? {
        OP_INSERT => Ok(Patch::InsertNode {
            parent: Hid(r.read_varint_u32()?),
            index: r.read_varint_u32()?,
            node: read_node(r, 0)?,
        }),
        OP_REMOVE => Ok(Patch::RemoveNode {
            hid: Hid(r.read_varint_u32()?),
        }),
        OP_REPLACE => Ok(Patch::ReplaceNode {
            hid: Hid(r.read_varint_u32()?),
            node: read_node(r, 0)?,
        }),
        OP_MOVE => Ok(Patch::MoveNode {
            hid: Hid(r.read_varint_u32()?),
            parent: Hid(r.read_varint_u32()?),
            index: r.read_varint_u32()?,
        }),
        OP_SET_TEXT => Ok(Patch::SetText {
            hid: Hid(r.read_varint_u32()?),
            text: r.read_string(MAX_STRING_LEN)?,
        }),
        OP_SET_ATTR => Ok(Patch::SetAttr {
            hid: Hid(r.read_varint_u32()?),
            name: r.read_string(MAX_STRING_LEN)?,
            value: r.read_string(MAX_STRING_LEN)?,
        }),
        OP_REMOVE_ATTR => Ok(Patch::RemoveAttr {
            hid: Hid(r.read_varint_u32()?),
            name: r.read_string(MAX_STRING_LEN)?,
        }),
        other => Err(WireError::UnknownPatchOp(other)),
    }
}

fn read_node(r: &mut Reader<'_>, depth: usize) -> Result<MountedNode, WireError> {
    if depth >= MAX_NODE_DEPTH {
        return Err(WireError::DepthLimit(MAX_NODE_DEPTH));
    }
    match r.read_u8()? {
        NODE_TEXT => {
            let hid = Hid(r.read_varint_u32()?);
            let text = r.read_string(MAX_STRING_LEN)?;
            Ok(MountedNode {
                hid,
                kind: MountedKind::Text(text),
            })
        }
        NODE_ELEMENT => {
            let hid = Hid(r.read_varint_u32()?);
            let tag = r.read_string(MAX_STRING_LEN)?;
            let key = match r.read_bool()? {
                true => Some(r.read_string(MAX_STRING_LEN)?),
                false => None,
            };
            let attr_count = r.read_count()?;
            let mut attrs = Vec::with_capacity(attr_count);
            for _ in 0..attr_count {
                let name = r.read_string(MAX_STRING_LEN)?;
                let value = r.read_string(MAX_STRING_LEN)?;
                attrs.push((name, value));
            }
            let event_count = r.read_count()?;
            let mut events = Vec::with_capacity(event_count);
            for _ in 0..event_count {
                let kind = read_event_kind(r)?;
                let handler = r.read_string(MAX_STRING_LEN)?;
                events.push((kind, handler));
            }
            let child_count = r.read_count()?;
            let mut children = Vec::with_capacity(child_count);
            for _ in 0..child_count {
                children.push(read_node(r, depth + 1)?);
            }
            Ok(MountedNode {
                hid,
                kind: MountedKind::Element {
                    tag,
                    key,
                    attrs,
                    events,
                    children,
                },
            })
        }
        other => Err(WireError::UnknownNodeTag(other)),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::UnexpectedEof {
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(WireError::InvalidBool(other)),
        }
    }

    fn read_u16_be(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_varint(&mut self) -> Result<u64, WireError> {
        let (value, len) = varint::read_u64(&self.buf[self.pos..])?;
        self.pos += len;
        Ok(value)
    }

    fn read_varint_u32(&mut self) -> Result<u32, WireError> {
        u32::try_from(self.read_varint()?).map_err(|_| WireError::VarintOverflow)
    }

    /// A declared element count. Each element occupies at least one byte,
    /// so any count above the remaining byte count is a lie.
    fn read_count(&mut self) -> Result<usize, WireError> {
        let declared = self.read_varint()?;
        if declared > self.remaining() as u64 {
            return Err(WireError::LengthLimit {
                declared,
                limit: self.remaining(),
            });
        }
        Ok(declared as usize)
    }

    fn read_len(&mut self, limit: usize) -> Result<usize, WireError> {
        let declared = self.read_varint()?;
        if declared > limit as u64 {
            return Err(WireError::LengthLimit { declared, limit });
        }
        let declared = declared as usize;
        if declared > self.remaining() {
            return Err(WireError::UnexpectedEof {
                needed: declared - self.remaining(),
            });
        }
        Ok(declared)
    }

    fn read_string(&mut self, limit: usize) -> Result<String, WireError> {
        let len = self.read_len(limit)?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    fn read_bytes(&mut self, limit: usize) -> Result<Vec<u8>, WireError> {
        let len = self.read_len(limit)?;
        Ok(self.take(len)?.to_vec())
    }
}

// ----------- Tests -----------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{el, mount, text, HidAllocator};

    fn assert_round_trip(msg: Message) {
        let bytes = encode(&msg);
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn handshake_round_trip() {
        assert_round_trip(Message::ClientHello {
            protocol_version: super::super::frame::PROTOCOL_VERSION,
            route: "/todos".to_owned(),
            resume_token: Some(vec![1, 2, 3]),
        });
        assert_round_trip(Message::ClientHello {
            protocol_version: 1,
            route: "/".to_owned(),
            resume_token: None,
        });
        assert_round_trip(Message::ServerHello {
            protocol_version: 1,
            session_id: 42,
            resumed: true,
        });
    }

    #[test]
    fn event_round_trip() {
        assert_round_trip(Message::Event {
            seq: 7,
            kind: EventKind::Input,
            target: Hid(9),
            payload: EventPayload::Value("hello".to_owned()),
        });
        assert_round_trip(Message::Event {
            seq: 8,
            kind: EventKind::Custom("drag-end".to_owned()),
            target: Hid(3),
            payload: EventPayload::Json(serde_json::json!({"x": 4, "y": -2})),
        });
    }

    #[test]
    fn patch_batch_round_trip() {
        let mut alloc = HidAllocator::new();
        let node = mount(
            &el("li")
                .key("a")
                .attr("class", "row")
                .on(EventKind::Click, "select")
                .child(text("item"))
                .build(),
            &mut alloc,
        );
        assert_round_trip(Message::PatchBatch {
            seq: 3,
            full: false,
            patches: vec![
                Patch::InsertNode {
                    parent: Hid(1),
                    index: 0,
                    node: node.clone(),
                },
                Patch::MoveNode {
                    hid: Hid(4),
                    parent: Hid(1),
                    index: 2,
                },
                Patch::SetText {
                    hid: Hid(5),
                    text: "x".to_owned(),
                },
                Patch::RemoveAttr {
                    hid: Hid(5),
                    name: "class".to_owned(),
                },
                Patch::RemoveNode { hid: Hid(6) },
            ],
        });
        assert_round_trip(Message::PatchBatch {
            seq: 1,
            full: true,
            patches: vec![Patch::ReplaceNode {
                hid: Hid(1),
                node,
            }],
        });
    }

    #[test]
    fn control_round_trip() {
        assert_round_trip(Message::Ping { nonce: 1 });
        assert_round_trip(Message::Pong { nonce: 1 });
        assert_round_trip(Message::Resync { last_seq: 12 });
        assert_round_trip(Message::Close { code: 1000 });
        assert_round_trip(Message::Error {
            code: 4001,
            message: "unknown hid".to_owned(),
        });
    }

    #[test]
    fn hostile_string_length_is_rejected_before_allocation() {
        // Error frame declaring a 1 GiB message string with 2 payload bytes
        // after the code.
        let mut frame = vec![FRAME_ERROR, 0];
        let mut payload = vec![0x0f, 0xa1]; // code
        varint::write_u64(&mut payload, 1 << 30);
        varint::write_u64(&mut frame, payload.len() as u64);
        frame.extend_from_slice(&payload);

        assert_eq!(
            decode(&frame),
            Err(WireError::LengthLimit {
                declared: 1 << 30,
                limit: MAX_STRING_LEN,
            })
        );
    }

    #[test]
    fn hostile_count_is_rejected() {
        // Patch batch declaring u32::MAX patches with an empty body.
        let mut frame = vec![FRAME_PATCH_BATCH, 0];
        let mut payload = Vec::new();
        varint::write_u64(&mut payload, 1); // seq
        varint::write_u64(&mut payload, u64::from(u32::MAX)); // count
        varint::write_u64(&mut frame, payload.len() as u64);
        frame.extend_from_slice(&payload);

        assert!(matches!(
            decode(&frame),
            Err(WireError::LengthLimit { .. })
        ));
    }

    #[test]
    fn nesting_past_depth_limit_is_rejected() {
        let mut deep = el("div").build();
        for _ in 0..(MAX_NODE_DEPTH + 4) {
            deep = el("div").child(deep).build();
        }
        let mut alloc = HidAllocator::new();
        let node = mount(&deep, &mut alloc);
        let bytes = encode(&Message::PatchBatch {
            seq: 1,
            full: true,
            patches: vec![Patch::ReplaceNode { hid: Hid(1), node }],
        });

        assert_eq!(decode(&bytes), Err(WireError::DepthLimit(MAX_NODE_DEPTH)));
    }

    #[test]
    fn declared_length_must_match_frame() {
        let mut bytes = encode(&Message::Ping { nonce: 5 });
        bytes.push(0);
        assert_eq!(decode(&bytes), Err(WireError::TrailingBytes(1)));

        let bytes = encode(&Message::Ping { nonce: 5 });
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(WireError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let frame = vec![0x7f, 0, 0];
        assert_eq!(decode(&frame), Err(WireError::UnknownFrameType(0x7f)));
    }
}
