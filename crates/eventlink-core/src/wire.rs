//! EventLink wire format — the framing every peer link speaks.
//!
//! A link is a sequential stream of frames. Each frame is a fixed
//! [`FrameHeader`] followed by a JSON body. The header lets the reader
//! validate and route a frame before parsing the body, and the body hash
//! catches corruption that the transport did not.
//!
//! Decoding is incremental: [`decode_frame`] consumes from a growable buffer
//! and returns `Ok(None)` until a full frame is present, so a read that is
//! interrupted by a poll timeout never loses half a frame.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Precedes every body on the wire.
///
/// Wire size: 40 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// BLAKE3 hash of the body bytes. A mismatch is a protocol violation.
    pub content_hash: [u8; 32],

    /// Packet kind, see [`PacketKind`].
    pub kind: u8,

    /// Reserved, must be zero.
    pub flags: u8,

    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Body length in bytes, little-endian.
    pub length: [u8; 4],
}

assert_eq_size!(FrameHeader, [u8; 40]);

/// Header size in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// Current frame version.
pub const FRAME_VERSION: u8 = 0x01;

/// Largest body a peer may send. Anything bigger is treated as garbage.
pub const MAX_BODY: usize = 1024 * 1024;

impl FrameHeader {
    fn for_body(kind: PacketKind, body: &[u8]) -> Self {
        Self {
            content_hash: *blake3::hash(body).as_bytes(),
            kind: kind.into(),
            flags: 0,
            version: FRAME_VERSION,
            reserved: 0,
            length: (body.len() as u32).to_le_bytes(),
        }
    }

    /// Declared body length.
    pub fn body_len(&self) -> usize {
        u32::from_le_bytes(self.length) as usize
    }

    /// Check everything that can be checked without the body.
    pub fn validate(&self) -> Result<PacketKind, WireError> {
        let version = self.version;
        if version != FRAME_VERSION {
            return Err(WireError::UnknownVersion(version));
        }
        let flags = self.flags;
        if flags != 0 || self.reserved != 0 {
            return Err(WireError::ReservedFlagsSet(flags | self.reserved));
        }
        let len = self.body_len();
        if len > MAX_BODY {
            return Err(WireError::BodyTooLarge(len));
        }
        PacketKind::try_from(self.kind)
    }
}

// ── Packet ───────────────────────────────────────────────────────────────────

/// Packet kind tag carried in [`FrameHeader::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Handshake greeting. Only valid before a connection is established.
    Hello = 0x01,
    /// Application event, opaque to the mesh.
    Event = 0x02,
    /// Routing-table replication.
    RouteUpdate = 0x03,
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::Hello),
            0x02 => Ok(PacketKind::Event),
            0x03 => Ok(PacketKind::RouteUpdate),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

/// One typed unit of data exchanged between two peers.
///
/// The body is kept encoded; receivers decode it with [`Packet::decode_body`]
/// once they know what the kind implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub body: Bytes,
}

impl Packet {
    /// Serialize `body` as JSON under the given kind.
    pub fn new<T: Serialize>(kind: PacketKind, body: &T) -> Result<Self, WireError> {
        let bytes = serde_json::to_vec(body).map_err(|e| WireError::MalformedBody(e.to_string()))?;
        if bytes.len() > MAX_BODY {
            return Err(WireError::BodyTooLarge(bytes.len()));
        }
        Ok(Self {
            kind,
            body: Bytes::from(bytes),
        })
    }

    pub fn hello(hello: &Hello) -> Result<Self, WireError> {
        Self::new(PacketKind::Hello, hello)
    }

    pub fn event(event: &EventPayload) -> Result<Self, WireError> {
        Self::new(PacketKind::Event, event)
    }

    pub fn route(update: &RouteUpdate) -> Result<Self, WireError> {
        Self::new(PacketKind::RouteUpdate, update)
    }

    /// Parse the JSON body.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        serde_json::from_slice(&self.body).map_err(|e| WireError::MalformedBody(e.to_string()))
    }

    /// Append header + body to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let header = FrameHeader::for_body(self.kind, &self.body);
        dst.reserve(HEADER_SIZE + self.body.len());
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(&self.body);
    }

    /// Size on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Pull one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. Bytes of an incomplete
/// frame stay in `buf` untouched.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Packet>, WireError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::read_from_prefix(&buf[..HEADER_SIZE]).ok_or(WireError::Truncated)?;
    let kind = header.validate()?;
    let total = HEADER_SIZE + header.body_len();

    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }

    let body = buf.split_to(total).freeze().slice(HEADER_SIZE..);
    let expected = header.content_hash;
    if *blake3::hash(&body).as_bytes() != expected {
        return Err(WireError::HashMismatch);
    }

    Ok(Some(Packet { kind, body }))
}

// ── Bodies ───────────────────────────────────────────────────────────────────

/// Handshake greeting: the sender's declared server name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub name: String,
    pub version: u8,
}

impl Hello {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: FRAME_VERSION,
        }
    }
}

/// An application event. `data` is whatever the host application put in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Name of the server that produced the event.
    pub source: String,
    /// Application-defined event name, e.g. "ping".
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// What a [`RouteUpdate`] does to the receiver's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOp {
    /// Create or refresh `table/key` with `owner` as the owner.
    Add,
    /// Remove `table/key` if `owner` still owns it.
    Delete,
    /// Remove every entry of `table` owned by `owner`.
    DropTable,
}

/// Routing-table replication message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub op: RouteOp,
    pub table: String,
    /// Empty for [`RouteOp::DropTable`].
    #[serde(default)]
    pub key: String,
    pub owner: String,
    /// Milliseconds since the Unix epoch, stamped by the owner.
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved header bits are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("body length {0} exceeds maximum {}", MAX_BODY)]
    BodyTooLarge(usize),

    #[error("body hash does not match header")]
    HashMismatch,

    #[error("truncated frame header")]
    Truncated,

    #[error("unexpected {0:?} packet")]
    UnexpectedKind(PacketKind),

    #[error("malformed body: {0}")]
    MalformedBody(String),
}

// ── Tests ────────────────────────────────────────────────────────────────────
