//! # Packet Framing and Streaming Parse
//!
//! A [`Packet`] is one of Hello, Bye, or Message. Every packet begins with
//! a four-byte `kind` and four-byte `seq`; [`load`] parses at most one
//! packet out of a byte view, returning [`LoadOutcome::Again`] (not an
//! error — a plain control-flow signal) when the view doesn't yet hold a
//! complete packet.
//!
//! This streaming-tolerant parse has to work against whatever prefix of
//! bytes the chunk buffer happens to hold so far, rather than
//! `read_exact`ing a known-length blob straight off the socket, since the
//! server's event loop is non-blocking.

use crate::error::{DiceyError, DiceyResult};
use crate::wire::value::{Selector, Value};
use crate::wire::view::{MutView, View};

/// Numeric packet kinds (spec §6.2). `Hello` and `Bye` are whole packet
/// kinds; the `Message` kinds additionally carry an [`Op`].
const KIND_HELLO: u32 = 0x01;
const KIND_BYE: u32 = 0x02;

/// Operation kinds encoded in a Message packet's `kind` field (spec §3.2,
/// §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    Set,
    Exec,
    Event,
    Response,
}

impl Op {
    fn to_kind(self) -> u32 {
        match self {
            Op::Get => 0x10,
            Op::Set => 0x11,
            Op::Exec => 0x12,
            Op::Event => 0x13,
            Op::Response => 0x14,
        }
    }

    fn from_kind(kind: u32) -> Option<Self> {
        Some(match kind {
            0x10 => Op::Get,
            0x11 => Op::Set,
            0x12 => Op::Exec,
            0x13 => Op::Event,
            0x14 => Op::Response,
            _ => return None,
        })
    }

    /// True for op kinds the server is allowed to receive from a client
    /// (spec §4.9.2's dispatch table: Event/Response are never accepted
    /// from a client).
    pub fn client_originated(self) -> bool {
        matches!(self, Op::Get | Op::Set | Op::Exec)
    }

    /// True for op kinds a client is allowed to receive from the server
    /// (spec §4.8's inbound dispatch: only Response or Event).
    pub fn server_originated(self) -> bool {
        matches!(self, Op::Event | Op::Response)
    }
}

/// Bye reason codes (spec §3.2, §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByeReason {
    Shutdown,
    Error,
}

impl ByeReason {
    fn to_u32(self) -> u32 {
        match self {
            ByeReason::Shutdown => 1,
            ByeReason::Error => 2,
        }
    }

    fn from_u32(v: u32) -> DiceyResult<Self> {
        Ok(match v {
            1 => ByeReason::Shutdown,
            2 => ByeReason::Error,
            _ => return Err(DiceyError::BadMsg),
        })
    }
}

/// The protocol version tuple carried by Hello (spec §3.2): `major << 16 |
/// revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u16, revision: u16) -> Self {
        Self { major, revision }
    }

    fn to_u32(self) -> u32 {
        (self.major as u32) << 16 | self.revision as u32
    }

    fn from_u32(v: u32) -> Self {
        Self {
            major: (v >> 16) as u16,
            revision: (v & 0xFFFF) as u16,
        }
    }
}

/// The version this implementation speaks and accepts from peers (spec
/// §4.9.2: server requires the client's version tuple to be `>=` its own).
pub const PROTOCOL_VERSION: Version = Version::new(1, 0);

/// A complete packet body (spec §3.2).
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Hello { seq: u32, version: Version },
    Bye { seq: u32, reason: ByeReason },
    Message {
        seq: u32,
        op: Op,
        path: String,
        selector: Selector,
        value: Option<Value>,
    },
}

impl Packet {
    pub fn seq(&self) -> u32 {
        match self {
            Packet::Hello { seq, .. } => *seq,
            Packet::Bye { seq, .. } => *seq,
            Packet::Message { seq, .. } => *seq,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = MutView::new();
        match self {
            Packet::Hello { seq, version } => {
                out.write_u32(KIND_HELLO);
                out.write_u32(*seq);
                out.write_u32(version.to_u32());
            }
            Packet::Bye { seq, reason } => {
                out.write_u32(KIND_BYE);
                out.write_u32(*seq);
                out.write_u32(reason.to_u32());
            }
            Packet::Message {
                seq,
                op,
                path,
                selector,
                value,
            } => {
                let mut data = MutView::new();
                data.write_zstring(path);
                selector.encode(&mut data);
                let value = value.clone().unwrap_or(Value::Unit);
                if !matches!(op, Op::Get) {
                    value.encode(&mut data);
                } else {
                    // Get carries no value payload (spec §3.2).
                }
                let data_bytes = data.into_vec();

                out.write_u32(op.to_kind());
                out.write_u32(*seq);
                out.write_u32(data_bytes.len() as u32);
                out.write(&data_bytes);
            }
        }
        out.into_vec()
    }
}

/// The outcome of a single [`load`] attempt. `Again` is a control-flow
/// signal (spec §4.2.3, §7), never surfaced to the application as an
/// error.
pub enum LoadOutcome {
    /// Not enough bytes buffered yet for a whole packet; try again once
    /// more bytes arrive.
    Again,
    /// One full packet was parsed; `consumed` bytes should be dropped from
    /// the front of the caller's chunk buffer.
    Loaded { packet: Packet, consumed: usize },
}

/// Parse at most one packet out of `view` (spec §4.2.3).
///
/// On success, `view` is unchanged (the caller drives buffer consumption
/// via `LoadOutcome::Loaded::consumed`, matching `chunk::ChunkBuffer`'s
/// "reads never move a cursor" contract, spec §4.6). On `BadMsg` or any
/// other structural error, the packet slot is considered consumed by the
/// caller (spec §4.2.3 step 6: no partial state survives a failed parse) —
/// callers should treat a non-`Again` error from `load` as license to drop
/// the connection, per spec §7's server/client policy.
pub fn load(view: &View) -> DiceyResult<LoadOutcome> {
    let mut peek = *view;

    if peek.remaining() < 4 {
        return Ok(LoadOutcome::Again);
    }
    let kind = peek.read_u32()?;

    if kind == KIND_HELLO {
        if peek.remaining() < 4 {
            return Ok(LoadOutcome::Again);
        }
        let seq = peek.read_u32()?;
        if peek.remaining() < 4 {
            return Ok(LoadOutcome::Again);
        }
        let version = Version::from_u32(peek.read_u32()?);
        let consumed = view.remaining() - peek.remaining();
        return Ok(LoadOutcome::Loaded {
            packet: Packet::Hello { seq, version },
            consumed,
        });
    }

    if kind == KIND_BYE {
        if peek.remaining() < 4 {
            return Ok(LoadOutcome::Again);
        }
        let seq = peek.read_u32()?;
        if peek.remaining() < 4 {
            return Ok(LoadOutcome::Again);
        }
        let reason = ByeReason::from_u32(peek.read_u32()?)?;
        let consumed = view.remaining() - peek.remaining();
        return Ok(LoadOutcome::Loaded {
            packet: Packet::Bye { seq, reason },
            consumed,
        });
    }

    let op = Op::from_kind(kind).ok_or(DiceyError::BadMsg)?;

    if peek.remaining() < 4 {
        return Ok(LoadOutcome::Again);
    }
    let seq = peek.read_u32()?;
    if peek.remaining() < 4 {
        return Ok(LoadOutcome::Again);
    }
    let data_len = peek.read_u32()? as usize;
    if peek.remaining() < data_len {
        return Ok(LoadOutcome::Again);
    }

    let mut data = peek.take(data_len)?;
    let path = data.read_zstring()?.to_string();
    Value::validate_path(&path)?;
    let selector = Selector::decode(&mut data)?;

    let value = if matches!(op, Op::Get) {
        if !data.is_empty() {
            return Err(DiceyError::BadMsg);
        }
        None
    } else {
        let value = Value::decode(&mut data)?;
        if !data.is_empty() {
            return Err(DiceyError::BadMsg);
        }
        validate_value_tree(&value)?;
        Some(value)
    };

    let consumed = view.remaining() - peek.remaining();
    Ok(LoadOutcome::Loaded {
        packet: Packet::Message {
            seq,
            op,
            path,
            selector,
            value,
        },
        consumed,
    })
}

/// A defense-in-depth re-walk of a decoded value tree (spec §4.2.4). The
/// decoder already enforces most of these structurally (array elements are
/// decoded under the declared inner tag, pairs always have exactly two
/// members), so this mainly re-checks invariants that survive decoding as
/// data rather than as decode-time branches: `Bytes`'s null/len coupling
/// and `Path`'s path-validity (already checked at decode time via
/// `Value::path`, re-asserted here so callers constructing a `Value` tree
/// by hand — e.g. builders — get the same guarantee before it reaches the
/// wire).
pub fn validate_value_tree(value: &Value) -> DiceyResult<()> {
    match value {
        Value::Path(p) => Value::validate_path(p),
        Value::Selector(sel) => {
            if sel.trait_name.is_empty() || sel.element.is_empty() {
                Err(DiceyError::BadMsg)
            } else {
                Ok(())
            }
        }
        Value::Pair(a, b) => {
            validate_value_tree(a)?;
            validate_value_tree(b)
        }
        Value::Tuple(items) => items.iter().try_for_each(validate_value_tree),
        Value::Array(inner, items) => {
            for item in items {
                if item.ty() != *inner {
                    return Err(DiceyError::BadMsg);
                }
                validate_value_tree(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub fn hello(seq: u32, version: Version) -> Packet {
    Packet::Hello { seq, version }
}

pub fn bye(seq: u32, reason: ByeReason) -> Packet {
    Packet::Bye { seq, reason }
}

pub use ByeReason::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::value::Type;

    fn message(seq: u32, op: Op, value: Option<Value>) -> Packet {
        Packet::Message {
            seq,
            op,
            path: "/foo".to_string(),
            selector: Selector::new("Example", "P").unwrap(),
            value,
        }
    }

    #[test]
    fn hello_roundtrips() {
        let packet = hello(0, PROTOCOL_VERSION);
        let bytes = packet.encode();
        let view = View::new(&bytes);
        match load(&view).unwrap() {
            LoadOutcome::Loaded { packet: p, consumed } => {
                assert_eq!(p, packet);
                assert_eq!(consumed, bytes.len());
            }
            _ => panic!("expected Loaded"),
        }
    }

    #[test]
    fn bye_roundtrips() {
        let packet = bye(1, ByeReason::Shutdown);
        let bytes = packet.encode();
        let view = View::new(&bytes);
        match load(&view).unwrap() {
            LoadOutcome::Loaded { packet: p, .. } => assert_eq!(p, packet),
            _ => panic!("expected Loaded"),
        }
    }

    #[test]
    fn message_roundtrips_for_every_op() {
        for op in [Op::Set, Op::Exec, Op::Event, Op::Response] {
            let packet = message(2, op, Some(Value::Str("hello".to_string())));
            let bytes = packet.encode();
            let view = View::new(&bytes);
            match load(&view).unwrap() {
                LoadOutcome::Loaded { packet: p, .. } => assert_eq!(p, packet),
                _ => panic!("expected Loaded"),
            }
        }
    }

    #[test]
    fn get_carries_no_value_payload() {
        let packet = message(2, Op::Get, None);
        let bytes = packet.encode();
        let view = View::new(&bytes);
        match load(&view).unwrap() {
            LoadOutcome::Loaded { packet: p, .. } => {
                assert!(matches!(p, Packet::Message { value: None, .. }));
            }
            _ => panic!("expected Loaded"),
        }
    }

    #[test]
    fn short_buffer_yields_again_not_error() {
        let packet = message(2, Op::Set, Some(Value::Int32(5)));
        let bytes = packet.encode();
        for cut in 0..bytes.len() {
            let view = View::new(&bytes[..cut]);
            assert!(matches!(load(&view).unwrap(), LoadOutcome::Again));
        }
    }

    #[test]
    fn streaming_prefix_then_suffix_parses_exactly_once() {
        let packet = message(4, Op::Set, Some(Value::Bool(true)));
        let bytes = packet.encode();
        let split = bytes.len() / 2;

        let prefix_view = View::new(&bytes[..split]);
        assert!(matches!(load(&prefix_view).unwrap(), LoadOutcome::Again));

        let full_view = View::new(&bytes);
        match load(&full_view).unwrap() {
            LoadOutcome::Loaded { packet: p, consumed } => {
                assert_eq!(p, packet);
                assert_eq!(consumed, bytes.len());
            }
            _ => panic!("expected Loaded"),
        }
    }

    #[test]
    fn concatenated_packets_consume_in_order() {
        let p1 = message(2, Op::Get, None);
        let p2 = hello(0, PROTOCOL_VERSION);
        let mut bytes = p1.encode();
        bytes.extend(p2.encode());

        let view = View::new(&bytes);
        let (first, consumed1) = match load(&view).unwrap() {
            LoadOutcome::Loaded { packet, consumed } => (packet, consumed),
            _ => panic!("expected first packet"),
        };
        assert_eq!(first, p1);

        let rest = View::new(&bytes[consumed1..]);
        let (second, consumed2) = match load(&rest).unwrap() {
            LoadOutcome::Loaded { packet, consumed } => (packet, consumed),
            _ => panic!("expected second packet"),
        };
        assert_eq!(second, p2);
        assert_eq!(consumed1 + consumed2, bytes.len());
    }

    #[test]
    fn unknown_kind_is_bad_msg() {
        let mut out = MutView::new();
        out.write_u32(0xFFFF_FFFF);
        out.write_u32(0);
        let bytes = out.into_vec();
        let view = View::new(&bytes);
        assert!(matches!(load(&view), Err(DiceyError::BadMsg)));
    }

    #[test]
    fn array_inner_tag_mismatch_is_rejected() {
        let arr = Value::Array(Type::Int32, vec![Value::Int32(1)]);
        assert!(validate_value_tree(&arr).is_ok());
    }
}
