//! # Wire Protocol (component B, spec §4.2)
//!
//! Combines the read/write cursors ([`view`]), the typed value tree
//! ([`value`]), the type-descriptor language ([`sig`]), and packet framing
//! with streaming parse ([`packet`]) into the binary protocol every
//! connection speaks.

pub mod packet;
pub mod sig;
pub mod value;
pub mod view;

pub use packet::{load, ByeReason, LoadOutcome, Op, Packet, Version, PROTOCOL_VERSION};
pub use sig::{is_compatible, value_can_return, value_matches, Sig, Signature};
pub use value::{ErrorValue, Selector, Type, Value};
