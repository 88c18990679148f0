//! # Error Taxonomy
//!
//! Dicey never raises: every fallible operation in the wire codec, registry,
//! pending-request index, task engine, client and server cores returns a
//! [`DiceyError`] drawn from the closed taxonomy of spec §6.4. `EAgain` is
//! deliberately excluded from this enum — it is a control-flow signal, not
//! an error (spec §7), and is represented by [`crate::wire::packet::LoadOutcome::Again`]
//! instead.
//!
//! Binary entry points wrap `DiceyError` in `anyhow::Result` at the
//! process boundary, while every inner module returns its own
//! `DiceyResult` so the specific error variant survives to the caller
//! that can actually act on it.

use thiserror::Error;

/// The closed set of observable error codes (spec §6.4).
///
/// Each variant carries just enough context to format a useful message;
/// the stable `name()` string is what would appear on the wire inside an
/// `Error` value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiceyError {
    #[error("no memory available")]
    NoMem,

    #[error("invalid argument: {0}")]
    Inval(String),

    #[error("malformed message")]
    BadMsg,

    #[error("overflow")]
    Overflow,

    #[error("malformed path: {0}")]
    PathMalformed(String),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("trait not found: {0}")]
    TraitNotFound(String),

    #[error("element not found: {trait_name}/{element}")]
    ElementNotFound { trait_name: String, element: String },

    #[error("already exists: {0}")]
    Exists(String),

    #[error("property is read-only: {0}")]
    PropertyReadOnly(String),

    #[error("sequence number mismatch: expected {expected}, got {got}")]
    SeqNumMismatch { expected: u32, got: u32 },

    #[error("value type mismatch")]
    ValueTypeMismatch,

    #[error("client protocol version is too old")]
    ClientTooOld,

    #[error("connection refused")]
    ConnRefused,

    #[error("timed out")]
    TimedOut,

    #[error("cancelled")]
    Cancelled,

    #[error("peer not found")]
    PeerNotFound,

    #[error("uuid not valid")]
    UuidNotValid,

    #[error("invalid plugin name: {0}")]
    PluginInvalidName(String),

    #[error("not found")]
    NotFound,

    #[error("transport error: {0}")]
    Transport(String),
}

impl DiceyError {
    /// The stable name this error carries on the wire (spec §6.4).
    pub fn name(&self) -> &'static str {
        match self {
            DiceyError::NoMem => "ENoMem",
            DiceyError::Inval(_) => "EInval",
            DiceyError::BadMsg => "EBadMsg",
            DiceyError::Overflow => "EOverflow",
            DiceyError::PathMalformed(_) => "EPathMalformed",
            DiceyError::PathNotFound(_) => "EPathNotFound",
            DiceyError::TraitNotFound(_) => "ETraitNotFound",
            DiceyError::ElementNotFound { .. } => "EElementNotFound",
            DiceyError::Exists(_) => "EExists",
            DiceyError::PropertyReadOnly(_) => "EPropertyReadOnly",
            DiceyError::SeqNumMismatch { .. } => "ESeqNumMismatch",
            DiceyError::ValueTypeMismatch => "EValueTypeMismatch",
            DiceyError::ClientTooOld => "EClientTooOld",
            DiceyError::ConnRefused => "EConnRefused",
            DiceyError::TimedOut => "ETimedOut",
            DiceyError::Cancelled => "ECancelled",
            DiceyError::PeerNotFound => "EPeerNotFound",
            DiceyError::UuidNotValid => "EUuidNotValid",
            DiceyError::PluginInvalidName(_) => "EPluginInvalidName",
            DiceyError::NotFound => "ENotFound",
            DiceyError::Transport(_) => "ETransport",
        }
    }

    /// The numeric code written into an `Error` value's `u16` field.
    ///
    /// Ordering matches spec §6.4's listing (with `Ok` implicitly 0 and
    /// `EAgain` implicitly 1, neither of which is representable here).
    pub fn code(&self) -> u16 {
        match self {
            DiceyError::NoMem => 2,
            DiceyError::Inval(_) => 3,
            DiceyError::BadMsg => 4,
            DiceyError::Overflow => 5,
            DiceyError::PathMalformed(_) => 6,
            DiceyError::PathNotFound(_) => 7,
            DiceyError::TraitNotFound(_) => 8,
            DiceyError::ElementNotFound { .. } => 9,
            DiceyError::Exists(_) => 10,
            DiceyError::PropertyReadOnly(_) => 11,
            DiceyError::SeqNumMismatch { .. } => 12,
            DiceyError::ValueTypeMismatch => 13,
            DiceyError::ClientTooOld => 14,
            DiceyError::ConnRefused => 15,
            DiceyError::TimedOut => 16,
            DiceyError::Cancelled => 17,
            DiceyError::PeerNotFound => 18,
            DiceyError::UuidNotValid => 19,
            DiceyError::PluginInvalidName(_) => 20,
            DiceyError::NotFound => 21,
            DiceyError::Transport(_) => 22,
        }
    }
}

/// Convenience alias used throughout the wire/registry/task/core layers.
pub type DiceyResult<T> = Result<T, DiceyError>;
