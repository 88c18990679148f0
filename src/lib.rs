//! # Dicey
//!
//! A local IPC system built around a typed, versioned binary protocol, a
//! hierarchical object/trait registry, and synchronous and asynchronous
//! client APIs.
//!
//! - [`wire`] — the binary protocol: values, signatures, packet framing.
//! - [`chunk`] — the per-connection inbound byte buffer.
//! - [`builders`] — fluent construction of outbound packets and values.
//! - [`registry`] — the object/trait namespace and its built-in introspection.
//! - [`pending`] — the client's in-flight-request index.
//! - [`transport`] — the Unix-socket/named-pipe byte stream.
//! - [`client`] — the async core and blocking facade applications connect with.
//! - [`server`] — the accept loop, registry actor, and optional plugin manager.

pub mod builders;
pub mod chunk;
pub mod cli;
pub mod client;
pub mod error;
pub mod logging;
pub mod pending;
pub mod registry;
pub mod server;
pub mod transport;
pub mod wire;

pub use client::{Client, SyncClient};
pub use error::{DiceyError, DiceyResult};
pub use registry::{Element, ElementFlags, ElementKind, Registry, Trait};
pub use server::{serve, ServerHandle};
pub use wire::{Selector, Value};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
