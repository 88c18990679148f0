//! # Client Core (component H, spec §3.5, §4.8)
//!
//! [`Client`] is the async, callback-style core: one connection, one
//! background event-loop task reading and writing the same
//! [`crate::transport::Connection`], and a [`PendingIndex`] matching
//! `Response` packets back to the `request()` call that sent them.
//! [`SyncClient`] wraps it behind a dedicated single-thread `tokio`
//! runtime for callers that want a blocking call, without asking a caller
//! outside an async context to stand up its own runtime.
//!
//! Outbound sequence numbers are client-originated and strictly
//! increasing starting at 2 (0 is reserved for the handshake `Hello`);
//! `Response` packets echo the seq of the request they answer, while
//! `Event` packets carry their own server-allocated seq and are matched by
//! path/selector instead of by seq.

use crate::chunk::ChunkBuffer;
use crate::builders::MessageBuilder;
use crate::error::{DiceyError, DiceyResult};
use crate::pending::PendingIndex;
use crate::transport::{self, Connection};
use crate::wire::{self, ByeReason, LoadOutcome, Op, Packet, Selector, Value, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const FIRST_CLIENT_SEQ: u32 = 2;

enum LoopCommand {
    Send {
        packet: Packet,
        reply: Option<oneshot::Sender<DiceyResult<Value>>>,
    },
    Subscribe {
        path: String,
        selector: Selector,
        events: mpsc::UnboundedSender<Value>,
    },
    Shutdown,
}

/// A connected Dicey client (spec §3.5). Cheaply cloneable: every clone
/// shares the same background loop and sequence counter.
#[derive(Clone)]
pub struct Client {
    to_loop: mpsc::UnboundedSender<LoopCommand>,
    next_seq: std::sync::Arc<AtomicU32>,
}

impl Client {
    /// Connect to a server at `address` and perform the Hello handshake
    /// (spec §4.8's Connect task): send our Hello, read the server's,
    /// reject if its protocol version is older than ours.
    pub async fn connect(address: &str) -> DiceyResult<Self> {
        let mut conn = Connection::connect(address).await?;
        conn.write_all(&wire::packet::hello(0, PROTOCOL_VERSION).encode())
            .await?;

        let mut buf = ChunkBuffer::new();
        let server_version = loop {
            conn.read_into(&mut buf).await?;
            match wire::load(&crate::wire::view::View::new(buf.filled()))? {
                LoadOutcome::Again => continue,
                LoadOutcome::Loaded { packet: Packet::Hello { version, .. }, consumed } => {
                    buf.drain(consumed);
                    break version;
                }
                LoadOutcome::Loaded { consumed, .. } => {
                    buf.drain(consumed);
                    return Err(DiceyError::BadMsg);
                }
            }
        };
        if server_version < PROTOCOL_VERSION {
            return Err(DiceyError::ClientTooOld);
        }

        let (read, write) = conn.split();
        let (to_loop, from_client) = mpsc::unbounded_channel();

        tokio::spawn(
            ClientLoop {
                read,
                write,
                buf,
                pending: PendingIndex::new(),
                subscriptions: HashMap::new(),
            }
            .run(from_client),
        );

        Ok(Self {
            to_loop,
            next_seq: std::sync::Arc::new(AtomicU32::new(FIRST_CLIENT_SEQ)),
        })
    }

    fn alloc_seq(&self) -> u32 {
        self.next_seq.fetch_add(2, Ordering::Relaxed)
    }

    async fn request(
        &self,
        path: impl Into<String>,
        selector: Selector,
        op: Op,
        value: Option<Value>,
    ) -> DiceyResult<Value> {
        let seq = self.alloc_seq();
        let mut builder = MessageBuilder::new()
            .begin(op)
            .set_seq(seq)
            .set_path(path)?
            .set_selector(selector);
        if let Some(v) = value {
            builder = builder.value(v)?;
        }
        let packet = builder.build()?;

        let (tx, rx) = oneshot::channel();
        self.to_loop
            .send(LoopCommand::Send { packet, reply: Some(tx) })
            .map_err(|_| DiceyError::ConnRefused)?;
        rx.await.map_err(|_| DiceyError::ConnRefused)?
    }

    pub async fn get(&self, path: impl Into<String>, selector: Selector) -> DiceyResult<Value> {
        self.request(path, selector, Op::Get, None).await
    }

    pub async fn set(&self, path: impl Into<String>, selector: Selector, value: Value) -> DiceyResult<Value> {
        self.request(path, selector, Op::Set, Some(value)).await
    }

    pub async fn exec(&self, path: impl Into<String>, selector: Selector, args: Value) -> DiceyResult<Value> {
        self.request(path, selector, Op::Exec, Some(args)).await
    }

    /// Subscribe to `Event` packets matching `path`/`selector`. Returns a
    /// channel that yields each event's payload value as it arrives.
    pub async fn subscribe(&self, path: impl Into<String>, selector: Selector) -> DiceyResult<mpsc::UnboundedReceiver<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.to_loop
            .send(LoopCommand::Subscribe {
                path: path.into(),
                selector,
                events: tx,
            })
            .map_err(|_| DiceyError::ConnRefused)?;
        Ok(rx)
    }

    pub fn close(&self) {
        let _ = self.to_loop.send(LoopCommand::Shutdown);
    }
}

/// A blocking facade over [`Client`], for callers outside an async
/// context. Owns a dedicated single-thread runtime so `connect`/`get`/
/// `set`/`exec` can be called without the caller ever touching `.await`.
pub struct SyncClient {
    inner: Client,
    rt: tokio::runtime::Runtime,
}

impl SyncClient {
    pub fn connect(address: &str) -> DiceyResult<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DiceyError::Transport(e.to_string()))?;
        let inner = rt.block_on(Client::connect(address))?;
        Ok(Self { inner, rt })
    }

    pub fn get(&self, path: impl Into<String>, selector: Selector) -> DiceyResult<Value> {
        self.rt.block_on(self.inner.get(path, selector))
    }

    pub fn set(&self, path: impl Into<String>, selector: Selector, value: Value) -> DiceyResult<Value> {
        self.rt.block_on(self.inner.set(path, selector, value))
    }

    pub fn exec(&self, path: impl Into<String>, selector: Selector, args: Value) -> DiceyResult<Value> {
        self.rt.block_on(self.inner.exec(path, selector, args))
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

/// Selector identity used to key the subscription table; `Selector`
/// itself doesn't implement `Hash`/`Eq` on its own derive list beyond
/// `PartialEq`, so subscriptions are keyed on the plain strings instead.
type SubscriptionKey = (String, String, String);

struct ClientLoop {
    read: transport::ReadHalf,
    write: transport::WriteHalf,
    buf: ChunkBuffer,
    pending: PendingIndex<oneshot::Sender<DiceyResult<Value>>>,
    subscriptions: HashMap<SubscriptionKey, Vec<mpsc::UnboundedSender<Value>>>,
}

impl ClientLoop {
    async fn run(mut self, mut from_client: mpsc::UnboundedReceiver<LoopCommand>) {
        loop {
            tokio::select! {
                cmd = from_client.recv() => {
                    match cmd {
                        Some(LoopCommand::Send { packet, reply }) => {
                            if let Some(tx) = reply {
                                let _ = self.pending.add(packet.seq(), tx);
                            }
                            if let Err(e) = transport::write_out(&mut self.write, &packet.encode()).await {
                                self.fail_all(e);
                                return;
                            }
                        }
                        Some(LoopCommand::Subscribe { path, selector, events }) => {
                            let key = (path, selector.trait_name, selector.element);
                            self.subscriptions.entry(key).or_default().push(events);
                        }
                        Some(LoopCommand::Shutdown) | None => {
                            let _ = transport::write_out(&mut self.write, &wire::packet::bye(0, ByeReason::Shutdown).encode()).await;
                            return;
                        }
                    }
                }
                result = transport::read_into(&mut self.read, &mut self.buf) => {
                    match result {
                        Ok(0) => {
                            self.fail_all(DiceyError::ConnRefused);
                            return;
                        }
                        Ok(_) => {
                            if let Err(e) = self.drain_packets() {
                                self.fail_all(e);
                                return;
                            }
                        }
                        Err(e) => {
                            self.fail_all(e);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn drain_packets(&mut self) -> DiceyResult<()> {
        loop {
            let view = crate::wire::view::View::new(self.buf.filled());
            match wire::load(&view)? {
                LoadOutcome::Again => return Ok(()),
                LoadOutcome::Loaded { packet, consumed } => {
                    self.buf.drain(consumed);
                    self.dispatch(packet);
                }
            }
        }
    }

    fn dispatch(&mut self, packet: Packet) {
        match packet {
            Packet::Message { seq, op: Op::Response, value, .. } => {
                if let Some(reply) = self.pending.complete(seq) {
                    let _ = reply.send(Ok(value.unwrap_or(Value::Unit)));
                }
            }
            Packet::Message { op: Op::Event, path, selector, value, .. } => {
                let key = (path, selector.trait_name, selector.element);
                if let Some(subscribers) = self.subscriptions.get_mut(&key) {
                    let payload = value.unwrap_or(Value::Unit);
                    subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
                }
            }
            Packet::Bye { reason, .. } => {
                debug!(?reason, "server closed the connection");
                self.fail_all(DiceyError::ConnRefused);
            }
            other => {
                warn!(?other, "ignoring unexpected packet from server");
            }
        }
    }

    fn fail_all(&mut self, err: DiceyError) {
        for (_, reply) in self.pending.prune(|_, _| true) {
            let _ = reply.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_key_groups_by_path_and_selector() {
        let k1: SubscriptionKey = ("/foo".into(), "Example".into(), "Changed".into());
        let k2: SubscriptionKey = ("/foo".into(), "Example".into(), "Changed".into());
        assert_eq!(k1, k2);
    }

    #[test]
    fn alloc_seq_starts_at_two_and_increments_by_two() {
        let counter = AtomicU32::new(FIRST_CLIENT_SEQ);
        let first = counter.fetch_add(2, Ordering::Relaxed);
        let second = counter.fetch_add(2, Ordering::Relaxed);
        assert_eq!(first, 2);
        assert_eq!(second, 4);
    }
}
