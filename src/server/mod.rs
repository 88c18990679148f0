//! # Server Core
//!
//! The server is split into two cooperating halves: a plain
//! accept-loop-spawns-per-connection-tasks listener, plus a single actor
//! task that owns the [`Registry`] and the subscription table, so mutating
//! calls from every client connection serialize through one MPSC queue
//! instead of a shared `Mutex`.
//!
//! - [`accept_loop`] owns the [`crate::transport::Listener`] and spawns one
//!   [`client_task`] per accepted connection.
//! - Each `client_task` owns its connection's read half and an outbound
//!   writer task (its write half), performs the Hello handshake, and
//!   forwards `Get`/`Set`/`Exec` messages to the registry actor as
//!   [`RegistryCommand::Submission`]s, carrying a reply channel back to its
//!   own writer.
//! - [`registry_actor`] is the only task that ever mutates the [`Registry`]
//!   or the subscription table; [`ServerHandle`] is the public, cloneable,
//!   `Send` handle application code uses to register objects/traits and
//!   publish events from any task.

pub mod plugin;

use crate::chunk::ChunkBuffer;
use crate::error::{DiceyError, DiceyResult};
use crate::registry::introspection::{self, SERVER_PATH, SERVER_TRAIT};
use crate::registry::{ElementKind, Registry, Trait};
use crate::transport::{self, Connection, Listener};
use crate::wire::{self, ByeReason, ErrorValue, LoadOutcome, Op, Packet, Selector, Value, PROTOCOL_VERSION};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

pub type ClientId = u64;
type SubscriptionKey = (String, String, String);
type ExecHandler = Box<dyn Fn(Option<&Value>) -> DiceyResult<Value> + Send + Sync>;

fn error_value(e: &DiceyError) -> Value {
    Value::Error(ErrorValue {
        code: e.code(),
        message: e.to_string(),
    })
}

fn subscription_key(path: &str, selector: &Selector) -> SubscriptionKey {
    (path.to_string(), selector.trait_name.clone(), selector.element.clone())
}

struct Submission {
    client: ClientId,
    packet: Packet,
    reply: mpsc::UnboundedSender<Vec<u8>>,
}

enum RegistryCommand {
    Submission(Submission),
    ClientConnected {
        id: ClientId,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    },
    ClientDisconnected {
        id: ClientId,
    },
    AddObject {
        path: String,
        traits: HashSet<String>,
        reply: oneshot::Sender<DiceyResult<()>>,
    },
    AddTrait {
        trait_: Trait,
        reply: oneshot::Sender<DiceyResult<()>>,
    },
    DeleteObject {
        path: String,
        reply: oneshot::Sender<DiceyResult<()>>,
    },
    RegisterHandler {
        path: String,
        selector: Selector,
        handler: ExecHandler,
        reply: oneshot::Sender<DiceyResult<()>>,
    },
    PublishEvent {
        path: String,
        selector: Selector,
        value: Value,
    },
    Shutdown,
}

/// A cloneable, `Send` handle to a running server (spec §3.6). Every clone
/// talks to the same [`registry_actor`] task.
#[derive(Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<RegistryCommand>,
}

impl ServerHandle {
    pub async fn add_trait(&self, trait_: Trait) -> DiceyResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::AddTrait { trait_, reply })
            .map_err(|_| DiceyError::NotFound)?;
        rx.await.map_err(|_| DiceyError::NotFound)?
    }

    pub async fn add_object(&self, path: impl Into<String>, traits: HashSet<String>) -> DiceyResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::AddObject {
                path: path.into(),
                traits,
                reply,
            })
            .map_err(|_| DiceyError::NotFound)?;
        rx.await.map_err(|_| DiceyError::NotFound)?
    }

    pub async fn delete_object(&self, path: impl Into<String>) -> DiceyResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::DeleteObject { path: path.into(), reply })
            .map_err(|_| DiceyError::NotFound)?;
        rx.await.map_err(|_| DiceyError::NotFound)?
    }

    /// Register the closure that serves `Exec` calls against a
    /// non-built-in operation (spec §3.3: application-defined elements).
    pub async fn register_handler(
        &self,
        path: impl Into<String>,
        selector: Selector,
        handler: impl Fn(Option<&Value>) -> DiceyResult<Value> + Send + Sync + 'static,
    ) -> DiceyResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RegistryCommand::RegisterHandler {
                path: path.into(),
                selector,
                handler: Box::new(handler),
                reply,
            })
            .map_err(|_| DiceyError::NotFound)?;
        rx.await.map_err(|_| DiceyError::NotFound)?
    }

    /// Push an `Event` packet to every client currently subscribed to
    /// `path`/`selector` (spec §4.9's subscription-based dispatch).
    pub fn publish_event(&self, path: impl Into<String>, selector: Selector, value: Value) {
        let _ = self.commands.send(RegistryCommand::PublishEvent {
            path: path.into(),
            selector,
            value,
        });
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(RegistryCommand::Shutdown);
    }
}

/// Bind a listener at `address` and start the accept loop and registry
/// actor, returning a handle application code drives (spec §3.6).
pub async fn serve(address: &str) -> DiceyResult<ServerHandle> {
    let listener = Listener::bind(address).await?;
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    tokio::spawn(accept_loop(listener, commands_tx.clone()));
    tokio::spawn(registry_actor(commands_rx));

    Ok(ServerHandle { commands: commands_tx })
}

async fn accept_loop(listener: Listener, commands: mpsc::UnboundedSender<RegistryCommand>) {
    let next_id = Arc::new(AtomicU64::new(1));
    loop {
        match listener.accept().await {
            Ok(conn) => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(client_task(id, conn, commands.clone()));
            }
            Err(e) => {
                error!("accept failed: {e}");
                break;
            }
        }
    }
}

async fn client_task(id: ClientId, mut conn: Connection, commands: mpsc::UnboundedSender<RegistryCommand>) {
    let mut buf = ChunkBuffer::new();

    // Handshake: read the client's Hello, reject if its version is too old.
    let client_version = loop {
        match conn.read_into(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        match wire::load(&crate::wire::view::View::new(buf.filled())) {
            Ok(LoadOutcome::Again) => continue,
            Ok(LoadOutcome::Loaded { packet: Packet::Hello { version, .. }, consumed }) => {
                buf.drain(consumed);
                break version;
            }
            _ => return,
        }
    };
    if client_version < PROTOCOL_VERSION {
        let _ = conn
            .write_all(&wire::packet::bye(0, ByeReason::Error).encode())
            .await;
        return;
    }
    if conn
        .write_all(&wire::packet::hello(0, PROTOCOL_VERSION).encode())
        .await
        .is_err()
    {
        return;
    }

    let (mut read, write) = conn.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer = tokio::spawn(async move {
        let mut write = write;
        while let Some(bytes) = outbound_rx.recv().await {
            if transport::write_out(&mut write, &bytes).await.is_err() {
                break;
            }
        }
    });

    let _ = commands.send(RegistryCommand::ClientConnected {
        id,
        sender: outbound_tx.clone(),
    });

    loop {
        match transport::read_into(&mut read, &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        loop {
            match wire::load(&crate::wire::view::View::new(buf.filled())) {
                Ok(LoadOutcome::Again) => break,
                Ok(LoadOutcome::Loaded { packet, consumed }) => {
                    buf.drain(consumed);
                    if matches!(packet, Packet::Bye { .. }) {
                        let _ = commands.send(RegistryCommand::ClientDisconnected { id });
                        writer.abort();
                        return;
                    }
                    if !matches!(packet, Packet::Message { op, .. } if op.client_originated()) {
                        debug!("ignoring non-request packet from client {id}");
                        continue;
                    }
                    let _ = commands.send(RegistryCommand::Submission(Submission {
                        client: id,
                        packet,
                        reply: outbound_tx.clone(),
                    }));
                }
                Err(_) => {
                    let _ = commands.send(RegistryCommand::ClientDisconnected { id });
                    writer.abort();
                    return;
                }
            }
        }
    }

    let _ = commands.send(RegistryCommand::ClientDisconnected { id });
    writer.abort();
}

async fn registry_actor(mut commands: mpsc::UnboundedReceiver<RegistryCommand>) {
    let mut registry = Registry::new();
    let mut properties: HashMap<SubscriptionKey, Value> = HashMap::new();
    let mut handlers: HashMap<SubscriptionKey, ExecHandler> = HashMap::new();
    let mut subscriptions: HashMap<SubscriptionKey, HashSet<ClientId>> = HashMap::new();
    let mut client_senders: HashMap<ClientId, mpsc::UnboundedSender<Vec<u8>>> = HashMap::new();
    let next_event_seq = AtomicU32::new(1);

    while let Some(command) = commands.recv().await {
        match command {
            RegistryCommand::ClientConnected { id, sender } => {
                client_senders.insert(id, sender);
            }
            RegistryCommand::ClientDisconnected { id } => {
                client_senders.remove(&id);
                for subscribers in subscriptions.values_mut() {
                    subscribers.remove(&id);
                }
            }
            RegistryCommand::AddObject { path, traits, reply } => {
                let _ = reply.send(registry.add_object(path, traits));
            }
            RegistryCommand::AddTrait { trait_, reply } => {
                let _ = reply.send(registry.add_trait(trait_));
            }
            RegistryCommand::DeleteObject { path, reply } => {
                let _ = reply.send(registry.delete_object(&path));
            }
            RegistryCommand::RegisterHandler { path, selector, handler, reply } => {
                handlers.insert(subscription_key(&path, &selector), handler);
                let _ = reply.send(Ok(()));
            }
            RegistryCommand::PublishEvent { path, selector, value } => {
                let key = subscription_key(&path, &selector);
                let Some(subscribers) = subscriptions.get(&key) else { continue };
                let seq = next_event_seq.fetch_add(2, Ordering::Relaxed);
                let packet = Packet::Message {
                    seq,
                    op: Op::Event,
                    path,
                    selector,
                    value: Some(value),
                };
                let bytes = packet.encode();
                for client in subscribers {
                    if let Some(sender) = client_senders.get(client) {
                        let _ = sender.send(bytes.clone());
                    }
                }
            }
            RegistryCommand::Submission(submission) => {
                handle_submission(
                    submission,
                    &mut registry,
                    &mut properties,
                    &handlers,
                    &mut subscriptions,
                );
            }
            RegistryCommand::Shutdown => break,
        }
    }
    info!("registry actor exiting");
}

fn handle_submission(
    submission: Submission,
    registry: &mut Registry,
    properties: &mut HashMap<SubscriptionKey, Value>,
    handlers: &HashMap<SubscriptionKey, ExecHandler>,
    subscriptions: &mut HashMap<SubscriptionKey, HashSet<ClientId>>,
) {
    let Packet::Message { seq, op, path, selector, value } = submission.packet else {
        return;
    };

    let result = respond(op, &path, &selector, value, registry, properties, handlers, subscriptions, submission.client);
    let response = Packet::Message {
        seq,
        op: Op::Response,
        path,
        selector,
        value: Some(match result {
            Ok(v) => v,
            Err(e) => error_value(&e),
        }),
    };
    let _ = submission.reply.send(response.encode());
}

#[allow(clippy::too_many_arguments)]
fn respond(
    op: Op,
    path: &str,
    selector: &Selector,
    input: Option<Value>,
    registry: &mut Registry,
    properties: &mut HashMap<SubscriptionKey, Value>,
    handlers: &HashMap<SubscriptionKey, ExecHandler>,
    subscriptions: &mut HashMap<SubscriptionKey, HashSet<ClientId>>,
    client: ClientId,
) -> DiceyResult<Value> {
    if op == Op::Exec && path == SERVER_PATH && selector.trait_name == SERVER_TRAIT {
        if selector.element == "Subscribe" || selector.element == "Unsubscribe" {
            return handle_subscription_request(input, subscriptions, client, selector.element == "Subscribe");
        }
    }

    let element = registry.validate_op(path, selector, op)?.clone();
    let key = subscription_key(path, selector);

    match op {
        Op::Get => {
            if let Some(builtin) = element.builtin {
                introspection::dispatch(builtin, registry, path, None)
            } else {
                properties.get(&key).cloned().ok_or(DiceyError::NotFound)
            }
        }
        Op::Set => {
            let value = input.ok_or(DiceyError::Inval("Set requires a value".into()))?;
            if !crate::wire::value_matches(&value, &element.signature.input) {
                return Err(DiceyError::ValueTypeMismatch);
            }
            properties.insert(key, value);
            Ok(Value::Unit)
        }
        Op::Exec => {
            if let Some(builtin) = element.builtin {
                introspection::dispatch(builtin, registry, path, input.as_ref())
            } else if let Some(handler) = handlers.get(&key) {
                handler(input.as_ref())
            } else {
                Err(DiceyError::NotFound)
            }
        }
        Op::Event | Op::Response => Err(DiceyError::Inval("unexpected op kind at server".into())),
    }
}

fn handle_subscription_request(
    input: Option<Value>,
    subscriptions: &mut HashMap<SubscriptionKey, HashSet<ClientId>>,
    client: ClientId,
    subscribe: bool,
) -> DiceyResult<Value> {
    let (target_path, target_selector) = match input {
        Some(Value::Pair(a, b)) => match (*a, *b) {
            (Value::Path(p), Value::Selector(s)) => (p, s),
            _ => return Err(DiceyError::ValueTypeMismatch),
        },
        _ => return Err(DiceyError::ValueTypeMismatch),
    };
    let key = subscription_key(&target_path, &target_selector);
    if subscribe {
        subscriptions.entry(key).or_default().insert(client);
    } else if let Some(subscribers) = subscriptions.get_mut(&key) {
        subscribers.remove(&client);
    }
    Ok(Value::Unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Element;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn client_can_round_trip_a_registered_property() {
        let path = format!("/tmp/dicey-server-test-{}.sock", std::process::id());
        let _ = std::fs::remove_file(&path);
        let handle = serve(&path).await.unwrap();

        handle
            .add_trait(Trait::new("Example").with_element(Element::new("Name", ElementKind::Property, "s").unwrap()))
            .await
            .unwrap();
        let mut traits = HashSet::new();
        traits.insert("Example".to_string());
        handle.add_object("/greeter", traits).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let client = crate::client::Client::connect(&path).await.unwrap();
        let selector = Selector::new("Example", "Name").unwrap();
        client.set("/greeter", selector.clone(), Value::Str("hi".into())).await.unwrap();
        let got = timeout(Duration::from_secs(1), client.get("/greeter", selector)).await.unwrap().unwrap();
        assert_eq!(got, Value::Str("hi".into()));

        handle.shutdown();
        let _ = std::fs::remove_file(&path);
    }
}
