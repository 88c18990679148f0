//! # Plugin Manager (component J, spec §4.10, optional)
//!
//! A plugin is an OS subprocess the server spawns and wires up to speak
//! Dicey over its own stdio: the child's stdout is the server's read half,
//! its stdin the server's write half (spec §4.10 calls for a pipe
//! "inherited on a fixed FD"; stdio redirection is the same idea without
//! the extra `dup2` plumbing, and is exactly the wiring
//! `tests/integration_server_handshake.rs` already exercises with
//! `os_pipe::pipe()` plus `Stdio::from_raw_fd`).
//!
//! Lifecycle (spec §3.4, §4.10): `Spawned -> Running -> Quitting ->
//! Complete|Failed`. A plugin becomes `Running` once it completes the
//! handshake (an `Exec` on `/dicey/server`'s `dicey.PluginManager/
//! HandshakeInternal`, carrying its self-declared PascalCase name) within
//! [`HANDSHAKE_TIMEOUT`]; it becomes `Quitting` once the manager sends it
//! a `Halt` command, and `Complete`/`Failed` once the child process exits.
//!
//! The wire protocol's `Op` enum has no distinct "signal" kind (spec
//! §4.2.2 only names Get/Set/Exec/Event/Response), so the work-dispatch
//! push this module calls `Command` is carried as an `Op::Event` sent
//! directly down the plugin's own pipe; the plugin answers with an
//! ordinary `Exec` against `Reply`.

use crate::chunk::ChunkBuffer;
use crate::error::{DiceyError, DiceyResult};
use crate::registry::introspection::{PLUGIN_TRAIT, SERVER_PATH};
use crate::server::ServerHandle;
use crate::wire::{self, ErrorValue, LoadOutcome, Op, Packet, Selector, Value};
use os_pipe::{pipe, PipeReader, PipeWriter};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);
pub const QUIT_TIMEOUT: Duration = Duration::from_millis(1000);

pub const PLUGIN_MANAGER_TRAIT: &str = "dicey.PluginManager";
const HANDSHAKE_SELECTOR: &str = "HandshakeInternal";
const LIST_PLUGINS_SELECTOR: &str = "ListPlugins";
const REPLY_SELECTOR: &str = "Reply";
const COMMAND_SELECTOR: &str = "Command";
const HALT_COMMAND: u8 = 0;
const HALT_JOB_ID: u64 = u64::MAX;

pub type PluginId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Spawned,
    Running,
    Quitting,
    Complete,
    Failed,
}

/// Lifecycle notifications (spec §4.10's plugin events).
#[derive(Debug, Clone)]
pub enum PluginEvent {
    Spawned(PluginId),
    Ready(String),
    Terminated(String),
    Quitting(String),
    Quit(String),
    Failed(String),
    Unresponsive(String),
}

/// Validate a plugin's self-declared name against the PascalCase rule
/// (spec §4.10's handshake step): starts with an uppercase ASCII letter,
/// every character alphanumeric.
fn is_pascal_case(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric())
}

fn error_value(e: &DiceyError) -> Value {
    Value::Error(ErrorValue {
        code: e.code(),
        message: e.to_string(),
    })
}

struct PluginRecord {
    name: Option<String>,
    state: PluginState,
    child: Child,
    writer: PipeWriter,
    jobs: HashMap<u64, oneshot::Sender<Value>>,
    next_job_id: u64,
}

impl PluginRecord {
    fn send(&mut self, packet: Packet) -> DiceyResult<()> {
        self.writer
            .write_all(&packet.encode())
            .and_then(|_| self.writer.flush())
            .map_err(|e| DiceyError::Transport(e.to_string()))
    }

    fn path(&self) -> Option<String> {
        self.name.as_ref().map(|n| format!("/dicey/plugins/{n}"))
    }
}

enum PluginCommand {
    Inbound {
        id: PluginId,
        packet: Packet,
    },
    ChildExited {
        id: PluginId,
        success: bool,
    },
    SendCommand {
        name: String,
        command: u8,
        payload: Value,
        reply: oneshot::Sender<DiceyResult<Value>>,
    },
    Quit {
        name: String,
    },
    ListPlugins {
        reply: oneshot::Sender<Vec<(String, String)>>,
    },
}

struct SpawnRequest {
    path: String,
    reply: oneshot::Sender<DiceyResult<PluginId>>,
}

/// The public, cloneable handle application code uses to spawn and drive
/// plugins (spec §4.10). Every clone talks to the same manager task.
#[derive(Clone)]
pub struct PluginManagerHandle {
    commands: mpsc::UnboundedSender<PluginCommand>,
    spawner: mpsc::UnboundedSender<SpawnRequest>,
}

impl PluginManagerHandle {
    pub async fn spawn(&self, path: impl Into<String>) -> DiceyResult<PluginId> {
        let (reply, rx) = oneshot::channel();
        self.spawner
            .send(SpawnRequest { path: path.into(), reply })
            .map_err(|_| DiceyError::NotFound)?;
        rx.await.map_err(|_| DiceyError::NotFound)?
    }

    pub async fn send_command(&self, name: impl Into<String>, command: u8, payload: Value) -> DiceyResult<Value> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PluginCommand::SendCommand {
                name: name.into(),
                command,
                payload,
                reply,
            })
            .map_err(|_| DiceyError::PeerNotFound)?;
        rx.await.map_err(|_| DiceyError::PeerNotFound)?
    }

    pub fn quit(&self, name: impl Into<String>) {
        let _ = self.commands.send(PluginCommand::Quit { name: name.into() });
    }

    pub async fn list_plugins(&self) -> Vec<(String, String)> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(PluginCommand::ListPlugins { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

/// Start the plugin manager task and return its handle plus an event
/// stream of lifecycle notifications.
pub fn start(registry: ServerHandle) -> (PluginManagerHandle, mpsc::UnboundedReceiver<PluginEvent>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (spawner_tx, spawner_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    tokio::spawn(manager_task(registry, commands_tx.clone(), commands_rx, spawner_rx, events_tx));

    (
        PluginManagerHandle {
            commands: commands_tx,
            spawner: spawner_tx,
        },
        events_rx,
    )
}

/// Spawn one child wired to a pair of OS pipes on its stdio, and a reader
/// thread forwarding its parsed Dicey packets into `commands`.
fn spawn_child(id: PluginId, path: &str, commands: mpsc::UnboundedSender<PluginCommand>) -> DiceyResult<PluginRecord> {
    let (child_stdout_reader, child_stdout_writer) = pipe().map_err(|e| DiceyError::Transport(e.to_string()))?;
    let (child_stdin_reader, child_stdin_writer) = pipe().map_err(|e| DiceyError::Transport(e.to_string()))?;

    let mut cmd = Command::new(path);
    cmd.stdin(Stdio::from(child_stdin_reader))
        .stdout(Stdio::from(child_stdout_writer))
        .stderr(Stdio::null());
    let child = cmd.spawn().map_err(|e| DiceyError::Transport(e.to_string()))?;

    std::thread::spawn(move || reader_thread(id, child_stdout_reader, commands));

    Ok(PluginRecord {
        name: None,
        state: PluginState::Spawned,
        child,
        writer: child_stdin_writer,
        jobs: HashMap::new(),
        next_job_id: 1,
    })
}

/// Blocking read loop run on a dedicated OS thread, since `os_pipe` handles
/// are plain blocking file descriptors; mirrors
/// `crate::transport::read_into`'s "read some bytes, try to load a packet"
/// shape without the async executor.
fn reader_thread(id: PluginId, mut reader: PipeReader, commands: mpsc::UnboundedSender<PluginCommand>) {
    let mut buf = ChunkBuffer::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) | Err(_) => {
                let _ = commands.send(PluginCommand::ChildExited { id, success: false });
                return;
            }
            Ok(n) => n,
        };
        buf.reserve(n).copy_from_slice(&chunk[..n]);
        buf.advance_filled(n);

        loop {
            match wire::load(&crate::wire::view::View::new(buf.filled())) {
                Ok(LoadOutcome::Again) => break,
                Ok(LoadOutcome::Loaded { packet, consumed }) => {
                    buf.drain(consumed);
                    if commands.send(PluginCommand::Inbound { id, packet }).is_err() {
                        return;
                    }
                }
                Err(_) => {
                    let _ = commands.send(PluginCommand::ChildExited { id, success: false });
                    return;
                }
            }
        }
    }
}

async fn manager_task(
    registry: ServerHandle,
    commands_tx: mpsc::UnboundedSender<PluginCommand>,
    mut commands_rx: mpsc::UnboundedReceiver<PluginCommand>,
    mut spawner_rx: mpsc::UnboundedReceiver<SpawnRequest>,
    events: mpsc::UnboundedSender<PluginEvent>,
) {
    let mut plugins: HashMap<PluginId, PluginRecord> = HashMap::new();
    let mut names: HashMap<String, PluginId> = HashMap::new();
    let mut next_id: PluginId = 1;

    ensure_plugin_manager_trait(&registry).await;

    loop {
        tokio::select! {
            request = spawner_rx.recv() => {
                let Some(request) = request else { break };
                let id = next_id;
                next_id += 1;
                match spawn_child(id, &request.path, commands_tx.clone()) {
                    Ok(record) => {
                        plugins.insert(id, record);
                        let _ = events.send(PluginEvent::Spawned(id));
                        let commands_tx = commands_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(HANDSHAKE_TIMEOUT).await;
                            let _ = commands_tx.send(PluginCommand::ChildExited { id, success: false });
                        });
                        let _ = request.reply.send(Ok(id));
                    }
                    Err(e) => {
                        let _ = request.reply.send(Err(e));
                    }
                }
            }
            command = commands_rx.recv() => {
                let Some(command) = command else { break };
                match command {
                    PluginCommand::Inbound { id, packet } => {
                        handle_inbound(id, packet, &mut plugins, &mut names, &registry, &events).await;
                    }
                    PluginCommand::ChildExited { id, success } => {
                        handle_exit(id, success, &mut plugins, &mut names, &events);
                    }
                    PluginCommand::SendCommand { name, command, payload, reply } => {
                        match send_command(&name, command, payload, &mut plugins, &names) {
                            Ok(rx) => {
                                tokio::spawn(async move {
                                    let _ = reply.send(rx.await.map_err(|_| DiceyError::PeerNotFound));
                                });
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    PluginCommand::Quit { name } => {
                        quit_plugin(&name, &mut plugins, &names, &events, &commands_tx)
                    }
                    PluginCommand::ListPlugins { reply } => {
                        let list = names
                            .iter()
                            .filter_map(|(n, id)| plugins.get(id).map(|p| (n.clone(), p.path().unwrap_or_default())))
                            .collect();
                        let _ = reply.send(list);
                    }
                }
            }
        }
    }
}

async fn ensure_plugin_manager_trait(registry: &ServerHandle) {
    use crate::registry::{Element, ElementKind, Trait};

    let trait_ = Trait::new(PLUGIN_MANAGER_TRAIT)
        .with_element(Element::new(LIST_PLUGINS_SELECTOR, ElementKind::Operation, "$ -> [(ss)]").expect("valid signature"))
        .with_element(Element::new(HANDSHAKE_SELECTOR, ElementKind::Operation, "s -> @").expect("valid signature"));
    if let Err(e) = registry.add_trait(trait_).await {
        debug!("dicey.PluginManager trait already present: {e}");
    }
}

async fn handle_inbound(
    id: PluginId,
    packet: Packet,
    plugins: &mut HashMap<PluginId, PluginRecord>,
    names: &mut HashMap<String, PluginId>,
    registry: &ServerHandle,
    events: &mpsc::UnboundedSender<PluginEvent>,
) {
    let Packet::Message { seq, op, path, selector, value } = packet else {
        return;
    };
    if op != Op::Exec {
        return;
    }

    if path == SERVER_PATH && selector.trait_name == PLUGIN_MANAGER_TRAIT && selector.element == HANDSHAKE_SELECTOR {
        handshake(id, seq, value, plugins, names, registry, events).await;
        return;
    }

    if selector.trait_name == PLUGIN_TRAIT && selector.element == REPLY_SELECTOR {
        complete_job(id, value, plugins);
    }
}

fn handshake_response(seq: u32, value: Value) -> Packet {
    Packet::Message {
        seq,
        op: Op::Response,
        path: SERVER_PATH.to_string(),
        selector: Selector::new(PLUGIN_MANAGER_TRAIT, HANDSHAKE_SELECTOR).expect("valid selector"),
        value: Some(value),
    }
}

async fn handshake(
    id: PluginId,
    seq: u32,
    value: Option<Value>,
    plugins: &mut HashMap<PluginId, PluginRecord>,
    names: &mut HashMap<String, PluginId>,
    registry: &ServerHandle,
    events: &mpsc::UnboundedSender<PluginEvent>,
) {
    let Some(record) = plugins.get_mut(&id) else { return };

    let name = match value {
        Some(Value::Str(s)) if is_pascal_case(&s) => s,
        Some(Value::Str(s)) => {
            let _ = record.send(handshake_response(seq, error_value(&DiceyError::PluginInvalidName(s))));
            return;
        }
        _ => {
            let _ = record.send(handshake_response(seq, error_value(&DiceyError::ValueTypeMismatch)));
            return;
        }
    };

    let path = format!("/dicey/plugins/{name}");
    let mut traits = std::collections::HashSet::new();
    traits.insert(PLUGIN_TRAIT.to_string());
    if let Err(e) = registry.add_object(path.clone(), traits).await {
        let _ = record.send(handshake_response(seq, error_value(&e)));
        return;
    }

    record.name = Some(name.clone());
    record.state = PluginState::Running;
    names.insert(name.clone(), id);

    let _ = record.send(handshake_response(seq, Value::Path(path)));

    info!("plugin {name} completed handshake");
    let _ = events.send(PluginEvent::Ready(name));
}

fn complete_job(id: PluginId, value: Option<Value>, plugins: &mut HashMap<PluginId, PluginRecord>) {
    let Some(record) = plugins.get_mut(&id) else { return };
    let Some(Value::Pair(job_id, result)) = value else { return };
    let Value::UInt64(job_id) = *job_id else { return };
    if let Some(sender) = record.jobs.remove(&job_id) {
        let _ = sender.send(*result);
    }
}

fn send_command(
    name: &str,
    command: u8,
    payload: Value,
    plugins: &mut HashMap<PluginId, PluginRecord>,
    names: &HashMap<String, PluginId>,
) -> DiceyResult<oneshot::Receiver<Value>> {
    let id = *names.get(name).ok_or(DiceyError::PeerNotFound)?;
    let record = plugins.get_mut(&id).ok_or(DiceyError::PeerNotFound)?;
    let Some(path) = record.path() else {
        return Err(DiceyError::PeerNotFound);
    };

    let job_id = record.next_job_id;
    record.next_job_id += 1;
    let (tx, rx) = oneshot::channel();
    record.jobs.insert(job_id, tx);

    record.send(Packet::Message {
        seq: 0,
        op: Op::Event,
        path,
        selector: Selector::new(PLUGIN_TRAIT, COMMAND_SELECTOR).expect("valid selector"),
        value: Some(Value::Tuple(vec![Value::UInt64(job_id), Value::Byte(command), payload])),
    })?;
    Ok(rx)
}

fn quit_plugin(
    name: &str,
    plugins: &mut HashMap<PluginId, PluginRecord>,
    names: &HashMap<String, PluginId>,
    events: &mpsc::UnboundedSender<PluginEvent>,
    commands: &mpsc::UnboundedSender<PluginCommand>,
) {
    let Some(&id) = names.get(name) else { return };
    let Some(record) = plugins.get_mut(&id) else { return };
    let _ = record.send(Packet::Message {
        seq: 0,
        op: Op::Event,
        path: record.path().unwrap_or_default(),
        selector: Selector::new(PLUGIN_TRAIT, COMMAND_SELECTOR).expect("valid selector"),
        value: Some(Value::Tuple(vec![Value::UInt64(HALT_JOB_ID), Value::Byte(HALT_COMMAND), Value::Unit])),
    });
    record.state = PluginState::Quitting;
    let _ = events.send(PluginEvent::Quitting(name.to_string()));

    // Arm a kill timer (spec §4.10): if the plugin hasn't exited on its own
    // by QUIT_TIMEOUT, force it. `handle_exit`'s `child.kill()` is a no-op
    // on an already-exited child, so this is safe to fire unconditionally.
    let commands = commands.clone();
    tokio::spawn(async move {
        tokio::time::sleep(QUIT_TIMEOUT).await;
        let _ = commands.send(PluginCommand::ChildExited { id, success: true });
    });
}

fn handle_exit(
    id: PluginId,
    success: bool,
    plugins: &mut HashMap<PluginId, PluginRecord>,
    names: &mut HashMap<String, PluginId>,
    events: &mpsc::UnboundedSender<PluginEvent>,
) {
    let Some(mut record) = plugins.remove(&id) else { return };
    let _ = record.child.kill();
    let _ = record.child.wait();

    let label = record.name.clone().unwrap_or_else(|| format!("plugin-{id}"));
    if let Some(name) = &record.name {
        names.remove(name);
    }

    match record.state {
        PluginState::Spawned => {
            warn!("plugin {label} never completed the handshake within {:?}", HANDSHAKE_TIMEOUT);
            let _ = events.send(PluginEvent::Unresponsive(label));
        }
        PluginState::Quitting if success => {
            let _ = events.send(PluginEvent::Quit(label));
        }
        _ if success => {
            let _ = events.send(PluginEvent::Terminated(label));
        }
        _ => {
            let _ = events.send(PluginEvent::Failed(label));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_case_accepts_only_capitalized_alphanumeric_names() {
        assert!(is_pascal_case("Accelerometer"));
        assert!(is_pascal_case("Gpu0"));
        assert!(!is_pascal_case("gpu"));
        assert!(!is_pascal_case(""));
        assert!(!is_pascal_case("Bad-Name"));
    }

    #[test]
    fn plugin_record_path_is_none_before_handshake() {
        let (_reader, writer) = pipe().unwrap();
        let child = Command::new("true")
            .spawn()
            .unwrap_or_else(|_| Command::new("sh").arg("-c").arg("exit 0").spawn().unwrap());
        let record = PluginRecord {
            name: None,
            state: PluginState::Spawned,
            child,
            writer,
            jobs: HashMap::new(),
            next_job_id: 1,
        };
        assert_eq!(record.path(), None);
    }
}
