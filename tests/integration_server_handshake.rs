//! Exercises the raw `os_pipe`-to-`Stdio` wiring `server::plugin::spawn_child`
//! uses, independent of the full `PluginManager` (see
//! `integration_plugin_handshake.rs` for that): the parent plays the
//! manager's side of the handshake by hand, framing real `Packet`s with
//! `wire::load`/`ChunkBuffer` over the pipe instead of reading a bare
//! ready byte.

use dicey::builders::MessageBuilder;
use dicey::chunk::ChunkBuffer;
use dicey::registry::introspection::{PLUGIN_TRAIT, SERVER_PATH};
use dicey::server::plugin::PLUGIN_MANAGER_TRAIT;
use dicey::wire::{self, LoadOutcome, Op, Packet, Selector, Value};
use os_pipe::{pipe, PipeReader, PipeWriter};
use std::io::{Read, Write};
use std::process::{Command, Stdio};

const HALT_COMMAND: u8 = 0;

fn write_packet(writer: &mut PipeWriter, packet: &Packet) {
    writer.write_all(&packet.encode()).expect("write packet to child stdin");
    writer.flush().expect("flush child stdin");
}

fn read_packet(reader: &mut PipeReader, buf: &mut ChunkBuffer) -> Packet {
    let mut chunk = [0u8; 1024];
    loop {
        if let Ok(LoadOutcome::Loaded { packet, consumed }) = wire::load(&dicey::wire::view::View::new(buf.filled())) {
            buf.drain(consumed);
            return packet;
        }
        let n = reader.read(&mut chunk).expect("read from child stdout");
        assert_ne!(n, 0, "child closed stdout before sending a packet");
        buf.reserve(n).copy_from_slice(&chunk[..n]);
        buf.advance_filled(n);
    }
}

#[test]
fn plugin_handshake_packet_crosses_raw_os_pipe_wiring() {
    let (mut child_stdout_reader, child_stdout_writer) = pipe().expect("create stdout pipe");
    let (child_stdin_reader, mut child_stdin_writer) = pipe().expect("create stdin pipe");

    let plugin_path = env!("CARGO_BIN_EXE_demo-plugin");
    let mut child = Command::new(plugin_path)
        .arg("PipeDemo")
        .stdin(Stdio::from(child_stdin_reader))
        .stdout(Stdio::from(child_stdout_writer))
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn demo-plugin");

    let mut buf = ChunkBuffer::new();
    let handshake = read_packet(&mut child_stdout_reader, &mut buf);
    match handshake {
        Packet::Message { op: Op::Exec, ref path, ref selector, value: Some(Value::Str(ref name)), .. } => {
            assert_eq!(path, SERVER_PATH);
            assert_eq!(selector.trait_name, PLUGIN_MANAGER_TRAIT);
            assert_eq!(selector.element, "HandshakeInternal");
            assert_eq!(name, "PipeDemo");
        }
        other => panic!("expected a HandshakeInternal Exec packet, got {other:?}"),
    }

    let meta_path = "/dicey/plugins/PipeDemo".to_string();
    let response = MessageBuilder::new()
        .begin(Op::Response)
        .set_seq(0)
        .set_path(SERVER_PATH)
        .unwrap()
        .set_selector(Selector::new(PLUGIN_MANAGER_TRAIT, "HandshakeInternal").unwrap())
        .value(Value::Path(meta_path.clone()))
        .unwrap()
        .build()
        .unwrap();
    write_packet(&mut child_stdin_writer, &response);

    let halt = MessageBuilder::new()
        .begin(Op::Exec)
        .set_seq(0)
        .set_path(meta_path)
        .unwrap()
        .set_selector(Selector::new(PLUGIN_TRAIT, "Command").unwrap())
        .value(Value::Tuple(vec![Value::UInt64(1), Value::Byte(HALT_COMMAND), Value::Unit]))
        .unwrap()
        .build()
        .unwrap();
    write_packet(&mut child_stdin_writer, &halt);

    let status = child.wait().expect("wait for demo-plugin to exit");
    assert!(status.success(), "demo-plugin did not exit cleanly after Halt: {status:?}");
}
