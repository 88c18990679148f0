//! A minimal Dicey plugin (spec §4.10) used as an integration-test fixture
//! and as a runnable example of the handshake/command/reply cycle from the
//! child's side: it never touches a socket, only its own stdio.

use dicey::builders::MessageBuilder;
use dicey::chunk::ChunkBuffer;
use dicey::registry::introspection::{PLUGIN_TRAIT, SERVER_PATH};
use dicey::wire::{self, LoadOutcome, Op, Packet, Selector, Value};
use std::io::{Read, Write};

const PLUGIN_MANAGER_TRAIT: &str = "dicey.PluginManager";
const HALT_COMMAND: u8 = 0;

fn main() {
    let name = std::env::args().nth(1).unwrap_or_else(|| "DemoPlugin".to_string());

    let handshake = MessageBuilder::new()
        .begin(Op::Exec)
        .set_seq(1)
        .set_path(SERVER_PATH)
        .unwrap()
        .set_selector(Selector::new(PLUGIN_MANAGER_TRAIT, "HandshakeInternal").unwrap())
        .value(Value::Str(name))
        .unwrap()
        .build()
        .unwrap();
    write_packet(&handshake);

    let mut buf = ChunkBuffer::new();
    let path = match read_packet(&mut buf) {
        Some(Packet::Message { value: Some(Value::Path(p)), .. }) => p,
        _ => std::process::exit(1),
    };

    loop {
        let Some(packet) = read_packet(&mut buf) else { return };
        let Packet::Message { selector, value: Some(Value::Tuple(mut items)), .. } = packet else { continue };
        if selector.trait_name != PLUGIN_TRAIT || selector.element != "Command" || items.len() != 3 {
            continue;
        }
        let payload = items.pop().unwrap();
        let Value::Byte(command) = items.pop().unwrap() else { continue };
        let Value::UInt64(job_id) = items.pop().unwrap() else { continue };

        if command == HALT_COMMAND {
            return;
        }

        let result = match payload {
            Value::UInt64(n) => Value::UInt64(n + 1),
            other => other,
        };
        let reply = MessageBuilder::new()
            .begin(Op::Exec)
            .set_seq(0)
            .set_path(path.clone())
            .unwrap()
            .set_selector(Selector::new(PLUGIN_TRAIT, "Reply").unwrap())
            .value(Value::Pair(Box::new(Value::UInt64(job_id)), Box::new(result)))
            .unwrap()
            .build()
            .unwrap();
        write_packet(&reply);
    }
}

fn write_packet(packet: &Packet) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    out.write_all(&packet.encode()).unwrap();
    out.flush().unwrap();
}

fn read_packet(buf: &mut ChunkBuffer) -> Option<Packet> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Ok(LoadOutcome::Loaded { packet, consumed }) = wire::load(&dicey::wire::view::View::new(buf.filled())) {
            buf.drain(consumed);
            return Some(packet);
        }
        let n = std::io::stdin().read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.reserve(n).copy_from_slice(&chunk[..n]);
        buf.advance_filled(n);
    }
}
