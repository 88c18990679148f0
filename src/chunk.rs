//! # Per-Connection Inbound Chunk Buffer
//!
//! A single growable byte buffer holding unconsumed bytes read off a
//! connection's transport. `reserve` grows the buffer (1 KiB initial, 1.5x
//! growth) until at least `min` additional bytes of tail space exist, and
//! returns that tail as a writable slice for the next `AsyncRead::read`
//! call: grow, hand back a `&mut [u8]` slice, let the caller fill it,
//! decoupled from a specific socket type so the server/client event loops
//! can drive it directly against `tokio::net::UnixStream`.
//!
//! Reads never move a cursor: the filled prefix is handed whole to
//! `wire::packet::load`, and `drain` removes only the bytes `load` reported
//! consumed.

const INITIAL_CAPACITY: usize = 1024;
const GROWTH_FACTOR: f64 = 1.5;

/// A growable per-connection inbound byte buffer (spec §4.6).
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    buf: Vec<u8>,
    filled: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            filled: 0,
        }
    }

    /// The filled prefix: bytes read from the transport but not yet
    /// consumed by a successful `wire::packet::load`.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub fn filled_len(&self) -> usize {
        self.filled
    }

    /// Ensure at least `min` bytes of writable tail space exist after the
    /// filled prefix, growing by 1.5x (starting from 1 KiB) as needed, and
    /// return that tail as a mutable slice.
    pub fn reserve(&mut self, min: usize) -> &mut [u8] {
        let needed = self.filled + min;
        if self.buf.len() < needed {
            let mut new_cap = self.buf.len().max(INITIAL_CAPACITY);
            while new_cap < needed {
                new_cap = ((new_cap as f64) * GROWTH_FACTOR).ceil() as usize;
            }
            self.buf.resize(new_cap, 0);
        }
        &mut self.buf[self.filled..self.filled + min]
    }

    /// Record that `n` more bytes were written into the tail most recently
    /// returned by `reserve`.
    pub fn advance_filled(&mut self, n: usize) {
        self.filled += n;
        debug_assert!(self.filled <= self.buf.len());
    }

    /// Drop `n` consumed bytes from the front of the filled prefix,
    /// shifting any remainder down. Called with the `consumed` count from
    /// `wire::packet::LoadOutcome::Loaded` after each successfully parsed
    /// packet.
    pub fn drain(&mut self, n: usize) {
        debug_assert!(n <= self.filled);
        self.buf.copy_within(n..self.filled, 0);
        self.filled -= n;
    }

    /// Reset the buffer to empty, as spec §4.6 describes for "after a
    /// complete packet is drained" — equivalent to `drain(self.filled_len())`
    /// but avoids the no-op copy.
    pub fn clear(&mut self) {
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_grows_from_initial_capacity() {
        let mut cb = ChunkBuffer::new();
        let tail = cb.reserve(4);
        assert!(tail.len() >= 4);
    }

    #[test]
    fn advance_then_drain_shifts_remainder() {
        let mut cb = ChunkBuffer::new();
        {
            let tail = cb.reserve(5);
            tail[..5].copy_from_slice(b"hello");
        }
        cb.advance_filled(5);
        assert_eq!(cb.filled(), b"hello");

        cb.drain(2);
        assert_eq!(cb.filled(), b"llo");
    }

    #[test]
    fn clear_resets_without_shifting() {
        let mut cb = ChunkBuffer::new();
        {
            let tail = cb.reserve(3);
            tail[..3].copy_from_slice(b"abc");
        }
        cb.advance_filled(3);
        cb.clear();
        assert_eq!(cb.filled_len(), 0);
    }

    #[test]
    fn reserve_past_initial_capacity_grows_by_factor() {
        let mut cb = ChunkBuffer::new();
        let _ = cb.reserve(4096);
        assert!(cb.buf.len() >= 4096);
    }
}
