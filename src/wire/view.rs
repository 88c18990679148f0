//! # Read/Write Cursors Over Byte Buffers
//!
//! `View` and `MutView` are thin cursors over borrowed byte slices. They
//! exist so the streaming parser (`wire::packet::load`) and the builders
//! (`crate::builders`) never copy more than once: a `View` walks an
//! already-received buffer without taking ownership of it, and a `MutView`
//! walks a caller-owned scratch buffer while it is filled in.
//!
//! Reading directly off a borrowed slice avoids an intermediate `Vec`
//! shuffle; the same zero-copy discipline applies one level down, at the
//! byte-slice level, since the wire parser has to tolerate partial reads.

use crate::error::{DiceyError, DiceyResult};

/// A borrowed, advance-only read cursor over a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct View<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> View<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes remaining to be read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Advance the cursor by `n` bytes without reading them.
    pub fn advance(&mut self, n: usize) -> DiceyResult<()> {
        if n > self.remaining() {
            return Err(DiceyError::Overflow);
        }
        self.pos += n;
        Ok(())
    }

    /// Peek at the next `n` bytes without advancing.
    pub fn peek(&self, n: usize) -> DiceyResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(DiceyError::Overflow);
        }
        Ok(&self.data[self.pos..self.pos + n])
    }

    /// Read exactly `dst.len()` bytes, advancing the cursor.
    pub fn read(&mut self, dst: &mut [u8]) -> DiceyResult<()> {
        if dst.len() > self.remaining() {
            return Err(DiceyError::Overflow);
        }
        dst.copy_from_slice(&self.data[self.pos..self.pos + dst.len()]);
        self.pos += dst.len();
        Ok(())
    }

    /// Read a single byte, advancing the cursor.
    pub fn read_u8(&mut self) -> DiceyResult<u8> {
        let mut b = [0u8; 1];
        self.read(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> DiceyResult<u16> {
        let mut b = [0u8; 2];
        self.read(&mut b)?;
        Ok(u16::from_ne_bytes(b))
    }

    pub fn read_u32(&mut self) -> DiceyResult<u32> {
        let mut b = [0u8; 4];
        self.read(&mut b)?;
        Ok(u32::from_ne_bytes(b))
    }

    pub fn read_u64(&mut self) -> DiceyResult<u64> {
        let mut b = [0u8; 8];
        self.read(&mut b)?;
        Ok(u64::from_ne_bytes(b))
    }

    pub fn read_i16(&mut self) -> DiceyResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> DiceyResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> DiceyResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f64(&mut self) -> DiceyResult<f64> {
        let mut b = [0u8; 8];
        self.read(&mut b)?;
        Ok(f64::from_ne_bytes(b))
    }

    /// Split off the next `n` bytes as a sub-view and advance past them.
    pub fn take(&mut self, n: usize) -> DiceyResult<View<'a>> {
        let slice = self.peek(n)?;
        self.advance(n)?;
        Ok(View::new(slice))
    }

    /// Scan for a NUL terminator within the next `len` bytes (not counting
    /// the NUL itself as payload) and return the string preceding it,
    /// advancing the cursor past the terminator. Fails `BadMsg` if no NUL
    /// appears before `len` bytes are exhausted.
    pub fn as_zstring(&mut self, len: usize) -> DiceyResult<&'a str> {
        let bytes = self.peek(len)?;
        let nul_pos = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(DiceyError::BadMsg)?;
        let s = std::str::from_utf8(&bytes[..nul_pos]).map_err(|_| DiceyError::BadMsg)?;
        self.advance(len)?;
        Ok(s)
    }

    /// Read a NUL-terminated string of unknown length, scanning the whole
    /// remainder of the view for the terminator.
    pub fn read_zstring(&mut self) -> DiceyResult<&'a str> {
        let remaining = self.remaining();
        let bytes = self.peek(remaining)?;
        let nul_pos = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(DiceyError::BadMsg)?;
        let s = std::str::from_utf8(&bytes[..nul_pos]).map_err(|_| DiceyError::BadMsg)?;
        self.advance(nul_pos + 1)?;
        Ok(s)
    }
}

/// A mutable, advance-only write cursor over an owned scratch buffer.
///
/// Unlike `View`, `MutView` owns (or exclusively borrows) its backing
/// storage and grows it on demand via `ensure_cap`, mirroring how
/// `ArgList` (builders) grows 1.5x on demand.
pub struct MutView {
    buf: Vec<u8>,
}

impl MutView {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    /// Ensure at least `n` additional bytes of capacity are available.
    /// Unlike spec's C-level `ensure_cap`, which only allocates when the
    /// backing pointer is null (and fails `Again` otherwise), a `Vec` is
    /// always safely reallocatable, so this simply reserves.
    pub fn ensure_cap(&mut self, n: usize) {
        self.buf.reserve(n);
    }

    pub fn write(&mut self, src: &[u8]) {
        self.buf.extend_from_slice(src);
    }

    pub fn write_chunks(&mut self, chunks: &[&[u8]]) {
        for chunk in chunks {
            self.write(chunk);
        }
    }

    pub fn write_zstring(&mut self, s: &str) {
        self.write(s.as_bytes());
        self.buf.push(0);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write(&v.to_ne_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_ne_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_ne_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_u64(v as u64);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write(&v.to_ne_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for MutView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_reads_primitives_in_order() {
        let mut w = MutView::new();
        w.write_u32(42);
        w.write_u8(7);
        w.write_f64(1.5);
        let bytes = w.into_vec();

        let mut v = View::new(&bytes);
        assert_eq!(v.read_u32().unwrap(), 42);
        assert_eq!(v.read_u8().unwrap(), 7);
        assert_eq!(v.read_f64().unwrap(), 1.5);
        assert!(v.is_empty());
    }

    #[test]
    fn view_overflow_is_rejected() {
        let bytes = [1u8, 2, 3];
        let mut v = View::new(&bytes);
        assert!(matches!(v.read_u32(), Err(DiceyError::Overflow)));
    }

    #[test]
    fn zstring_requires_nul_within_len() {
        let mut w = MutView::new();
        w.write_zstring("hello");
        let bytes = w.into_vec();

        let mut v = View::new(&bytes);
        assert_eq!(v.as_zstring(bytes.len()).unwrap(), "hello");
    }

    #[test]
    fn zstring_without_nul_fails_bad_msg() {
        let bytes = [b'a', b'b', b'c'];
        let mut v = View::new(&bytes);
        assert!(matches!(v.as_zstring(3), Err(DiceyError::BadMsg)));
    }
}
