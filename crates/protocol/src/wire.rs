//! Native wire primitives
//!
//! Little-endian fixed-width integers, LEB128 varints and length-prefixed
//! strings, as used by every native protocol packet.
//!
//! `WireBuffer` is the write side. It wraps a `BytesMut` so that it can be
//! truncated and refilled in place without giving back its allocation.
//! `WireReader` is the read side over a borrowed slice; every getter returns
//! `ProtocolError::UnexpectedEof` when the input is short, which callers use
//! to decide whether to read more from the network.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::Result;

/// Maximum encoded length of a u64 LEB128 varint
pub const MAX_UVARINT_LEN: usize = 10;

/// Growable byte sink for native encoding
#[derive(Debug, Default, Clone)]
pub struct WireBuffer {
    buf: BytesMut,
}

impl WireBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Create an empty buffer with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    /// Write an unsigned LEB128 varint
    #[inline]
    pub fn put_uvarint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.put_u8((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.put_u8(v as u8);
    }

    /// Write a uvarint length followed by the raw bytes
    #[inline]
    pub fn put_string(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// Write a uvarint length followed by the raw bytes
    #[inline]
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_uvarint(b.len() as u64);
        self.buf.put_slice(b);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    #[inline]
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    #[inline]
    pub fn put_u128(&mut self, v: u128) {
        self.buf.put_u128_le(v);
    }

    #[inline]
    pub fn put_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    #[inline]
    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    #[inline]
    pub fn put_i128(&mut self, v: i128) {
        self.buf.put_i128_le(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    #[inline]
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    /// Write raw bytes without a length prefix
    #[inline]
    pub fn put_raw(&mut self, b: &[u8]) {
        self.buf.put_slice(b);
    }

    /// Current length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Allocated capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Shorten the buffer, keeping the allocation
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Empty the buffer, keeping the allocation
    #[inline]
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Bytes from `start` to the end of the buffer
    #[inline]
    pub fn tail(&self, start: usize) -> &[u8] {
        &self.buf[start..]
    }
}

impl AsRef<[u8]> for WireBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

/// Cursor over a borrowed byte slice
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unread input, without consuming it
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Take the next `n` bytes
    #[inline]
    pub fn get_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::UnexpectedEof);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    #[inline]
    fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.get_raw(N)?;
        let mut arr = [0u8; N];
        arr.copy_from_slice(raw);
        Ok(arr)
    }

    #[inline]
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get_array::<1>()?[0])
    }

    #[inline]
    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Read an unsigned LEB128 varint
    pub fn get_uvarint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_UVARINT_LEN {
            let byte = self.get_u8()?;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte < 0x80 {
                return Ok(value);
            }
        }
        Err(ProtocolError::LengthOverflow(value))
    }

    /// Read a uvarint length and return that many bytes
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_uvarint()?;
        let len = usize::try_from(len).map_err(|_| ProtocolError::LengthOverflow(len))?;
        self.get_raw(len)
    }

    /// Read a uvarint-prefixed UTF-8 string
    pub fn get_string(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    #[inline]
    pub fn get_u16(&mut self) -> Result<u16> {
        self.get_array().map(u16::from_le_bytes)
    }

    #[inline]
    pub fn get_u32(&mut self) -> Result<u32> {
        self.get_array().map(u32::from_le_bytes)
    }

    #[inline]
    pub fn get_u64(&mut self) -> Result<u64> {
        self.get_array().map(u64::from_le_bytes)
    }

    #[inline]
    pub fn get_u128(&mut self) -> Result<u128> {
        self.get_array().map(u128::from_le_bytes)
    }

    #[inline]
    pub fn get_i8(&mut self) -> Result<i8> {
        self.get_array().map(i8::from_le_bytes)
    }

    #[inline]
    pub fn get_i16(&mut self) -> Result<i16> {
        self.get_array().map(i16::from_le_bytes)
    }

    #[inline]
    pub fn get_i32(&mut self) -> Result<i32> {
        self.get_array().map(i32::from_le_bytes)
    }

    #[inline]
    pub fn get_i64(&mut self) -> Result<i64> {
        self.get_array().map(i64::from_le_bytes)
    }

    #[inline]
    pub fn get_i128(&mut self) -> Result<i128> {
        self.get_array().map(i128::from_le_bytes)
    }

    #[inline]
    pub fn get_f32(&mut self) -> Result<f32> {
        self.get_array().map(f32::from_le_bytes)
    }

    #[inline]
    pub fn get_f64(&mut self) -> Result<f64> {
        self.get_array().map(f64::from_le_bytes)
    }
}
