//! Compressed frame codec
//!
//! When compression is negotiated, every data block travels as one or more
//! self-contained frames:
//!
//! ```text
//! [16 bytes: CityHash128 v1.0.2 of everything after the checksum]
//! [1 byte:   method (0x82 LZ4, 0x90 ZSTD, 0x02 none)]
//! [4 bytes:  frame size, header included, u32 LE (9 + payload)]
//! [4 bytes:  uncompressed size, u32 LE]
//! [N bytes:  payload]
//! ```
//!
//! The server decompresses frames back-to-back into one logical stream, so
//! a block may be cut into frames at any column boundary.

use std::fmt;
use std::str::FromStr;

use cityhash_rs::cityhash_102_128;
use serde::Deserialize;

use crate::error::ProtocolError;
use crate::Result;

/// Checksum bytes at the start of every frame
pub const CHECKSUM_SIZE: usize = 16;

/// Method byte plus the two u32 sizes
pub const HEADER_SIZE: usize = 9;

/// Full frame overhead before the payload
pub const FRAME_OVERHEAD: usize = CHECKSUM_SIZE + HEADER_SIZE;

/// zstd level used for outgoing frames
pub const DEFAULT_ZSTD_LEVEL: i32 = 1;

const METHOD_NONE: u8 = 0x02;
const METHOD_LZ4: u8 = 0x82;
const METHOD_ZSTD: u8 = 0x90;

/// Block compression negotiated for a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// Blocks are sent as plain bytes
    None,
    /// LZ4 block compression
    #[default]
    Lz4,
    /// Zstandard compression
    Zstd,
}

impl CompressionMethod {
    /// Method byte written in the frame header
    #[inline]
    pub const fn method_byte(self) -> u8 {
        match self {
            Self::None => METHOD_NONE,
            Self::Lz4 => METHOD_LZ4,
            Self::Zstd => METHOD_ZSTD,
        }
    }

    /// Whether data blocks on the wire are framed
    #[inline]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Compression flag sent with the query packet
    #[inline]
    pub const fn wire_flag(self) -> u64 {
        if self.is_enabled() { 1 } else { 0 }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            other => Err(ProtocolError::compression(format!(
                "unsupported compression method '{other}'"
            ))),
        }
    }
}

/// Reusable frame compressor
///
/// Keeps its output vector and zstd context between calls so that pooled
/// buffers do not reallocate per chunk.
#[derive(Default)]
pub struct Compressor {
    out: Vec<u8>,
    zstd: Option<zstd::bulk::Compressor<'static>>,
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("capacity", &self.out.capacity())
            .field("zstd", &self.zstd.is_some())
            .finish()
    }
}

impl Compressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress `data` into a single framed block
    ///
    /// The returned slice borrows the compressor's internal buffer and is
    /// valid until the next call.
    pub fn compress(&mut self, method: CompressionMethod, data: &[u8]) -> Result<&[u8]> {
        self.out.clear();
        self.out.resize(FRAME_OVERHEAD, 0);

        match method {
            CompressionMethod::None => self.out.extend_from_slice(data),
            CompressionMethod::Lz4 => {
                let max = lz4_flex::block::get_maximum_output_size(data.len());
                self.out.resize(FRAME_OVERHEAD + max, 0);
                let n = lz4_flex::block::compress_into(data, &mut self.out[FRAME_OVERHEAD..])
                    .map_err(ProtocolError::compression)?;
                self.out.truncate(FRAME_OVERHEAD + n);
            }
            CompressionMethod::Zstd => {
                if self.zstd.is_none() {
                    let ctx = zstd::bulk::Compressor::new(DEFAULT_ZSTD_LEVEL)
                        .map_err(ProtocolError::compression)?;
                    self.zstd = Some(ctx);
                }
                if let Some(ctx) = self.zstd.as_mut() {
                    let payload = ctx.compress(data).map_err(ProtocolError::compression)?;
                    self.out.extend_from_slice(&payload);
                }
            }
        }

        let frame_size = frame_len(self.out.len() - CHECKSUM_SIZE)?;
        let raw_size = frame_len(data.len())?;
        self.out[CHECKSUM_SIZE] = method.method_byte();
        self.out[CHECKSUM_SIZE + 1..CHECKSUM_SIZE + 5].copy_from_slice(&frame_size.to_le_bytes());
        self.out[CHECKSUM_SIZE + 5..FRAME_OVERHEAD].copy_from_slice(&raw_size.to_le_bytes());

        let checksum = checksum(&self.out[CHECKSUM_SIZE..]);
        self.out[..CHECKSUM_SIZE].copy_from_slice(&checksum.to_le_bytes());

        Ok(&self.out)
    }

    /// Capacity retained between calls
    pub fn capacity(&self) -> usize {
        self.out.capacity()
    }
}

fn frame_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| ProtocolError::LengthOverflow(len as u64))
}

/// Frame checksum: CityHash128 with the halves swapped, written little-endian
#[inline]
fn checksum(data: &[u8]) -> u128 {
    cityhash_102_128(data).rotate_right(64)
}

/// Decompress one frame from the front of `input`, appending to `out`
///
/// Returns the number of input bytes consumed. Returns
/// `ProtocolError::UnexpectedEof` if `input` holds less than one full frame.
pub fn decompress_frame_into(input: &[u8], out: &mut Vec<u8>) -> Result<usize> {
    if input.len() < FRAME_OVERHEAD {
        return Err(ProtocolError::UnexpectedEof);
    }

    let method = input[CHECKSUM_SIZE];
    let frame_size = read_u32(&input[CHECKSUM_SIZE + 1..CHECKSUM_SIZE + 5]) as usize;
    let raw_size = read_u32(&input[CHECKSUM_SIZE + 5..FRAME_OVERHEAD]) as usize;

    if frame_size < HEADER_SIZE {
        return Err(ProtocolError::compression(format!(
            "frame size {frame_size} smaller than header"
        )));
    }
    let total = CHECKSUM_SIZE + frame_size;
    if input.len() < total {
        return Err(ProtocolError::UnexpectedEof);
    }

    let mut expected = [0u8; CHECKSUM_SIZE];
    expected.copy_from_slice(&input[..CHECKSUM_SIZE]);
    if checksum(&input[CHECKSUM_SIZE..total]) != u128::from_le_bytes(expected) {
        return Err(ProtocolError::ChecksumMismatch);
    }

    let payload = &input[FRAME_OVERHEAD..total];
    match method {
        METHOD_NONE => out.extend_from_slice(payload),
        METHOD_LZ4 => {
            let start = out.len();
            out.resize(start + raw_size, 0);
            let n = lz4_flex::block::decompress_into(payload, &mut out[start..])
                .map_err(ProtocolError::compression)?;
            if n != raw_size {
                return Err(ProtocolError::compression(format!(
                    "lz4 frame declared {raw_size} bytes, produced {n}"
                )));
            }
        }
        METHOD_ZSTD => {
            let data =
                zstd::bulk::decompress(payload, raw_size).map_err(ProtocolError::compression)?;
            out.extend_from_slice(&data);
        }
        other => return Err(ProtocolError::UnknownCompressionMethod(other)),
    }

    Ok(total)
}

/// Decompress a run of back-to-back frames into one byte stream
pub fn decompress_stream(mut input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while !input.is_empty() {
        let consumed = decompress_frame_into(input, &mut out)?;
        input = &input[consumed..];
    }
    Ok(out)
}

#[inline]
fn read_u32(b: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(b);
    u32::from_le_bytes(arr)
}
