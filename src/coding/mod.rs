//! Deterministic wire primitives for on-disk metadata.
//!
//! Fixed-width integers are **little-endian**; variable-width integers
//! use the 7-bits-per-byte varint format. Because the crate owns this
//! format, the on-disk representation never changes due to a dependency
//! upgrade.
//!
//! # Wire format
//!
//! | Item          | Encoding                                   |
//! |---------------|--------------------------------------------|
//! | `u32` / `u64` | 4 / 8 bytes, little-endian                 |
//! | varint64      | 1–10 bytes, 7 payload bits per byte        |
//! | [`BlockHandle`] | `[offset: varint64][size: varint64]`     |
//!
//! Decoders take a `&mut &[u8]` cursor and advance it past the bytes
//! they consume, so callers can walk a buffer of concatenated items.
//!
//! # Zero-panic guarantee
//!
//! No function here panics on malformed input; truncation and overflow
//! are reported via [`CodingError`].


use thiserror::Error;

/// Maximum encoded length of one [`BlockHandle`] (two 10-byte varints).
pub const BLOCK_HANDLE_MAX_LEN: usize = 20;

/// Fixed footer size: two maximally-sized block handles, zero padded.
pub const FOOTER_LEN: usize = 2 * BLOCK_HANDLE_MAX_LEN;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding wire primitives.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A varint ran past 10 bytes without terminating.
    #[error("varint64 overflow")]
    VarintOverflow,
}

// ------------------------------------------------------------------------------------------------
// Fixed-width integers
// ------------------------------------------------------------------------------------------------

/// Append a little-endian `u32`.
#[inline]
pub fn put_fixed32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Append a little-endian `u64`.
#[inline]
pub fn put_fixed64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Read a little-endian `u32` and advance the cursor.
#[inline]
pub fn get_fixed32(input: &mut &[u8]) -> Result<u32, CodingError> {
    let buf = *input;
    if buf.len() < 4 {
        return Err(CodingError::UnexpectedEof {
            needed: 4,
            available: buf.len(),
        });
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[..4]);
    *input = &buf[4..];
    Ok(u32::from_le_bytes(bytes))
}

/// Read a little-endian `u64` and advance the cursor.
#[inline]
pub fn get_fixed64(input: &mut &[u8]) -> Result<u64, CodingError> {
    let buf = *input;
    if buf.len() < 8 {
        return Err(CodingError::UnexpectedEof {
            needed: 8,
            available: buf.len(),
        });
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    *input = &buf[8..];
    Ok(u64::from_le_bytes(bytes))
}

// ------------------------------------------------------------------------------------------------
// Varints
// ------------------------------------------------------------------------------------------------

/// Append a varint-encoded `u64` (1–10 bytes).
pub fn put_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Read a varint-encoded `u64` and advance the cursor.
pub fn get_varint64(input: &mut &[u8]) -> Result<u64, CodingError> {
    let buf = *input;
    let mut result: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 10 {
            return Err(CodingError::VarintOverflow);
        }
        if byte < 0x80 {
            // Final byte: the tenth byte may only carry one payload bit.
            if i == 9 && byte > 1 {
                return Err(CodingError::VarintOverflow);
            }
            result |= (byte as u64) << (7 * i);
            *input = &buf[i + 1..];
            return Ok(result);
        }
        result |= ((byte & 0x7f) as u64) << (7 * i);
    }
    Err(CodingError::UnexpectedEof {
        needed: buf.len() + 1,
        available: buf.len(),
    })
}

// ------------------------------------------------------------------------------------------------
// BlockHandle
// ------------------------------------------------------------------------------------------------

/// Location of one byte range within the log: `(offset, size)`, both in
/// logical log coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    /// Logical offset of the first byte.
    pub offset: u64,
    /// Length of the range in bytes.
    pub size: u64,
}

impl BlockHandle {
    /// Create a handle covering `[offset, offset + size)`.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Append the varint encoding of this handle.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Decode a handle and advance the cursor.
    pub fn decode_from(input: &mut &[u8]) -> Result<Self, CodingError> {
        let offset = get_varint64(input)?;
        let size = get_varint64(input)?;
        Ok(Self { offset, size })
    }
}
