//! Register decoding for bulk Modbus reads
//!
//! A bulk read of `N` holding registers starting at address `A` is handled as a
//! response buffer of `1 + 2N` bytes: one length-prefix byte followed by `N`
//! big-endian 16-bit words. A value of width `W` bytes at register `R` lives at
//! byte offset `1 + 2 * (R - A)` through `1 + 2 * (R - A) + W`.
//!
//! Everything in here is pure; the transport only hands over the words.

use crate::error::{HeliosError, Result};
use std::ops::Range;

/// Size of the byte-count field in front of the register data
pub const LENGTH_PREFIX_SIZE: usize = 1;

/// Bytes per register
pub const REGISTER_SIZE: usize = 2;

/// Widest integer the decoders accept, in bytes
pub const MAX_VALUE_WIDTH: usize = 8;

/// Byte range of a `width`-byte value at `register` inside a read starting at `first`
pub fn register_offset(first: u16, register: u16, width: usize) -> Result<Range<usize>> {
    if first > register {
        return Err(HeliosError::out_of_range(register, first));
    }
    let start = LENGTH_PREFIX_SIZE + usize::from(register - first) * REGISTER_SIZE;
    Ok(start..start + width)
}

/// Frame transport words as a length-prefixed big-endian byte buffer
pub fn frame_response(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(LENGTH_PREFIX_SIZE + words.len() * REGISTER_SIZE);
    // Modbus caps a read at 125 registers, so the byte count always fits
    bytes.push((words.len() * REGISTER_SIZE).min(usize::from(u8::MAX)) as u8);
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes
}

/// Decode an unsigned big-endian integer
pub fn decode_uint_be(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Decode a two's complement big-endian integer
pub fn decode_int_be(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let raw = decode_uint_be(bytes);
    let bits = (bytes.len().min(MAX_VALUE_WIDTH) * 8) as u32;
    if bits >= 64 {
        return raw as i64;
    }
    // Sign-extend from the top bit of the window
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Decode a bit field as a string of '0'/'1', most significant bit first
pub fn decode_bitfield(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:08b}", b)).collect()
}

/// Decode a NUL padded string
pub fn decode_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches('\0')
        .trim()
        .to_string()
}

/// Minimal contiguous register range covering a set of values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWindow {
    first: u16,
    count: u16,
}

impl RegisterWindow {
    /// Window spanning every `(register, width in bytes)` pair
    pub fn spanning(values: &[(u16, usize)]) -> Result<Self> {
        let first = values
            .iter()
            .map(|(register, _)| *register)
            .min()
            .ok_or_else(|| HeliosError::config("Register window needs at least one value"))?;
        let end = values
            .iter()
            .map(|(register, width)| usize::from(*register) + width.div_ceil(REGISTER_SIZE))
            .max()
            .unwrap_or(usize::from(first));
        let count = u16::try_from(end - usize::from(first)).map_err(|_| {
            HeliosError::config(format!("Register window at {} is too large", first))
        })?;
        Ok(Self { first, count })
    }

    pub fn first(&self) -> u16 {
        self.first
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    /// Size of the framed response for this window
    pub fn response_len(&self) -> usize {
        LENGTH_PREFIX_SIZE + usize::from(self.count) * REGISTER_SIZE
    }
}

/// Framed result of one bulk read
#[derive(Debug, Clone)]
pub struct RegisterResponse {
    first: u16,
    bytes: Vec<u8>,
}

impl RegisterResponse {
    /// Wrap a framed buffer read starting at register `first`
    pub fn from_bytes(first: u16, bytes: Vec<u8>) -> Result<Self> {
        let Some(&declared) = bytes.first() else {
            return Err(HeliosError::decode("Empty register response"));
        };
        let payload = bytes.len() - LENGTH_PREFIX_SIZE;
        if usize::from(declared) != payload || payload % REGISTER_SIZE != 0 {
            return Err(HeliosError::decode(format!(
                "Length prefix {} does not match {} payload bytes",
                declared, payload
            )));
        }
        Ok(Self { first, bytes })
    }

    /// Frame the words returned by the transport
    pub fn from_words(first: u16, words: &[u16]) -> Self {
        Self {
            first,
            bytes: frame_response(words),
        }
    }

    pub fn first(&self) -> u16 {
        self.first
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Raw bytes of a `width`-byte value at `register`
    pub fn window(&self, register: u16, width: usize) -> Result<&[u8]> {
        let range = register_offset(self.first, register, width)?;
        let end = range.end;
        self.bytes.get(range).ok_or_else(|| {
            HeliosError::decode(format!(
                "Response of {} bytes is too short for register {} (needs {})",
                self.bytes.len(),
                register,
                end
            ))
        })
    }

    pub fn uint(&self, register: u16, width: usize) -> Result<u64> {
        Self::check_width(width)?;
        Ok(decode_uint_be(self.window(register, width)?))
    }

    pub fn int(&self, register: u16, width: usize) -> Result<i64> {
        Self::check_width(width)?;
        Ok(decode_int_be(self.window(register, width)?))
    }

    pub fn bits(&self, register: u16, width: usize) -> Result<String> {
        Ok(decode_bitfield(self.window(register, width)?))
    }

    pub fn string(&self, register: u16, width: usize) -> Result<String> {
        Ok(decode_string(self.window(register, width)?))
    }

    fn check_width(width: usize) -> Result<()> {
        if width == 0 || width > MAX_VALUE_WIDTH {
            return Err(HeliosError::decode(format!(
                "Unsupported integer width {}",
                width
            )));
        }
        Ok(())
    }
}
