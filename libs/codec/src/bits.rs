//! Bit-level reader and writer
//!
//! TC strings pack fields MSB-first with no alignment between them. The
//! writer grows a byte buffer and zero-pads the final byte; the reader
//! bounds-checks every field so a truncated cookie surfaces as a
//! `DecodeError::Truncated` rather than a panic.

use crate::error::{CodecError, CodecResult, DecodeError, DecodeResult};

#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` using exactly `width` bits
    pub fn write(&mut self, field: &'static str, value: u64, width: u32) -> CodecResult<()> {
        if width < 64 && value >> width != 0 {
            return Err(CodecError::overflow(field, value, width));
        }
        for shift in (0..width).rev() {
            self.push_bit((value >> shift) & 1 == 1);
        }
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) {
        self.push_bit(value);
    }

    fn push_bit(&mut self, bit: bool) {
        let byte_index = self.bit_len / 8;
        if byte_index == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte_index] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn read(&mut self, field: &'static str, width: u32) -> DecodeResult<u64> {
        let available = self.bytes.len() * 8;
        if self.offset + width as usize > available {
            return Err(DecodeError::truncated(field, width, self.offset, available));
        }
        let mut value = 0u64;
        for _ in 0..width {
            let byte = self.bytes[self.offset / 8];
            let bit = (byte >> (7 - self.offset % 8)) & 1;
            value = (value << 1) | u64::from(bit);
            self.offset += 1;
        }
        Ok(value)
    }

    pub fn read_bool(&mut self, field: &'static str) -> DecodeResult<bool> {
        Ok(self.read(field, 1)? == 1)
    }
}
