// ==============================================================================
// schema/bits.rs - Bit Packing Helpers
// ==============================================================================
// Description: Fixed-width bit writer/reader for annotation bit columns
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use crate::error::{IndexError, Result};

/// Appends values of a fixed bit width, most significant bit first
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the low `width` bits of `value`
    pub fn write(&mut self, value: u64, width: u32) -> Result<()> {
        if width > 64 {
            return Err(IndexError::Codec(format!("Bit width {} exceeds 64", width)));
        }
        if width < 64 && value >> width != 0 {
            return Err(IndexError::Codec(format!(
                "Value {:#x} does not fit in {} bits",
                value, width
            )));
        }
        for i in (0..width).rev() {
            let bit = (value >> i) & 1;
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if bit == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
        Ok(())
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Reads values written by [`BitWriter`]
#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn read(&mut self, width: u32) -> Result<u64> {
        if width > 64 {
            return Err(IndexError::Codec(format!("Bit width {} exceeds 64", width)));
        }
        if self.position + width as usize > self.bytes.len() * 8 {
            return Err(IndexError::Codec("Bit stream truncated".into()));
        }
        let mut value = 0u64;
        for _ in 0..width {
            let byte = self.bytes[self.position / 8];
            let bit = (byte >> (7 - self.position % 8)) & 1;
            value = (value << 1) | bit as u64;
            self.position += 1;
        }
        Ok(value)
    }
}

/// Mask of the `width` lowest bits
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_mixed_widths() {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3).unwrap();
        writer.write(0, 1).unwrap();
        writer.write(0xABCD, 16).unwrap();
        writer.write(u64::MAX, 64).unwrap();
        assert_eq!(writer.bit_len(), 84);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 11);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read(3).unwrap(), 0b101);
        assert_eq!(reader.read(1).unwrap(), 0);
        assert_eq!(reader.read(16).unwrap(), 0xABCD);
        assert_eq!(reader.read(64).unwrap(), u64::MAX);
    }

    #[test]
    fn test_value_too_wide() {
        let mut writer = BitWriter::new();
        assert!(writer.write(8, 3).is_err());
    }

    #[test]
    fn test_truncated_read() {
        let mut reader = BitReader::new(&[0xFF]);
        assert!(reader.read(9).is_err());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(0), 0);
        assert_eq!(mask(3), 0b111);
        assert_eq!(mask(64), u64::MAX);
    }
}
