use anyhow::{anyhow, Result};
use std::io::{Read, Write};

const PREFIX: u8 = 0xFF;

fn read_u8<R: Read + ?Sized>(src: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    src.read_exact(&mut byte)
        .map_err(|e| anyhow!("end of entropy-coded data: {e}"))?;
    Ok(byte[0])
}

/// Reads bits MSB-first out of an entropy-coded segment.
///
/// A `0xFF 0x00` pair yields a literal `0xFF`. Any other byte after `0xFF` (fill bytes skipped)
/// is latched as a marker: no further bytes are consumed and missing bits read as zero until the
/// marker is taken and the reader is reset.
#[derive(Debug, Default)]
pub struct BitReader {
    buffer: u32,
    bits: u32,
    marker: Option<u8>,
}

impl BitReader {
    pub fn new() -> Self {
        BitReader::default()
    }

    /// Marker code hit while filling the bit buffer, if any.
    pub fn marker(&self) -> Option<u8> {
        self.marker
    }

    pub fn take_marker(&mut self) -> Option<u8> {
        self.marker.take()
    }

    /// Discards buffered bits. Used at restart boundaries.
    pub fn reset(&mut self) {
        self.buffer = 0;
        self.bits = 0;
    }

    fn next_byte<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<Option<u8>> {
        if self.marker.is_some() {
            return Ok(None);
        }

        let byte = read_u8(src)?;
        if byte != PREFIX {
            return Ok(Some(byte));
        }

        let mut next = read_u8(src)?;
        while next == PREFIX {
            next = read_u8(src)?;
        }

        match next {
            0 => Ok(Some(PREFIX)),
            code => {
                self.marker = Some(code);
                Ok(None)
            }
        }
    }

    fn fill<R: Read + ?Sized>(&mut self, src: &mut R, len: u32) -> Result<()> {
        if len > 16 {
            return Err(anyhow!(
                "attempt to read more than 16 bits (buffered={}, len={len})",
                self.bits
            ));
        }

        while self.bits < len {
            match self.next_byte(src)? {
                Some(byte) => {
                    self.buffer = (self.buffer << 8) | byte as u32;
                    self.bits += 8;
                }
                None => break,
            }
        }

        Ok(())
    }

    pub fn get_bits<R: Read + ?Sized>(&mut self, src: &mut R, len: u32) -> Result<u16> {
        if len == 0 {
            return Ok(0);
        }

        self.fill(src, len)?;

        let mask = (1u32 << len) - 1;
        let value = if self.bits >= len {
            self.bits -= len;
            (self.buffer >> self.bits) & mask
        } else {
            // A marker cut the segment short: pad the deficit with zeros.
            let deficit = len - self.bits;
            self.bits = 0;
            (self.buffer << deficit) & mask
        };

        self.buffer &= (1u32 << self.bits) - 1;

        Ok(value as u16)
    }

    pub fn get_bit<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<u16> {
        self.get_bits(src, 1)
    }

    /// Reads `n_bits` magnitude bits and sign-extends them (F.2.2.1 EXTEND).
    pub fn receive_extend<R: Read + ?Sized>(&mut self, src: &mut R, n_bits: u8) -> Result<i32> {
        if n_bits == 0 {
            return Ok(0);
        }

        let value = self.get_bits(src, n_bits as u32)? as i32;
        Ok(extend(value, n_bits))
    }
}

pub fn extend(value: i32, n_bits: u8) -> i32 {
    if value < (1 << (n_bits - 1)) {
        value + (-1 << n_bits) + 1
    } else {
        value
    }
}

/// Number of magnitude bits needed for `value` (the SSSS category of F.1.2.1).
pub fn magnitude_category(value: i32) -> u8 {
    let mut magnitude = value.unsigned_abs();
    let mut n_bits = 0;
    while magnitude != 0 {
        n_bits += 1;
        magnitude >>= 1;
    }
    n_bits
}

/// Packs bits MSB-first, stuffing a zero byte after every emitted `0xFF`.
#[derive(Debug, Default)]
pub struct BitWriter {
    buffer: u32,
    bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter::default()
    }

    fn emit<W: Write + ?Sized>(out: &mut W, byte: u8) -> Result<()> {
        out.write_all(&[byte])?;
        if byte == PREFIX {
            out.write_all(&[0])?;
        }
        Ok(())
    }

    pub fn put_bits<W: Write + ?Sized>(&mut self, out: &mut W, code: u32, size: u32) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        debug_assert!(size <= 16);

        let mut buffer = code & ((1u32 << size) - 1);
        self.bits += size;
        buffer <<= 24 - self.bits;
        buffer |= self.buffer;

        while self.bits >= 8 {
            Self::emit(out, ((buffer >> 16) & 0xFF) as u8)?;
            buffer <<= 8;
            self.bits -= 8;
        }

        self.buffer = buffer & 0x00FF_FFFF;
        Ok(())
    }

    /// Writes out the partial byte, padded with 1-bits.
    pub fn flush<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<()> {
        if self.bits > 0 {
            self.put_bits(out, 0x7F, 7)?;
        }
        self.buffer = 0;
        self.bits = 0;
        Ok(())
    }

    /// Number of bits waiting for a full byte.
    pub fn pending_bits(&self) -> u32 {
        self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_unstuffs_ff00() -> Result<()> {
        let data = [0xFF, 0x00, 0x0F];
        let mut src = Cursor::new(&data[..]);
        let mut reader = BitReader::new();

        assert_eq!(reader.get_bits(&mut src, 8)?, 0xFF);
        assert_eq!(reader.get_bits(&mut src, 4)?, 0x0);
        assert_eq!(reader.get_bits(&mut src, 4)?, 0xF);
        assert_eq!(reader.marker(), None);

        Ok(())
    }

    #[test]
    fn test_latches_marker_and_zero_fills() -> Result<()> {
        let data = [0b1010_0000, 0xFF, 0xFF, 0xD0, 0x12];
        let mut src = Cursor::new(&data[..]);
        let mut reader = BitReader::new();

        assert_eq!(reader.get_bits(&mut src, 3)?, 0b101);
        assert_eq!(reader.get_bits(&mut src, 8)?, 0);
        assert_eq!(reader.take_marker(), Some(0xD0));

        // bytes after the marker are untouched
        reader.reset();
        assert_eq!(reader.get_bits(&mut src, 8)?, 0x12);

        Ok(())
    }

    #[test]
    fn test_extend() -> Result<()> {
        let test_cases = vec![(0, 1, -1), (1, 1, 1), (0b010, 3, -5), (0b110, 3, 6), (0, 11, -2047)];
        for (value, n_bits, expected) in test_cases {
            assert_eq!(extend(value, n_bits), expected);
        }

        assert_eq!(magnitude_category(0), 0);
        assert_eq!(magnitude_category(-5), 3);
        assert_eq!(magnitude_category(1024), 11);

        Ok(())
    }

    #[test]
    fn test_writer_stuffs_and_pads() -> Result<()> {
        let mut out = vec![];
        let mut writer = BitWriter::new();

        writer.put_bits(&mut out, 0xFF, 8)?;
        writer.put_bits(&mut out, 0b10, 2)?;
        writer.flush(&mut out)?;

        assert_eq!(out, vec![0xFF, 0x00, 0b1011_1111]);

        Ok(())
    }

    #[test]
    fn test_writer_reader_agree() -> Result<()> {
        let fields: Vec<(u32, u32)> = vec![(5, 3), (0xFFFF, 16), (0, 1), (0x1234, 13), (1, 1)];

        let mut out = vec![];
        let mut writer = BitWriter::new();
        for &(code, size) in &fields {
            writer.put_bits(&mut out, code, size)?;
        }
        writer.flush(&mut out)?;

        let mut src = Cursor::new(&out[..]);
        let mut reader = BitReader::new();
        for &(code, size) in &fields {
            assert_eq!(reader.get_bits(&mut src, size)? as u32, code);
        }

        Ok(())
    }
}
