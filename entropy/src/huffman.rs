use crate::bitio::{BitReader, BitWriter};
use anyhow::{anyhow, Result};
use std::io::{Read, Write};

/// Longest code length the unrestricted tree build may produce before the 16-bit limit is applied.
const MAX_CLEN: usize = 32;

/// Frequency slot of the reserved pseudo-symbol that keeps real symbols off the all-ones code.
const PSEUDO_SYMBOL: usize = 256;

#[derive(Debug, PartialEq, Copy, Clone, Hash, Eq, PartialOrd, Ord)]
pub enum HuffmanClass {
    AC = 1,
    DC = 0,
}

impl HuffmanClass {
    pub fn from(ht_class: u8) -> Result<Self> {
        match ht_class {
            1 => Ok(HuffmanClass::AC),
            0 => Ok(HuffmanClass::DC),
            _ => Err(anyhow!("invalid huffman table class {ht_class}")),
        }
    }
}

/// A Huffman table in the form it takes inside a DHT segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanSpec {
    /// Tc: Table class - 0 = DC table or lossless table, 1 = AC table.
    pub class: HuffmanClass,

    /// Th: Specifies one of four possible destinations where the huffman table will be used.
    pub destination_id: u8,

    /// Li: Number of Huffman codes of length i bits, for i = 1..16.
    pub counts: [u8; 16],

    /// Vi,j: Symbol values in order of increasing code length.
    pub symbols: Vec<u8>,
}

impl HuffmanSpec {
    pub fn from(
        class: HuffmanClass,
        destination_id: u8,
        counts: [u8; 16],
        symbols: Vec<u8>,
    ) -> Result<Self> {
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total != symbols.len() || total > 256 {
            return Err(anyhow!(
                "huffman table declares {total} codes but carries {} symbols",
                symbols.len()
            ));
        }

        Ok(HuffmanSpec {
            class,
            destination_id,
            counts,
            symbols,
        })
    }

    /// Parses every table packed into one DHT payload (the bytes after the length field).
    pub fn parse_segment(payload: &[u8]) -> Result<Vec<HuffmanSpec>> {
        let mut specs = vec![];
        let mut cursor = 0;

        while cursor < payload.len() {
            if payload.len() < cursor + 17 {
                return Err(anyhow!("Not enough data to extract symbol table"));
            }

            let info = payload[cursor];
            let class = HuffmanClass::from(info >> 4)?;
            let destination_id = info & 0x0F;
            cursor += 1;

            let mut counts = [0u8; 16];
            counts.copy_from_slice(&payload[cursor..cursor + 16]);
            cursor += 16;

            let total: usize = counts.iter().map(|&c| c as usize).sum();
            if payload.len() < cursor + total {
                return Err(anyhow!("huffman table truncated, need {total} symbols"));
            }

            let symbols = payload[cursor..cursor + total].to_vec();
            cursor += total;

            specs.push(HuffmanSpec::from(class, destination_id, counts, symbols)?);
        }

        Ok(specs)
    }

    /// Tc/Th byte, the 16 counts and the symbols: one table's share of a DHT payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(17 + self.symbols.len());
        bytes.push(((self.class as u8) << 4) | self.destination_id);
        bytes.extend_from_slice(&self.counts);
        bytes.extend_from_slice(&self.symbols);
        bytes
    }

    /// Code sizes and code words for each symbol, in symbol-list order (Annex C).
    fn generate_codes(&self) -> Result<(Vec<u8>, Vec<u16>)> {
        let mut sizes = Vec::with_capacity(self.symbols.len());
        for (i, &count) in self.counts.iter().enumerate() {
            sizes.extend(std::iter::repeat((i + 1) as u8).take(count as usize));
        }

        let mut codes = Vec::with_capacity(sizes.len());
        let mut code: u32 = 0;
        let mut si = match sizes.first() {
            Some(&size) => size,
            None => return Ok((sizes, codes)),
        };

        let mut p = 0;
        while p < sizes.len() {
            while p < sizes.len() && sizes[p] == si {
                codes.push(code as u16);
                code += 1;
                p += 1;
            }

            if code >= (1u32 << si) {
                return Err(anyhow!("Bad huffman code table"));
            }

            code <<= 1;
            si += 1;
        }

        Ok((sizes, codes))
    }

    /// The four tables of Annex K.3: DC/AC luminance on id 0, DC/AC chrominance on id 1.
    pub fn standard() -> Vec<HuffmanSpec> {
        let table = |class, id, counts: [u8; 16], symbols: &[u8]| HuffmanSpec {
            class,
            destination_id: id,
            counts,
            symbols: symbols.to_vec(),
        };

        vec![
            table(HuffmanClass::DC, 0, STD_DC_LUMINANCE_COUNTS, &STD_DC_SYMBOLS),
            table(HuffmanClass::DC, 1, STD_DC_CHROMINANCE_COUNTS, &STD_DC_SYMBOLS),
            table(HuffmanClass::AC, 0, STD_AC_LUMINANCE_COUNTS, &STD_AC_LUMINANCE_SYMBOLS),
            table(HuffmanClass::AC, 1, STD_AC_CHROMINANCE_COUNTS, &STD_AC_CHROMINANCE_SYMBOLS),
        ]
    }

    /// Builds the length-limited optimal table for the gathered symbol frequencies (K.2).
    pub fn optimal(class: HuffmanClass, destination_id: u8, frequencies: &[u32; 257]) -> Result<Self> {
        let mut freq: Vec<u64> = frequencies.iter().map(|&f| f as u64).collect();
        let mut bits = [0i32; MAX_CLEN + 1];
        let mut codesize = [0usize; 257];
        let mut others = [-1i32; 257];

        freq[PSEUDO_SYMBOL] = 1;

        loop {
            // smallest nonzero frequency, ties go to the larger symbol
            let mut c1 = None;
            let mut v = u64::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f > 0 && f <= v {
                    v = f;
                    c1 = Some(i);
                }
            }

            let mut c2 = None;
            v = u64::MAX;
            for (i, &f) in freq.iter().enumerate() {
                if f > 0 && f <= v && Some(i) != c1 {
                    v = f;
                    c2 = Some(i);
                }
            }

            let (mut c1, mut c2) = match (c1, c2) {
                (Some(c1), Some(c2)) => (c1, c2),
                _ => break,
            };

            freq[c1] += freq[c2];
            freq[c2] = 0;

            codesize[c1] += 1;
            while others[c1] >= 0 {
                c1 = others[c1] as usize;
                codesize[c1] += 1;
            }

            others[c1] = c2 as i32;

            codesize[c2] += 1;
            while others[c2] >= 0 {
                c2 = others[c2] as usize;
                codesize[c2] += 1;
            }
        }

        for &size in codesize.iter() {
            if size > 0 {
                if size > MAX_CLEN {
                    return Err(anyhow!("huffman code length {size} exceeds {MAX_CLEN}"));
                }
                bits[size] += 1;
            }
        }

        for i in (17..=MAX_CLEN).rev() {
            while bits[i] > 0 {
                let mut j = i - 2;
                while bits[j] == 0 {
                    j -= 1;
                }

                bits[i] -= 2;
                bits[i - 1] += 1;
                bits[j + 1] += 2;
                bits[j] -= 1;
            }
        }

        // drop the pseudo-symbol from the longest code length still in use
        if let Some(longest) = (1..=16).rev().find(|&i| bits[i] > 0) {
            bits[longest] -= 1;
        }

        let mut counts = [0u8; 16];
        for (i, count) in counts.iter_mut().enumerate() {
            *count = bits[i + 1] as u8;
        }

        let mut symbols = vec![];
        for length in 1..=MAX_CLEN {
            for (symbol, &size) in codesize.iter().enumerate().take(256) {
                if size == length {
                    symbols.push(symbol as u8);
                }
            }
        }

        HuffmanSpec::from(class, destination_id, counts, symbols)
    }
}

/// Decoder form of a table (F.2.2.3): largest code per length, value offsets and the symbols.
#[derive(Debug, Clone)]
pub struct DecodeTable {
    maxcode: [i32; 18],
    valoffset: [i32; 17],
    symbols: Vec<u8>,
}

impl DecodeTable {
    pub fn from(spec: &HuffmanSpec) -> Result<Self> {
        let (_, codes) = spec.generate_codes()?;

        let mut maxcode = [-1i32; 18];
        let mut valoffset = [0i32; 17];
        let mut p = 0usize;

        for l in 1..=16 {
            let count = spec.counts[l - 1] as usize;
            if count > 0 {
                valoffset[l] = p as i32 - codes[p] as i32;
                p += count;
                maxcode[l] = codes[p - 1] as i32;
            }
        }
        maxcode[17] = i32::MAX;

        Ok(DecodeTable {
            maxcode,
            valoffset,
            symbols: spec.symbols.clone(),
        })
    }

    pub fn decode<R: Read + ?Sized>(&self, reader: &mut BitReader, src: &mut R) -> Result<u8> {
        let mut l = 1;
        let mut code = reader.get_bit(src)? as i32;

        while code > self.maxcode[l] {
            code = (code << 1) | reader.get_bit(src)? as i32;
            l += 1;
            if l > 16 {
                return Err(anyhow!("Corrupted JPEG data: bad Huffman code 0x{code:x}"));
            }
        }

        usize::try_from(code + self.valoffset[l])
            .ok()
            .and_then(|index| self.symbols.get(index).copied())
            .ok_or(anyhow!("Corrupted JPEG data: huffman code 0x{code:x} has no symbol"))
    }
}

/// Encoder form of a table: (code, size) for each of the 256 symbols; size 0 marks an absent
/// symbol.
#[derive(Debug, Clone)]
pub struct EncodeTable {
    codes: Vec<(u16, u8)>,
}

impl EncodeTable {
    pub fn from(spec: &HuffmanSpec) -> Result<Self> {
        let (sizes, codes) = spec.generate_codes()?;

        let mut table = vec![(0u16, 0u8); 256];
        for ((&symbol, &size), &code) in spec.symbols.iter().zip(sizes.iter()).zip(codes.iter()) {
            table[symbol as usize] = (code, size);
        }

        Ok(EncodeTable { codes: table })
    }

    pub fn code(&self, symbol: u8) -> Result<(u16, u8)> {
        match self.codes[symbol as usize] {
            (_, 0) => Err(anyhow!("Missing Huffman Table Entry for symbol 0x{symbol:02x}")),
            entry => Ok(entry),
        }
    }

    pub fn put<W: Write + ?Sized>(&self, writer: &mut BitWriter, out: &mut W, symbol: u8) -> Result<()> {
        let (code, size) = self.code(symbol)?;
        writer.put_bits(out, code as u32, size as u32)
    }
}

/// Symbol statistics for one table, gathered by a dry-run encode.
#[derive(Debug, Clone)]
pub struct FrequencyCounter {
    frequencies: [u32; 257],
}

impl Default for FrequencyCounter {
    fn default() -> Self {
        FrequencyCounter {
            frequencies: [0; 257],
        }
    }
}

impl FrequencyCounter {
    pub fn new() -> Self {
        FrequencyCounter::default()
    }

    pub fn count(&mut self, symbol: u8) {
        self.frequencies[symbol as usize] += 1;
    }

    pub fn frequencies(&self) -> &[u32; 257] {
        &self.frequencies
    }

    pub fn to_spec(&self, class: HuffmanClass, destination_id: u8) -> Result<HuffmanSpec> {
        HuffmanSpec::optimal(class, destination_id, &self.frequencies)
    }
}

const STD_DC_LUMINANCE_COUNTS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const STD_DC_CHROMINANCE_COUNTS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const STD_DC_SYMBOLS: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const STD_AC_LUMINANCE_COUNTS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 0x7d];
const STD_AC_LUMINANCE_SYMBOLS: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61, 0x07,
    0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xa1, 0x08, 0x23, 0x42, 0xb1, 0xc1, 0x15, 0x52, 0xd1, 0xf0,
    0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0a, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x25, 0x26, 0x27, 0x28,
    0x29, 0x2a, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49,
    0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69,
    0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89,
    0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7,
    0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3, 0xc4, 0xc5,
    0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda, 0xe1, 0xe2,
    0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

const STD_AC_CHROMINANCE_COUNTS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 0x77];
const STD_AC_CHROMINANCE_SYMBOLS: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61, 0x71,
    0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xa1, 0xb1, 0xc1, 0x09, 0x23, 0x33, 0x52, 0xf0,
    0x15, 0x62, 0x72, 0xd1, 0x0a, 0x16, 0x24, 0x34, 0xe1, 0x25, 0xf1, 0x17, 0x18, 0x19, 0x1a, 0x26,
    0x27, 0x28, 0x29, 0x2a, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3a, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48,
    0x49, 0x4a, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5a, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68,
    0x69, 0x6a, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7a, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87,
    0x88, 0x89, 0x8a, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9a, 0xa2, 0xa3, 0xa4, 0xa5,
    0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xb2, 0xb3, 0xb4, 0xb5, 0xb6, 0xb7, 0xb8, 0xb9, 0xba, 0xc2, 0xc3,
    0xc4, 0xc5, 0xc6, 0xc7, 0xc8, 0xc9, 0xca, 0xd2, 0xd3, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8, 0xd9, 0xda,
    0xe2, 0xe3, 0xe4, 0xe5, 0xe6, 0xe7, 0xe8, 0xe9, 0xea, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8,
    0xf9, 0xfa,
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn round_trip(spec: &HuffmanSpec, symbols: &[u8]) -> Result<Vec<u8>> {
        let encoder = EncodeTable::from(spec)?;
        let decoder = DecodeTable::from(spec)?;

        let mut out = vec![];
        let mut writer = BitWriter::new();
        for &symbol in symbols {
            encoder.put(&mut writer, &mut out, symbol)?;
        }
        writer.flush(&mut out)?;

        let mut src = Cursor::new(&out[..]);
        let mut reader = BitReader::new();
        symbols
            .iter()
            .map(|_| decoder.decode(&mut reader, &mut src))
            .collect()
    }

    #[test]
    fn test_standard_tables_round_trip() -> Result<()> {
        for spec in HuffmanSpec::standard() {
            let symbols = spec.symbols.clone();
            assert_eq!(round_trip(&spec, &symbols)?, symbols);
        }

        Ok(())
    }

    #[test]
    fn test_standard_dc_codes() -> Result<()> {
        let specs = HuffmanSpec::standard();
        let dc_luminance = EncodeTable::from(&specs[0])?;

        // K.3.1: category 0 is "00", category 1 is "010", category 11 is "111111110"
        assert_eq!(dc_luminance.code(0)?, (0b00, 2));
        assert_eq!(dc_luminance.code(1)?, (0b010, 3));
        assert_eq!(dc_luminance.code(11)?, (0b1_1111_1110, 9));
        assert!(dc_luminance.code(12).is_err());

        Ok(())
    }

    #[test]
    fn test_segment_parse_and_serialize() -> Result<()> {
        let specs = HuffmanSpec::standard();
        let payload: Vec<u8> = specs.iter().flat_map(|s| s.to_bytes()).collect();

        let parsed = HuffmanSpec::parse_segment(&payload)?;
        assert_eq!(parsed, specs);
        assert_eq!(parsed[3].class, HuffmanClass::AC);
        assert_eq!(parsed[3].destination_id, 1);

        assert!(HuffmanSpec::parse_segment(&payload[..20]).is_err());

        Ok(())
    }

    #[test]
    fn test_rejects_overfull_table() -> Result<()> {
        let mut counts = [0u8; 16];
        counts[0] = 2;
        let spec = HuffmanSpec::from(HuffmanClass::DC, 0, counts, vec![0, 1])?;

        assert!(DecodeTable::from(&spec).is_err());

        Ok(())
    }

    #[test]
    fn test_optimal_single_symbol() -> Result<()> {
        let mut counter = FrequencyCounter::new();
        for _ in 0..10 {
            counter.count(0x00);
        }

        let spec = counter.to_spec(HuffmanClass::AC, 0)?;
        assert_eq!(spec.symbols, vec![0x00]);
        assert_eq!(spec.counts[0], 1);
        assert_eq!(round_trip(&spec, &[0, 0, 0])?, vec![0, 0, 0]);

        Ok(())
    }

    #[test]
    fn test_optimal_limits_code_length() -> Result<()> {
        // Fibonacci frequencies force a degenerate tree deeper than 16
        let mut frequencies = [0u32; 257];
        let (mut a, mut b) = (1u32, 1u32);
        for f in frequencies.iter_mut().take(30) {
            *f = a;
            let next = a + b;
            a = b;
            b = next;
        }

        let spec = HuffmanSpec::optimal(HuffmanClass::DC, 0, &frequencies)?;
        assert_eq!(spec.symbols.len(), 30);
        assert!(DecodeTable::from(&spec).is_ok());

        let symbols: Vec<u8> = (0..30).collect();
        assert_eq!(round_trip(&spec, &symbols)?, symbols);

        Ok(())
    }

    proptest! {
        #[test]
        fn prop_optimal_tables_round_trip(
            symbols in proptest::collection::vec(any::<u8>(), 1..400),
        ) {
            let mut counter = FrequencyCounter::new();
            for &symbol in &symbols {
                counter.count(symbol);
            }

            let spec = counter.to_spec(HuffmanClass::AC, 1).unwrap();
            prop_assert_eq!(round_trip(&spec, &symbols).unwrap(), symbols);
        }
    }
}
