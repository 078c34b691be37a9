use crate::coefficient::NATURAL_ORDER;
use crate::error::malformed;
use crate::sample_precision::SamplePrecision;
use anyhow::Result;

pub(crate) const QUANTIZATION_TABLE_ELEMENTS: usize = 64;

/// The set of 64 quantization values used to quantize the DCT coefficients
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizationTable {
    /// Pq: Specifies the precision of the Qk values. Value 0 indicates 8-bit Qk values; value 1
    /// indicates 16-bit Qk values.
    pub(crate) precision: SamplePrecision,

    /// Tq: Specifies one of four possible destinations at the decoder into which the
    /// quantization table shall be installed.
    pub(crate) table_destination_id: u8,

    /// Qk in natural (row-major) order. The segment carries them in zig-zag order.
    pub(crate) elements: [u16; QUANTIZATION_TABLE_ELEMENTS],
}

impl QuantizationTable {
    pub(crate) fn from(
        table_destination_id: u8,
        precision: SamplePrecision,
        elements: [u16; QUANTIZATION_TABLE_ELEMENTS],
    ) -> Self {
        QuantizationTable {
            precision,
            table_destination_id,
            elements,
        }
    }

    /// Parses every table packed into one DQT payload.
    pub(crate) fn parse_segment(payload: &[u8]) -> Result<Vec<QuantizationTable>> {
        let mut tables = vec![];
        let mut cursor = 0;

        while cursor < payload.len() {
            let info = payload[cursor];
            cursor += 1;

            let precision = SamplePrecision::decode(info >> 4)?;
            let size = precision.element_size();
            let end = cursor + QUANTIZATION_TABLE_ELEMENTS * size;
            if end > payload.len() {
                return Err(malformed("quantization table truncated"));
            }

            let mut elements = [0u16; QUANTIZATION_TABLE_ELEMENTS];
            for (k, chunk) in payload[cursor..end].chunks_exact(size).enumerate() {
                let value = match precision {
                    SamplePrecision::EightBit => chunk[0] as u16,
                    SamplePrecision::SixteenBit => u16::from_be_bytes([chunk[0], chunk[1]]),
                };
                elements[NATURAL_ORDER[k] as usize] = value;
            }
            cursor = end;

            tables.push(QuantizationTable::from(info & 0x0F, precision, elements));
        }

        Ok(tables)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![(self.precision.encode() << 4) | self.table_destination_id];
        for &natural in NATURAL_ORDER.iter() {
            let value = self.elements[natural as usize];
            match self.precision {
                SamplePrecision::EightBit => bytes.push(value as u8),
                SamplePrecision::SixteenBit => bytes.extend_from_slice(&value.to_be_bytes()),
            }
        }
        bytes
    }

    /// Qk for zig-zag position `k`.
    pub fn zigzag(&self, k: usize) -> u16 {
        self.elements[NATURAL_ORDER[k] as usize]
    }

    pub fn natural(&self) -> &[u16; QUANTIZATION_TABLE_ELEMENTS] {
        &self.elements
    }

    pub fn destination_id(&self) -> u8 {
        self.table_destination_id
    }

    pub(crate) fn transpose(&mut self) {
        for row in 0..8 {
            for col in 0..row {
                self.elements.swap(row * 8 + col, col * 8 + row);
            }
        }
    }
}
