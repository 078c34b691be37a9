use crate::error::malformed;
use anyhow::Result;

/// Element precision of a quantization table (Pq).
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SamplePrecision {
    EightBit,
    SixteenBit,
}

impl SamplePrecision {
    pub(crate) fn decode(pq: u8) -> Result<Self> {
        match pq {
            0 => Ok(SamplePrecision::EightBit),
            1 => Ok(SamplePrecision::SixteenBit),
            _ => Err(malformed(format!("invalid quantization table precision {pq}"))),
        }
    }

    pub(crate) fn encode(&self) -> u8 {
        match self {
            SamplePrecision::EightBit => 0,
            SamplePrecision::SixteenBit => 1,
        }
    }

    pub fn bits(&self) -> usize {
        match self {
            SamplePrecision::EightBit => 8,
            SamplePrecision::SixteenBit => 16,
        }
    }

    pub(crate) fn element_size(&self) -> usize {
        self.bits() / 8
    }
}
