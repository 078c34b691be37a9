use crate::error::unsupported;
use crate::marker::Marker;
use anyhow::Result;

/// The DCT coding processes whose coefficients can be carried through untouched.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum CodingProcess {
    BaselineDCT,
    ExtendedSequentialDCT,
}

impl CodingProcess {
    /// Resolves a frame marker, refusing every progressive, lossless, hierarchical and arithmetic
    /// variant.
    pub(crate) fn from(marker: Marker) -> Result<Self> {
        match marker {
            Marker::SOF0 => Ok(CodingProcess::BaselineDCT),
            Marker::SOF1 => Ok(CodingProcess::ExtendedSequentialDCT),
            Marker::SOF2 => Err(unsupported("Progressive, Huffman not supported")),
            Marker::SOF9 => Err(unsupported("Extended sequential, arithmetic not supported")),
            Marker::SOF10 => Err(unsupported("Progressive, arithmetic not supported")),
            _ => Err(unsupported("Unsupported SOF marker")),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CodingProcess::BaselineDCT => "baseline DCT, Huffman",
            CodingProcess::ExtendedSequentialDCT => "extended sequential DCT, Huffman",
        }
    }
}
