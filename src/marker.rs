pub(crate) enum MarkerType {
    Segment,
    StandAlone,
}

#[derive(Debug, Copy, Clone, PartialOrd, PartialEq, Hash, Eq)]
pub enum Marker {
    GLOBAL = 0xFF,
    STUFF = 0x00,

    /// Start of Frame markers, non-differential, Huffman coding
    /// Baseline DCT
    SOF0 = 0xC0,

    /// Extended sequential DCT
    SOF1 = 0xC1,

    /// Progressive DCT
    SOF2 = 0xC2,

    /// Lossless (sequential)
    SOF3 = 0xC3,

    /// Start of Frame markers, differential, Huffman coding
    /// Differential sequential DCT
    SOF5 = 0xC5,

    /// Differential progressive DCT
    SOF6 = 0xC6,

    /// Differential lossless (sequential)
    SOF7 = 0xC7,

    /// Start of Frame markers, non-differential, arithmetic coding
    JPG = 0xC8,

    /// Extended Sequential DCT
    SOF9 = 0xC9,

    /// Progressive DCT
    SOF10 = 0xCA,

    /// Lossless (sequential)
    SOF11 = 0xCB,

    /// Start of Frame markers, differential, arithmetic coding
    /// Differential sequential DCT
    SOF13 = 0xCD,

    /// Differential progressive DCT
    SOF14 = 0xCE,

    /// Differential lossless (sequential)
    SOF15 = 0xCF,

    /// Huffman table specification
    DHT = 0xC4,

    /// Define arithmetic coding conditioning(s)
    DAC = 0xCC,

    /// Restart with modulo 8 count "M"
    RST0 = 0xD0,
    RST1 = 0xD1,
    RST2 = 0xD2,
    RST3 = 0xD3,
    RST4 = 0xD4,
    RST5 = 0xD5,
    RST6 = 0xD6,
    RST7 = 0xD7,

    /// Start of image
    SOI = 0xD8,

    /// End of image
    EOI = 0xD9,

    /// Start of scan
    SOS = 0xDA,

    /// Define quantization table(s)
    DQT = 0xDB,

    /// Define number of lines
    DNL = 0xDC,

    /// Define restart interval
    DRI = 0xDD,

    /// Define hierarchical progression
    DHP = 0xDE,

    /// Expand reference components
    EXP = 0xDF,

    /// Reserved for application segments
    APP0 = 0xE0,
    APP1 = 0xE1,
    APP2 = 0xE2,
    APP3 = 0xE3,
    APP4 = 0xE4,
    APP5 = 0xE5,
    APP6 = 0xE6,
    APP7 = 0xE7,
    APP8 = 0xE8,
    APP9 = 0xE9,
    APPA = 0xEA,
    APPB = 0xEB,
    APPC = 0xEC,
    APPD = 0xED,
    APPE = 0xEE,
    APPF = 0xEF,

    /// Comment
    COM = 0xFE,

    /// For temporary private use in arithmetic coding
    TEM = 0x01,
}

impl Marker {
    pub(crate) const SIZE: usize = 2;

    pub fn from(code: u8) -> Option<Marker> {
        use crate::marker::Marker::*;

        let marker = match code {
            0xC0 => SOF0,
            0xC1 => SOF1,
            0xC2 => SOF2,
            0xC3 => SOF3,
            0xC4 => DHT,
            0xC5 => SOF5,
            0xC6 => SOF6,
            0xC7 => SOF7,
            0xC8 => JPG,
            0xC9 => SOF9,
            0xCA => SOF10,
            0xCB => SOF11,
            0xCC => DAC,
            0xCD => SOF13,
            0xCE => SOF14,
            0xCF => SOF15,
            0xD0 => RST0,
            0xD1 => RST1,
            0xD2 => RST2,
            0xD3 => RST3,
            0xD4 => RST4,
            0xD5 => RST5,
            0xD6 => RST6,
            0xD7 => RST7,
            0xD8 => SOI,
            0xD9 => EOI,
            0xDA => SOS,
            0xDB => DQT,
            0xDC => DNL,
            0xDD => DRI,
            0xDE => DHP,
            0xDF => EXP,
            0xE0 => APP0,
            0xE1 => APP1,
            0xE2 => APP2,
            0xE3 => APP3,
            0xE4 => APP4,
            0xE5 => APP5,
            0xE6 => APP6,
            0xE7 => APP7,
            0xE8 => APP8,
            0xE9 => APP9,
            0xEA => APPA,
            0xEB => APPB,
            0xEC => APPC,
            0xED => APPD,
            0xEE => APPE,
            0xEF => APPF,
            0xFE => COM,
            0xFF => GLOBAL,
            0x01 => TEM,
            0x00 => STUFF,
            _ => return None,
        };

        Some(marker)
    }

    /// Restart marker carrying the modulo 8 count `n`.
    pub fn restart(n: u8) -> u8 {
        Marker::RST0 as u8 + (n & 7)
    }

    pub fn is_app(code: u8) -> bool {
        (Marker::APP0 as u8..=Marker::APPF as u8).contains(&code)
    }

    pub fn is_restart(code: u8) -> bool {
        (Marker::RST0 as u8..=Marker::RST7 as u8).contains(&code)
    }

    /// Frame markers for coding processes this crate refuses to touch.
    pub fn is_rejected_frame(&self) -> bool {
        matches!(
            self,
            Marker::SOF2
                | Marker::SOF3
                | Marker::SOF5
                | Marker::SOF6
                | Marker::SOF7
                | Marker::JPG
                | Marker::SOF9
                | Marker::SOF10
                | Marker::SOF11
                | Marker::SOF13
                | Marker::SOF14
                | Marker::SOF15
        )
    }

    /// Some markers stand alone, that is, which is not the start of a marker segment.
    pub(crate) fn is_segment(&self) -> MarkerType {
        match self {
            Marker::RST0
            | Marker::RST1
            | Marker::RST2
            | Marker::RST3
            | Marker::RST4
            | Marker::RST5
            | Marker::RST6
            | Marker::RST7
            | Marker::SOI
            | Marker::EOI
            | Marker::TEM => MarkerType::StandAlone,
            _ => MarkerType::Segment,
        }
    }

    pub fn to_u16(&self) -> u16 {
        u16::from_be_bytes([Marker::GLOBAL as u8, *self as u8])
    }

    pub fn to_bytes(&self) -> [u8; Marker::SIZE] {
        [Marker::GLOBAL as u8, *self as u8]
    }
}

/// Frames a segment payload: marker, big-endian length (payload + 2), payload.
pub(crate) fn segment(marker: Marker, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(Marker::SIZE + 2 + payload.len());
    bytes.extend_from_slice(&marker.to_bytes());
    bytes.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}
