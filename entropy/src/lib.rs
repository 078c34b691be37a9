//! Entropy-coded segment primitives shared by the JPEG reader and writer: a byte-stuffing aware
//! bit reader/writer and canonical Huffman tables (Annex C, F.2.2.3 and K.2 of T.81).

pub mod bitio;
pub mod huffman;

pub use bitio::{BitReader, BitWriter};
pub use huffman::{DecodeTable, EncodeTable, FrequencyCounter, HuffmanClass, HuffmanSpec};
