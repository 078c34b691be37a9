//! Lossless transformations of baseline JPEG images.
//!
//! Images are decoded only as far as their quantized DCT coefficients, so rotating, flipping,
//! transposing or cropping never requantizes anything. APPn metadata (EXIF in particular) is
//! kept in step with the image: dimensions, orientation and the embedded thumbnail.

pub mod coding;
pub mod coefficient;
pub(crate) mod entropy_decoder;
pub(crate) mod entropy_encoder;
pub mod error;
pub mod exif;
pub mod frame_header;
pub mod huffman_tables;
pub mod image_info;
pub mod jpeg;
pub mod marker;
pub mod progress;
pub mod quantization_table;
pub mod reader;
pub mod sample_precision;
pub mod scan_header;
pub mod transform;
pub mod writer;
pub mod xfer;

#[cfg(test)]
mod test_support;

pub use error::LljtError;
pub use jpeg::LosslessJpeg;
pub use reader::{ReadDepth, Step};
pub use transform::{CropRect, Options, Transform};
pub use writer::WriteConfig;
pub use xfer::Xfer;
