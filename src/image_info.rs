use crate::error::malformed;
use crate::exif::Exif;
use crate::frame_header::FrameHeader;
use crate::transform::{Options, Transform};
use anyhow::Result;
use log::{debug, info};
use std::fmt;

/// Offset of the signature within an APP marker, past the marker code and length.
pub(crate) const SIGNATURE_OFFSET: usize = 4;

/// How the image-info marker is to be regenerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoRewrite {
    pub op: Transform,
    pub options: Options,
    /// Keep the tag changes in the in-memory tree after writing.
    pub modify: bool,
    /// Dimensions of the transformed image, 0 when unknown.
    pub width: usize,
    pub height: usize,
}

impl InfoRewrite {
    pub fn from(op: Transform, options: Options, modify: bool) -> Self {
        InfoRewrite {
            op,
            options,
            modify,
            width: 0,
            height: 0,
        }
    }

    pub(crate) fn sized(self, frame: &FrameHeader) -> Self {
        InfoRewrite {
            width: frame.image_width,
            height: frame.image_height,
            ..self
        }
    }
}

/// Metadata carried by an application marker, kept in sync with the image when it is
/// transformed.
pub trait ImageInfo: fmt::Debug + fmt::Display {
    fn format(&self) -> &'static str;

    /// Offset of the embedded thumbnail from the marker signature.
    fn thumbnail_offset(&self) -> Option<usize>;

    fn thumbnail_length(&self) -> usize;

    /// The marker body, from the signature on, regenerated for `rewrite`. `appx` is the
    /// complete marker the info was read from.
    fn write_info(&mut self, appx: &[u8], rewrite: &InfoRewrite) -> Result<Vec<u8>>;

    fn as_exif(&self) -> Option<&Exif> {
        None
    }

    fn as_exif_mut(&mut self) -> Option<&mut Exif> {
        None
    }
}

impl ImageInfo for Exif {
    fn format(&self) -> &'static str {
        "Exif"
    }

    fn thumbnail_offset(&self) -> Option<usize> {
        Exif::thumbnail_offset(self)
    }

    fn thumbnail_length(&self) -> usize {
        Exif::thumbnail_length(self)
    }

    fn write_info(&mut self, appx: &[u8], rewrite: &InfoRewrite) -> Result<Vec<u8>> {
        Exif::write_info(self, appx, rewrite)
    }

    fn as_exif(&self) -> Option<&Exif> {
        Some(self)
    }

    fn as_exif_mut(&mut self) -> Option<&mut Exif> {
        Some(self)
    }
}

/// Known application marker layouts, told apart by the bytes after the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSignature {
    Jfif,
    Jfxx,
    Exif,
    Ciff,
    Fpxr,
    Unknown,
}

impl AppSignature {
    pub fn sniff(appx: &[u8]) -> AppSignature {
        let body = appx.get(SIGNATURE_OFFSET..).unwrap_or_default();

        if body.starts_with(b"JFIF\0") {
            AppSignature::Jfif
        } else if body.starts_with(b"JFXX\0") {
            AppSignature::Jfxx
        } else if body.starts_with(b"Exif") {
            AppSignature::Exif
        } else if (body.starts_with(b"II") || body.starts_with(b"MM"))
            && body.get(6..10) == Some(b"HEAP".as_slice())
        {
            AppSignature::Ciff
        } else if body.starts_with(b"FPXR") {
            AppSignature::Fpxr
        } else {
            AppSignature::Unknown
        }
    }

    /// Markers whose metadata describe the whole image and so follow it through transforms.
    pub fn is_image_header(&self) -> bool {
        matches!(self, AppSignature::Jfxx | AppSignature::Exif | AppSignature::Ciff)
    }
}

/// Sniffs `appx` and builds its image info when this crate understands the layout.
pub fn load(appx: &[u8]) -> Result<Option<Box<dyn ImageInfo>>> {
    let signature = AppSignature::sniff(appx);
    debug!("APP marker signature {signature:?}, {} bytes", appx.len());

    match signature {
        AppSignature::Exif => Ok(Some(Box::new(Exif::parse(appx)?))),
        AppSignature::Jfif => {
            let (x, y) = (appx.get(16).copied(), appx.get(17).copied());
            if let (Some(x @ 1..), Some(y @ 1..)) = (x, y) {
                info!("Thumbnail {x}x{y} in APP0");
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

/// Regenerates the complete marker: the original marker code, the new length and the body.
pub(crate) fn rewrite_appx(
    appx: &[u8],
    info: &mut dyn ImageInfo,
    rewrite: &InfoRewrite,
) -> Result<Vec<u8>> {
    let body = info.write_info(appx, rewrite)?;
    let length = u16::try_from(body.len() + 2).map_err(|_| {
        malformed(format!(
            "{} info of {} bytes does not fit in a marker",
            info.format(),
            body.len()
        ))
    })?;

    let mut out = Vec::with_capacity(body.len() + SIGNATURE_OFFSET);
    out.extend_from_slice(&appx[..2]);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_signatures() {
        let framed = |body: &[u8]| {
            let mut appx = vec![0xFF, 0xE1, 0, 0];
            appx.extend_from_slice(body);
            appx
        };

        assert_eq!(AppSignature::sniff(&framed(b"JFIF\0\x01\x02")), AppSignature::Jfif);
        assert_eq!(AppSignature::sniff(&framed(b"JFXX\0\x10")), AppSignature::Jfxx);
        assert_eq!(AppSignature::sniff(&Exif::marker_data()), AppSignature::Exif);
        assert_eq!(AppSignature::sniff(&framed(b"II\x1a\0\0\0HEAPCCDR")), AppSignature::Ciff);
        assert_eq!(AppSignature::sniff(&framed(b"FPXR\0")), AppSignature::Fpxr);
        assert_eq!(AppSignature::sniff(&framed(b"Adobe")), AppSignature::Unknown);
        assert_eq!(AppSignature::sniff(&[0xFF, 0xE1]), AppSignature::Unknown);
    }

    #[test]
    fn test_rewrite_frames_marker() -> Result<()> {
        let appx = Exif::marker_data();
        let mut info = load(&appx)?.unwrap();
        assert_eq!(info.format(), "Exif");

        let rewrite = InfoRewrite::from(Transform::None, Options::NONE, true);
        let marker = rewrite_appx(&appx, info.as_mut(), &rewrite)?;

        assert_eq!(&marker[..2], &[0xFF, 0xE1]);
        assert_eq!(u16::from_be_bytes([marker[2], marker[3]]) as usize, marker.len() - 2);
        assert_eq!(info.as_exif().map(Exif::make), Some("FAKE".to_string()));

        Ok(())
    }
}
