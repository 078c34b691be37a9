//! The EXIF metadata block carried by an APP1 marker: a TIFF header followed by the main IFD
//! (IFD0) and the optional thumbnail IFD (IFD1), each with their sub-IFDs.

pub mod entry;
pub mod ifd;
pub mod maker_note;
pub mod orientation;
pub mod thumbnail;

use crate::error::malformed;
use crate::exif::entry::{Entry, EntryType, Value};
use crate::exif::ifd::{ByteOrder, Ifd, IfdReader, IfdWriter, ThumbnailSource};
use crate::exif::maker_note::MakerNoteKind;
use crate::exif::orientation::{transform_orientation_tag, Orientation};
use crate::exif::thumbnail::{
    correct_thumbnail_tags, remove_thumbnail_tags, set_thumbnail_tags, thumbnail_location,
    ThumbnailLocation,
};
use crate::image_info::InfoRewrite;
use crate::transform::Options;
use anyhow::Result;
use log::{debug, warn};
use std::fmt;

pub mod tags {
    pub const IMAGEWIDTH: u16 = 0x100;
    pub const IMAGELENGTH: u16 = 0x101;
    pub const COMPRESSION: u16 = 0x103;
    pub const PHOTOMETRICINTERPRETATION: u16 = 0x106;
    pub const IMAGEDESCRIPTION: u16 = 0x10E;
    pub const MAKE: u16 = 0x10F;
    pub const MODEL: u16 = 0x110;
    pub const STRIPOFFSETS: u16 = 0x111;
    pub const ORIENTATION: u16 = 0x112;
    pub const STRIPBYTECOUNTS: u16 = 0x117;
    pub const XRESOLUTION: u16 = 0x11A;
    pub const YRESOLUTION: u16 = 0x11B;
    pub const RESOLUTIONUNIT: u16 = 0x128;
    pub const SOFTWARE: u16 = 0x131;
    pub const DATETIME: u16 = 0x132;
    pub const JPEGINTERCHANGEFORMAT: u16 = 0x201;
    pub const JPEGINTERCHANGEFORMATLENGTH: u16 = 0x202;
    pub const EXPOSURETIME: u16 = 0x829A;
    pub const FNUMBER: u16 = 0x829D;
    pub const EXIFOFFSET: u16 = 0x8769;
    pub const GPSINFO: u16 = 0x8825;
    pub const DATETIMEORIGINAL: u16 = 0x9003;
    pub const MAKERNOTE: u16 = 0x927C;
    pub const USERCOMMENT: u16 = 0x9286;
    pub const EXIFIMAGEWIDTH: u16 = 0xA002;
    pub const EXIFIMAGELENGTH: u16 = 0xA003;
    pub const INTEROPERABILITYOFFSET: u16 = 0xA005;
}

/// Pseudo tags of the two top-level IFDs.
pub const MAIN_IFD: u16 = 0;
pub const THUMBNAIL_IFD: u16 = 1;

/// Value reported for a missing make or model.
pub const NA: &str = "n/a";

pub const SIGNATURE: &[u8; 6] = b"Exif\0\0";

/// Offset of the TIFF header from the start of the signature.
pub const FIRST_IFD_OFFSET: usize = SIGNATURE.len();

/// Bytes before the signature in an APP marker: the marker code and the segment length.
const APP_HEADER_LEN: usize = 4;

const TIFF_MAGIC: u16 = 0x2A;
const TIFF_HEADER_LEN: usize = 8;

#[rustfmt::skip]
const DEFAULT_MARKER: [u8; 42] = [
    0xFF, 0xE1, 0x00, 0x28,
    b'E', b'x', b'i', b'f', 0x00, 0x00,
    b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00,
    0x01, 0x00,
    0x0F, 0x01, 0x02, 0x00, 0x05, 0x00, 0x00, 0x00, 0x1A, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
    b'F', b'A', b'K', b'E', 0x00, 0x00,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Exif {
    order: ByteOrder,
    version: u16,
    main: Ifd,
    thumbnail: Option<Ifd>,
    maker_note: MakerNoteKind,
}

impl Exif {
    /// Parses a complete APP1 marker: marker code, length, signature, TIFF header and IFDs.
    pub fn parse(appx: &[u8]) -> Result<Exif> {
        let body = appx.get(APP_HEADER_LEN..).unwrap_or_default();
        if !body.starts_with(SIGNATURE) {
            return Err(malformed("marker does not carry the Exif signature"));
        }

        let tiff = &body[FIRST_IFD_OFFSET..];
        if tiff.len() < TIFF_HEADER_LEN {
            return Err(malformed(format!(
                "Exif TIFF header truncated to {} bytes",
                tiff.len()
            )));
        }
        let order = ByteOrder::from(tiff).ok_or(malformed(format!(
            "unknown Exif byte order 0x{:02x}{:02x}",
            tiff[0], tiff[1]
        )))?;

        let mut reader = IfdReader::from(tiff, order);
        let version = reader.int(2, 2, false)? as u16;
        let first = reader.int(4, 4, false)? as usize;
        if version != TIFF_MAGIC {
            warn!("Warning: Exif TIFF header carries 0x{version:x} instead of 0x{TIFF_MAGIC:x}");
        }

        let main = reader.read_ifd(first, MAIN_IFD, EntryType::Long)?;

        let count = reader.int(first, 2, false)? as usize;
        let next = reader.int(first + 2 + count * ifd::DIR_ENTRY_SIZE, 4, false)? as usize;
        let mut thumbnail = match next {
            0 => None,
            next => match reader.read_ifd(next, THUMBNAIL_IFD, EntryType::Long) {
                Ok(ifd) => Some(ifd),
                Err(e) => {
                    warn!("Warning: Exif Read: skipping thumbnail IFD: {e}");
                    None
                }
            },
        };

        if let Some(ifd) = thumbnail.as_mut() {
            if let Some(message) = correct_thumbnail_tags(ifd, tiff) {
                warn!("Warning: Exif Read: {message}");
            }
        }

        let maker_note = reader.maker_note;
        debug!("Exif {order:?} version 0x{version:x}, maker note {maker_note:?}");

        Ok(Exif {
            order,
            version,
            main,
            thumbnail,
            maker_note,
        })
    }

    /// A minimal APP1 Exif marker: Intel byte order and an IFD0 holding only MAKE="FAKE".
    pub fn marker_data() -> Vec<u8> {
        DEFAULT_MARKER.to_vec()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn maker_note_kind(&self) -> MakerNoteKind {
        self.maker_note
    }

    pub fn main_ifd(&self) -> &Ifd {
        &self.main
    }

    pub fn main_ifd_mut(&mut self) -> &mut Ifd {
        &mut self.main
    }

    pub fn thumbnail_ifd(&self) -> Option<&Ifd> {
        self.thumbnail.as_ref()
    }

    pub fn thumbnail_ifd_mut(&mut self) -> Option<&mut Ifd> {
        self.thumbnail.as_mut()
    }

    fn ifd(&self, main: bool) -> Option<&Ifd> {
        match main {
            true => Some(&self.main),
            false => self.thumbnail.as_ref(),
        }
    }

    fn ifd_mut(&mut self, main: bool) -> Option<&mut Ifd> {
        match main {
            true => Some(&mut self.main),
            false => self.thumbnail.as_mut(),
        }
    }

    /// Looks `tag` up in IFD0 (`main`) or IFD1 and their sub-IFDs.
    pub fn tag_value(&self, tag: u16, main: bool) -> Option<&Entry> {
        self.ifd(main).and_then(|ifd| ifd.entry(tag))
    }

    pub fn tag_value_mut(&mut self, tag: u16, main: bool) -> Option<&mut Entry> {
        self.ifd_mut(main).and_then(|ifd| ifd.entry_mut(tag))
    }

    /// Replaces the entry for `tag` wherever it lives, or adds it to the top-level IFD. Nothing
    /// happens when IFD1 is asked for and absent.
    pub fn set_tag_value(&mut self, tag: u16, entry: Entry, main: bool) {
        if let Some(ifd) = self.ifd_mut(main) {
            match ifd.entry_mut(tag) {
                Some(existing) => *existing = entry,
                None => {
                    ifd.add_entry(tag, entry);
                }
            }
        }
    }

    pub fn make(&self) -> String {
        self.tag_value(tags::MAKE, true)
            .map_or(NA.to_string(), |e| e.to_string())
    }

    pub fn model(&self) -> String {
        self.tag_value(tags::MODEL, true)
            .map_or(NA.to_string(), |e| e.to_string())
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.tag_value(tags::ORIENTATION, true)
            .and_then(|e| e.integer(0))
            .and_then(|v| Orientation::from(v as u16))
    }

    pub fn thumbnail_location(&self) -> Option<ThumbnailLocation> {
        self.thumbnail.as_ref().and_then(thumbnail_location)
    }

    /// Thumbnail offset from the start of the Exif signature.
    pub fn thumbnail_offset(&self) -> Option<usize> {
        self.thumbnail_location()
            .map(|location| location.offset + FIRST_IFD_OFFSET)
    }

    pub fn thumbnail_length(&self) -> usize {
        self.thumbnail_location().map_or(0, |location| location.length)
    }

    /// Drops the thumbnail from the next write.
    pub fn remove_thumbnail_tags(&mut self) -> bool {
        match self.thumbnail.as_mut() {
            Some(ifd) => {
                remove_thumbnail_tags(ifd);
                true
            }
            None => false,
        }
    }

    /// Updates the orientation, dimension and resolution tags for `rewrite`.
    fn apply(&mut self, rewrite: &InfoRewrite) {
        if rewrite.options.contains(Options::XFORM_ORIENTATION) {
            if let Some(entry) = self.main.entry_mut(tags::ORIENTATION) {
                let current = entry.integer(0).unwrap_or(0) as u16;
                let oriented = transform_orientation_tag(current, rewrite.op);
                if oriented != 0 {
                    entry.set_integer(0, oriented as i64);
                }
            }
        }

        let has_dimensions = self.main.entry(tags::EXIFIMAGEWIDTH).is_some()
            && self.main.entry(tags::EXIFIMAGELENGTH).is_some();
        let mut dimensions_set = false;
        if has_dimensions && rewrite.width > 0 && rewrite.height > 0 {
            self.set_first(tags::EXIFIMAGEWIDTH, Value::Integer(rewrite.width as i64));
            self.set_first(tags::EXIFIMAGELENGTH, Value::Integer(rewrite.height as i64));
            dimensions_set = true;
        }

        if rewrite.op.is_quarter_turn() {
            if has_dimensions && !dimensions_set {
                self.swap_first(true, tags::EXIFIMAGEWIDTH, tags::EXIFIMAGELENGTH);
            }
            self.swap_first(true, tags::XRESOLUTION, tags::YRESOLUTION);
            self.swap_first(false, tags::XRESOLUTION, tags::YRESOLUTION);
        }
    }

    fn set_first(&mut self, tag: u16, value: Value) {
        if let Some(entry) = self.main.entry_mut(tag) {
            entry.set_value(0, value);
        }
    }

    fn swap_first(&mut self, main: bool, a: u16, b: u16) {
        let (Some(x), Some(y)) = (
            self.tag_value(a, main).and_then(|e| e.value(0)),
            self.tag_value(b, main).and_then(|e| e.value(0)),
        ) else {
            return;
        };

        if let Some(entry) = self.tag_value_mut(a, main) {
            entry.set_value(0, y);
        }
        if let Some(entry) = self.tag_value_mut(b, main) {
            entry.set_value(0, x);
        }
    }

    /// Serializes the tree as the body of `appx`, the marker it was read from: signature, TIFF
    /// header and both IFDs, with every offset recomputed. The thumbnail is taken from `appx`.
    ///
    /// The tag changes stay in the tree only when `rewrite.modify` is set.
    pub fn write_info(&mut self, appx: &[u8], rewrite: &InfoRewrite) -> Result<Vec<u8>> {
        let mut exif = self.clone();
        exif.apply(rewrite);

        let tiff = appx
            .get(APP_HEADER_LEN + FIRST_IFD_OFFSET..)
            .unwrap_or_default();

        let location = exif.thumbnail.as_mut().and_then(|ifd| {
            if let Some(message) = correct_thumbnail_tags(ifd, tiff) {
                warn!("Warning: Exif Write: {message}");
            }
            thumbnail_location(ifd)
        });
        let source = location.map(|location| ThumbnailSource {
            kind: location.kind,
            bytes: &tiff[location.offset..location.offset + location.length],
            offset_type: location.offset_type,
        });

        let mut writer = IfdWriter {
            order: exif.order,
            op: rewrite.op,
            options: rewrite.options,
            maker_note: exif.maker_note.handler(),
            thumbnail: source,
            placed_thumbnail: None,
        };

        let mut out = SIGNATURE.to_vec();
        out.extend(exif.order.mark());
        out.extend(exif.order.write(exif.version as i64, 2));
        out.extend(exif.order.write(TIFF_HEADER_LEN as i64, 4));

        let main = writer.write_ifd(&exif.main, TIFF_HEADER_LEN, exif.thumbnail.is_none())?;
        let thumbnail_slot = TIFF_HEADER_LEN + main.len();
        out.extend(main);
        if let Some(ifd) = &exif.thumbnail {
            out.extend(writer.write_ifd(ifd, thumbnail_slot, true)?);
        }

        if let (Some((offset, length)), Some(location), Some(ifd)) =
            (writer.placed_thumbnail, location, exif.thumbnail.as_mut())
        {
            set_thumbnail_tags(ifd, location.kind, offset, length);
        }

        if rewrite.modify {
            *self = exif;
        }
        Ok(out)
    }
}

fn describe_ifd(f: &mut fmt::Formatter<'_>, ifd: &Ifd, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for (tag, entry) in ifd.entries() {
        writeln!(f, "{indent}0x{tag:04x} {:?}: {entry}", entry.entry_type())?;
    }
    for child in ifd.children() {
        writeln!(f, "{indent}0x{:04x} sub-IFD ({} entries)", child.tag(), child.len())?;
        describe_ifd(f, child, depth + 1)?;
    }
    Ok(())
}

impl fmt::Display for Exif {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Exif {:?}, make {}, model {}", self.order, self.make(), self.model())?;
        writeln!(f, "IFD0 ({} entries)", self.main.len())?;
        describe_ifd(f, &self.main, 1)?;
        if let Some(ifd) = &self.thumbnail {
            writeln!(f, "IFD1 ({} entries)", ifd.len())?;
            describe_ifd(f, ifd, 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::entry::Rational;
    use crate::exif::thumbnail::ThumbnailKind;
    use crate::test_support::{exif_marker, ExifFixture};
    use crate::transform::Transform;

    #[test]
    fn test_default_marker_parses() -> Result<()> {
        let exif = Exif::parse(&Exif::marker_data())?;

        assert_eq!(exif.byte_order(), ByteOrder::Intel);
        assert_eq!(exif.make(), "FAKE");
        assert_eq!(exif.model(), NA);
        assert_eq!(exif.main_ifd().len(), 1);
        assert!(exif.thumbnail_ifd().is_none());

        Ok(())
    }

    #[test]
    fn test_default_marker_writes_back_identically() -> Result<()> {
        let appx = Exif::marker_data();
        let mut exif = Exif::parse(&appx)?;

        // the default marker carries one byte of padding past the string
        let body = exif.write_info(&appx, &InfoRewrite::from(Transform::None, Options::NONE, true))?;
        assert_eq!(body, appx[4..41]);

        Ok(())
    }

    #[test]
    fn test_round_trip_both_byte_orders() -> Result<()> {
        for order in [ByteOrder::Intel, ByteOrder::Motorola] {
            let fixture = ExifFixture {
                order,
                orientation: 6,
                ..ExifFixture::default()
            };
            let appx = exif_marker(&fixture)?;
            let mut exif = Exif::parse(&appx)?;

            assert_eq!(exif.byte_order(), order);
            assert_eq!(exif.make(), "Canon");
            assert_eq!(exif.orientation(), Some(Orientation::RightTop));
            assert_eq!(exif.thumbnail_length(), fixture.thumbnail.len());
            assert!(exif.main_ifd().child(tags::EXIFOFFSET).is_some());

            let body = exif.write_info(&appx, &InfoRewrite::from(Transform::None, Options::NONE, false))?;
            let mut rewritten = vec![0xFF, 0xE1];
            rewritten.extend(((body.len() + 2) as u16).to_be_bytes());
            rewritten.extend(body);

            let reparsed = Exif::parse(&rewritten)?;
            assert_eq!(reparsed.main_ifd(), exif.main_ifd());
            let offset = reparsed.thumbnail_offset().unwrap() + 4;
            assert_eq!(
                &rewritten[offset..offset + reparsed.thumbnail_length()],
                fixture.thumbnail.as_slice()
            );
        }

        Ok(())
    }

    #[test]
    fn test_quarter_turn_swaps_dimensions_and_resolution() -> Result<()> {
        let fixture = ExifFixture {
            orientation: 6,
            ..ExifFixture::default()
        };
        let appx = exif_marker(&fixture)?;
        let mut exif = Exif::parse(&appx)?;

        let options = Options::XFORM_APPX | Options::XFORM_ORIENTATION;
        exif.write_info(&appx, &InfoRewrite::from(Transform::Rot90, options, true))?;

        assert_eq!(exif.orientation(), Some(Orientation::TopLeft));
        assert_eq!(exif.tag_value(tags::EXIFIMAGEWIDTH, true).and_then(|e| e.integer(0)), Some(16));
        assert_eq!(exif.tag_value(tags::EXIFIMAGELENGTH, true).and_then(|e| e.integer(0)), Some(24));
        assert_eq!(
            exif.tag_value(tags::XRESOLUTION, true).and_then(|e| e.value(0)),
            Some(Value::Rational(Rational::new(300, 1)))
        );
        assert_eq!(
            exif.tag_value(tags::YRESOLUTION, true).and_then(|e| e.value(0)),
            Some(Value::Rational(Rational::new(72, 1)))
        );

        Ok(())
    }

    #[test]
    fn test_actual_dimensions_win_and_unmodified_tree_is_kept() -> Result<()> {
        let appx = exif_marker(&ExifFixture::default())?;
        let mut exif = Exif::parse(&appx)?;
        let before = exif.clone();

        let mut request = InfoRewrite::from(Transform::Rot270, Options::XFORM_APPX, false);
        request.width = 40;
        request.height = 32;
        let body = exif.write_info(&appx, &request)?;
        assert_eq!(exif, before);

        let mut rewritten = appx[..4].to_vec();
        rewritten.extend(body);
        let written = Exif::parse(&rewritten)?;
        assert_eq!(written.tag_value(tags::EXIFIMAGEWIDTH, true).and_then(|e| e.integer(0)), Some(40));
        assert_eq!(written.tag_value(tags::EXIFIMAGELENGTH, true).and_then(|e| e.integer(0)), Some(32));

        Ok(())
    }

    #[test]
    fn test_canon_maker_note_is_relocated() -> Result<()> {
        let fixture = ExifFixture {
            order: ByteOrder::Motorola,
            maker_note_ifd: true,
            ..ExifFixture::default()
        };
        let appx = exif_marker(&fixture)?;
        let mut exif = Exif::parse(&appx)?;
        assert_eq!(exif.maker_note_kind(), MakerNoteKind::Ifd);

        exif.set_tag_value(tags::SOFTWARE, Entry::text("a much longer software name"), true);
        let body = exif.write_info(&appx, &InfoRewrite::from(Transform::None, Options::NONE, true))?;
        let mut rewritten = appx[..4].to_vec();
        rewritten.extend(body);

        let reparsed = Exif::parse(&rewritten)?;
        let note = reparsed
            .main_ifd()
            .child(tags::EXIFOFFSET)
            .and_then(|exif_ifd| exif_ifd.child(tags::MAKERNOTE))
            .unwrap();
        assert_eq!(note.entry(0x0001).and_then(|e| e.integer(2)), Some(3));
        assert_eq!(note.entry(0x0006).map(|e| e.to_string()), Some("Canon EOS".to_string()));

        Ok(())
    }

    #[test]
    fn test_thumbnail_kind() -> Result<()> {
        let exif = Exif::parse(&exif_marker(&ExifFixture::default())?)?;
        assert_eq!(exif.thumbnail_location().map(|l| l.kind), Some(ThumbnailKind::Jpeg));
        Ok(())
    }
}
