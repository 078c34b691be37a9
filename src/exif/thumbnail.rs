use crate::exif::entry::{Entry, EntryType};
use crate::exif::ifd::Ifd;
use crate::exif::tags;
use crate::jpeg::LosslessJpeg;
use crate::marker::Marker;
use crate::reader::ReadDepth;
use crate::transform::{Options, Transform};
use anyhow::Result;

/// Thumbnails this short cannot be a valid JPEG and are dropped.
pub const MIN_JPEG_SIZE: usize = 100;

/// Offset and length tags locating the thumbnail. They are written together, right before the
/// thumbnail bytes.
pub(crate) const THUMBNAIL_TAGS: [u16; 4] = [
    tags::STRIPOFFSETS,
    tags::STRIPBYTECOUNTS,
    tags::JPEGINTERCHANGEFORMAT,
    tags::JPEGINTERCHANGEFORMATLENGTH,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailKind {
    /// An embedded JPEG stream.
    Jpeg,
    /// Uncompressed strip data.
    Strip,
}

/// Where the thumbnail sits, relative to the TIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailLocation {
    pub kind: ThumbnailKind,
    pub offset: usize,
    pub length: usize,
    pub(crate) offset_type: EntryType,
}

fn first_integer(ifd: &Ifd, tag: u16) -> Option<(i64, EntryType)> {
    ifd.entry(tag)
        .map(|e| (e.integer(0).unwrap_or(0), e.entry_type()))
}

/// Reads the thumbnail tags of the thumbnail IFD, JPEG tags taking precedence over strip tags.
pub fn thumbnail_location(ifd: &Ifd) -> Option<ThumbnailLocation> {
    let offset = first_integer(ifd, tags::JPEGINTERCHANGEFORMAT);
    let length = first_integer(ifd, tags::JPEGINTERCHANGEFORMATLENGTH);
    let kind = match offset.is_some() || length.is_some() {
        true => ThumbnailKind::Jpeg,
        false => ThumbnailKind::Strip,
    };

    let offset = offset.or_else(|| first_integer(ifd, tags::STRIPOFFSETS));
    let length = length.or_else(|| first_integer(ifd, tags::STRIPBYTECOUNTS));
    if offset.is_none() && length.is_none() {
        return None;
    }

    let (offset, offset_type) = offset.unwrap_or((0, EntryType::Long));
    Some(ThumbnailLocation {
        kind,
        offset: offset.max(0) as usize,
        length: length.map_or(0, |(l, _)| l.max(0) as usize),
        offset_type,
    })
}

pub fn remove_thumbnail_tags(ifd: &mut Ifd) {
    for tag in THUMBNAIL_TAGS {
        ifd.remove_entry(tag);
    }
    ifd.remove_entry(tags::PHOTOMETRICINTERPRETATION);
}

pub(crate) fn set_thumbnail_tags(ifd: &mut Ifd, kind: ThumbnailKind, offset: usize, length: usize) {
    let (offset_tag, length_tag) = match kind {
        ThumbnailKind::Jpeg => (tags::JPEGINTERCHANGEFORMAT, tags::JPEGINTERCHANGEFORMATLENGTH),
        ThumbnailKind::Strip => (tags::STRIPOFFSETS, tags::STRIPBYTECOUNTS),
    };

    for (tag, value) in [(offset_tag, offset), (length_tag, length)] {
        match ifd.entry_mut(tag) {
            Some(entry) => entry.set_integer(0, value as i64),
            None => {
                ifd.add_entry(tag, Entry::long(value as u32));
            }
        }
    }
}

/// Checks the thumbnail tags of `ifd` against `tiff`, the bytes from the TIFF header to the end
/// of the marker. A length running past the marker is cut down, leading bytes before a JPEG
/// SOI are skipped, and a thumbnail left too short or out of range loses its tags.
///
/// Returns a description of what was corrected, if anything was.
pub fn correct_thumbnail_tags(ifd: &mut Ifd, tiff: &[u8]) -> Option<String> {
    let location = thumbnail_location(ifd)?;
    let (mut offset, mut length) = (location.offset, location.length);
    let mut notes = vec![];
    let mut truncated = false;
    let mut skipped = 0;

    let removal = if offset > tiff.len() {
        Some(format!("Removing Thumbnail: Invalid Offset: {offset}"))
    } else {
        if offset + length > tiff.len() {
            let reduced = tiff.len() - offset;
            notes.push(format!(
                "Thumbnail length {length} is beyond Exif header. Reducing it to {reduced}"
            ));
            length = reduced;
            truncated = true;
        }

        if location.kind == ThumbnailKind::Jpeg {
            let soi = [Marker::GLOBAL as u8, Marker::SOI as u8];
            while offset + 1 < tiff.len() && length > 0 && tiff[offset..offset + 2] != soi {
                offset += 1;
                length -= 1;
                skipped += 1;
            }
            if skipped > 0 {
                notes.push(format!(
                    "Skipped {skipped} Garbage bytes at the beginning of Jpeg Thumbnail"
                ));
            }
        }

        match length <= MIN_JPEG_SIZE {
            true => {
                notes.push(format!("Removing Thumbnail: Invalid length: {length}"));
                Some(notes.join("; "))
            }
            false => None,
        }
    };

    match removal {
        Some(message) => {
            remove_thumbnail_tags(ifd);
            Some(message)
        }
        None if truncated || skipped > 0 => {
            set_thumbnail_tags(ifd, location.kind, offset, length);
            Some(notes.join("; "))
        }
        None => None,
    }
}

/// Runs a JPEG thumbnail through its own lossless transform.
pub(crate) fn transform_jpeg(bytes: &[u8], op: Transform) -> Result<Vec<u8>> {
    let mut thumbnail = LosslessJpeg::from_bytes(bytes.to_vec());
    thumbnail.read(ReadDepth::All, false)?;
    thumbnail.transform(op, Options::NONE)?;

    let mut out = Vec::with_capacity(bytes.len());
    thumbnail.save(&mut out, Options::NONE)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::THUMBNAIL_IFD;

    fn thumbnail_ifd(offset: u32, length: u32) -> Ifd {
        let mut ifd = Ifd::new(THUMBNAIL_IFD, EntryType::Long);
        ifd.add_entry(tags::JPEGINTERCHANGEFORMAT, Entry::long(offset));
        ifd.add_entry(tags::JPEGINTERCHANGEFORMATLENGTH, Entry::long(length));
        ifd.add_entry(tags::PHOTOMETRICINTERPRETATION, Entry::short(6));
        ifd
    }

    fn tiff_with_thumbnail(at: usize, garbage: usize, len: usize) -> Vec<u8> {
        let mut tiff = vec![0u8; at + garbage];
        tiff.extend_from_slice(&[0xFF, 0xD8]);
        tiff.resize(at + garbage + len, 0x11);
        tiff
    }

    #[test]
    fn test_valid_thumbnail_untouched() {
        let tiff = tiff_with_thumbnail(40, 0, 200);
        let mut ifd = thumbnail_ifd(40, 200);

        assert_eq!(correct_thumbnail_tags(&mut ifd, &tiff), None);
        let location = thumbnail_location(&ifd).unwrap();
        assert_eq!((location.offset, location.length), (40, 200));
        assert_eq!(location.kind, ThumbnailKind::Jpeg);
    }

    #[test]
    fn test_garbage_skipped_and_length_reduced() {
        let tiff = tiff_with_thumbnail(40, 3, 150);
        let mut ifd = thumbnail_ifd(40, 400);

        let message = correct_thumbnail_tags(&mut ifd, &tiff).unwrap();
        assert_eq!(
            message,
            "Thumbnail length 400 is beyond Exif header. Reducing it to 153; \
             Skipped 3 Garbage bytes at the beginning of Jpeg Thumbnail"
        );

        let location = thumbnail_location(&ifd).unwrap();
        assert_eq!((location.offset, location.length), (43, 150));
    }

    #[test]
    fn test_short_thumbnail_removed() {
        let tiff = tiff_with_thumbnail(40, 0, 200);
        let mut ifd = thumbnail_ifd(40, 80);

        let message = correct_thumbnail_tags(&mut ifd, &tiff).unwrap();
        assert_eq!(message, "Removing Thumbnail: Invalid length: 80");
        assert_eq!(thumbnail_location(&ifd), None);
        assert!(ifd.entry(tags::PHOTOMETRICINTERPRETATION).is_none());
    }

    #[test]
    fn test_offset_outside_marker_removed() {
        let tiff = tiff_with_thumbnail(40, 0, 200);
        let mut ifd = thumbnail_ifd(1000, 200);

        let message = correct_thumbnail_tags(&mut ifd, &tiff).unwrap();
        assert_eq!(message, "Removing Thumbnail: Invalid Offset: 1000");
        assert!(ifd.is_empty());
    }
}
