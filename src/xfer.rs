//! Copies a JPEG stream while swapping its metadata markers, without touching the image data.

use crate::error::{invalid_argument, malformed, unsupported};
use crate::marker::{segment, Marker};
use anyhow::Result;
use log::warn;
use std::io::{self, Read, Write};

/// What happens to a class of metadata markers (APPn or COM) during a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Xfer {
    /// Drop the stream's markers and write this image's instead.
    Replace,
    /// Copy the stream's markers.
    Retain,
    /// Drop them.
    Remove,
}

/// The metadata an image contributes to a transfer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StoredInfo<'a> {
    pub(crate) appxs: &'a [Vec<u8>],
    pub(crate) comment: Option<&'a str>,
}

fn read_marker<R: Read + ?Sized>(src: &mut R) -> Result<[u8; 2]> {
    let mut id = [0u8; 2];
    src.read_exact(&mut id)
        .map_err(|e| malformed(format!("Unexpected End Of Input: {e}")))?;
    Ok(id)
}

fn copy_segment<R: Read + ?Sized, W: Write + ?Sized>(
    src: &mut R,
    out: &mut W,
    code: u8,
    drop: bool,
) -> Result<()> {
    let mut length = [0u8; 2];
    src.read_exact(&mut length)?;
    let len = (u16::from_be_bytes(length) as usize)
        .checked_sub(2)
        .ok_or(malformed(format!("segment 0x{code:02x} has a length below 2")))?;

    let mut payload = vec![0u8; len];
    src.read_exact(&mut payload)?;

    if !drop {
        out.write_all(&[Marker::GLOBAL as u8, code])?;
        out.write_all(&length)?;
        out.write_all(&payload)?;
    }
    Ok(())
}

/// Copies `src` to `out`, starting with `pending` when the caller already consumed a marker
/// code. The stream's APPn and COM segments are handled per `appxs` and `comments`; every
/// other segment, and everything from SOS to the end, is copied verbatim.
///
/// `internal` is set when `src` has already been read up to its image-info marker, so the
/// stored markers are the stream's own.
pub(crate) fn transfer<R: Read + ?Sized, W: Write + ?Sized>(
    src: &mut R,
    out: &mut W,
    mut pending: Option<u8>,
    stored: StoredInfo<'_>,
    appxs: Xfer,
    comments: Xfer,
    internal: bool,
) -> Result<()> {
    if internal && (appxs == Xfer::Retain || comments == Xfer::Retain) {
        return Err(invalid_argument(
            "Cannot Retain appxs or comments when tranferring from internal stream",
        ));
    }

    out.write_all(&Marker::SOI.to_bytes())?;
    if appxs == Xfer::Replace {
        for appx in stored.appxs {
            out.write_all(appx)?;
        }
    }
    if comments == Xfer::Replace {
        if let Some(comment) = stored.comment.filter(|c| !c.is_empty()) {
            out.write_all(&segment(Marker::COM, comment.as_bytes()))?;
        }
    }

    let drop_appxs = appxs != Xfer::Retain && (appxs == Xfer::Remove || !internal);
    let drop_comments = comments != Xfer::Retain && (comments == Xfer::Remove || !internal);
    let mut frame_markers = 0;

    loop {
        let code = match pending.take() {
            Some(code) => code,
            None => {
                let id = read_marker(src)?;
                if id[0] != Marker::GLOBAL as u8 {
                    return Err(unsupported("Invalid Marker found"));
                }
                id[1]
            }
        };

        match Marker::from(code) {
            Some(Marker::SOI) | Some(Marker::GLOBAL) => {}
            Some(Marker::COM) => copy_segment(src, out, code, drop_comments)?,
            _ if Marker::is_app(code) => copy_segment(src, out, code, drop_appxs)?,
            Some(Marker::DRI) => copy_segment(src, out, code, false)?,
            Some(Marker::DQT) | Some(Marker::DHT) | Some(Marker::SOF0) | Some(Marker::SOF1) => {
                frame_markers += 1;
                copy_segment(src, out, code, false)?;
            }
            Some(marker) if marker.is_rejected_frame() => {
                frame_markers += 1;
                copy_segment(src, out, code, false)?;
            }
            Some(Marker::SOS) => {
                if frame_markers < 3 {
                    return Err(malformed("All Jpeg Markers not Encountered. A likely error"));
                }
                copy_segment(src, out, code, false)?;
                io::copy(src, out)?;
                out.flush()?;
                return Ok(());
            }
            Some(Marker::EOI) => return Err(malformed("Unexpected EOI marker found")),
            _ => {
                warn!("Warning: xfer_info: Unhandled Marker 0x{code:02x}");
                copy_segment(src, out, code, false)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::Exif;
    use crate::test_support::{encode_jpeg, JpegFixture};
    use std::io::Cursor;

    /// Segment codes up to SOS, with the offset of the SOS marker.
    fn walk(jpeg: &[u8]) -> (Vec<u8>, usize) {
        let mut codes = vec![];
        let mut at = 2;
        while at + 4 <= jpeg.len() {
            let code = jpeg[at + 1];
            codes.push(code);
            if code == Marker::SOS as u8 {
                break;
            }
            at += 2 + u16::from_be_bytes([jpeg[at + 2], jpeg[at + 3]]) as usize;
        }
        (codes, at)
    }

    fn markers(jpeg: &[u8]) -> Vec<u8> {
        walk(jpeg).0
    }

    fn scan_start(jpeg: &[u8]) -> usize {
        walk(jpeg).1
    }

    #[test]
    fn test_replace_appxs_and_remove_comments() -> Result<()> {
        let jpeg = encode_jpeg(&JpegFixture {
            comment: Some("hello".to_string()),
            ..JpegFixture::default()
        })?;
        let appx = Exif::marker_data();
        let stored = StoredInfo {
            appxs: std::slice::from_ref(&appx),
            comment: None,
        };

        let mut out = vec![];
        transfer(
            &mut Cursor::new(&jpeg[2..]),
            &mut out,
            None,
            stored,
            Xfer::Replace,
            Xfer::Remove,
            false,
        )?;

        assert_eq!(&out[2..2 + appx.len()], appx.as_slice());
        let codes = markers(&out);
        assert_eq!(codes.iter().filter(|&&c| c == Marker::APP1 as u8).count(), 1);
        assert!(!codes.contains(&(Marker::COM as u8)));

        assert_eq!(&out[scan_start(&out)..], &jpeg[scan_start(&jpeg)..]);

        Ok(())
    }

    #[test]
    fn test_retain_copies_everything() -> Result<()> {
        let jpeg = encode_jpeg(&JpegFixture {
            comment: Some("kept".to_string()),
            ..JpegFixture::default()
        })?;
        let stored = StoredInfo {
            appxs: &[],
            comment: None,
        };

        let mut out = vec![];
        transfer(
            &mut Cursor::new(&jpeg[..]),
            &mut out,
            None,
            stored,
            Xfer::Retain,
            Xfer::Retain,
            false,
        )?;
        assert_eq!(out, jpeg);

        Ok(())
    }

    #[test]
    fn test_internal_retain_rejected() {
        let stored = StoredInfo {
            appxs: &[],
            comment: None,
        };
        let result = transfer(
            &mut Cursor::new(&[][..]),
            &mut vec![],
            None,
            stored,
            Xfer::Retain,
            Xfer::Remove,
            true,
        );
        assert!(result.is_err());
    }
}
