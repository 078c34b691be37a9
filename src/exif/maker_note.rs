//! Maker notes: vendor blocks hung off the EXIF sub-IFD. How one is kept depends on the camera
//! make, chosen by [`maker_note_kind`].

use crate::exif::entry::Entry;
use crate::exif::ifd::{Field, Ifd, IfdReader, IfdWriter, RawEntry};
use crate::exif::tags;
use anyhow::Result;
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MakerNoteKind {
    /// Kept as an opaque byte range and written back verbatim.
    Opaque,
    /// A bare IFD whose offsets are relative to the TIFF header, re-emitted at its new position.
    Ifd,
}

/// Picks the handler for a camera. Canon notes are plain IFDs sharing the TIFF header's offset
/// base; every other maker's notes are left untouched.
pub fn maker_note_kind(make: &str, model: &str) -> MakerNoteKind {
    let kind = match make.trim().to_ascii_lowercase().as_str() {
        "canon" => MakerNoteKind::Ifd,
        _ => MakerNoteKind::Opaque,
    };
    debug!("maker note handler for {make:?} {model:?}: {kind:?}");
    kind
}

impl MakerNoteKind {
    pub(crate) fn handler(&self) -> &'static dyn MakerNoteHandler {
        match self {
            MakerNoteKind::Opaque => &OpaqueNote,
            MakerNoteKind::Ifd => &IfdNote,
        }
    }
}

pub(crate) trait MakerNoteHandler {
    /// Stores the note described by `raw` into `parent`.
    fn load(&self, reader: &mut IfdReader<'_>, parent: &mut Ifd, raw: &RawEntry) -> Result<()>;

    /// Serializes the note held by `parent`, assuming its value bytes land at `slot`.
    fn save(&self, writer: &mut IfdWriter<'_>, parent: &Ifd, slot: usize) -> Result<Option<Field>>;
}

#[derive(Debug)]
pub(crate) struct OpaqueNote;

impl MakerNoteHandler for OpaqueNote {
    fn load(&self, reader: &mut IfdReader<'_>, parent: &mut Ifd, raw: &RawEntry) -> Result<()> {
        let values = reader.values(raw)?;
        parent.add_entry(raw.tag, Entry::values(raw.entry_type, values));
        Ok(())
    }

    fn save(&self, writer: &mut IfdWriter<'_>, parent: &Ifd, _slot: usize) -> Result<Option<Field>> {
        Ok(parent.entries().get(&tags::MAKERNOTE).map(|entry| Field {
            tag: tags::MAKERNOTE,
            entry_type: entry.entry_type(),
            count: entry.count(),
            data: writer.encode(entry),
        }))
    }
}

#[derive(Debug)]
pub(crate) struct IfdNote;

impl MakerNoteHandler for IfdNote {
    fn load(&self, reader: &mut IfdReader<'_>, parent: &mut Ifd, raw: &RawEntry) -> Result<()> {
        match reader.read_ifd(raw.offset, raw.tag, raw.entry_type) {
            Ok(note) => {
                parent.add_child(note);
                Ok(())
            }
            Err(e) => {
                warn!("Warning: maker note is not an IFD, keeping it verbatim: {e}");
                OpaqueNote.load(reader, parent, raw)
            }
        }
    }

    fn save(&self, writer: &mut IfdWriter<'_>, parent: &Ifd, slot: usize) -> Result<Option<Field>> {
        let Some(note) = parent.child(tags::MAKERNOTE) else {
            return Ok(None);
        };

        let data = writer.write_ifd(note, slot, true)?;
        Ok(Some(Field {
            tag: tags::MAKERNOTE,
            entry_type: note.entry_type(),
            count: data.len() / note.entry_type().size(),
            data,
        }))
    }
}
