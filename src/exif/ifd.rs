use crate::error::malformed;
use crate::exif::entry::{Entry, EntryType, Rational, Value};
use crate::exif::maker_note::{maker_note_kind, MakerNoteHandler, MakerNoteKind};
use crate::exif::tags;
use crate::exif::thumbnail::{ThumbnailKind, THUMBNAIL_TAGS};
use crate::exif::THUMBNAIL_IFD;
use crate::transform::{Options, Transform};
use anyhow::Result;
use log::warn;
use std::collections::BTreeMap;

pub(crate) const DIR_ENTRY_SIZE: usize = 12;

/// Nesting limit for sub-IFDs; deeper pointers are treated as corrupt.
const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// "II", little-endian.
    Intel,
    /// "MM", big-endian.
    Motorola,
}

impl ByteOrder {
    pub(crate) fn from(mark: &[u8]) -> Option<Self> {
        match mark {
            [b'I', b'I', ..] => Some(ByteOrder::Intel),
            [b'M', b'M', ..] => Some(ByteOrder::Motorola),
            _ => None,
        }
    }

    pub(crate) fn mark(&self) -> [u8; 2] {
        match self {
            ByteOrder::Intel => *b"II",
            ByteOrder::Motorola => *b"MM",
        }
    }

    /// Reads a 1, 2 or 4 byte integer.
    pub(crate) fn read(&self, bytes: &[u8], signed: bool) -> i64 {
        let mut value: u64 = 0;
        match self {
            ByteOrder::Intel => {
                for &b in bytes.iter().rev() {
                    value = (value << 8) | b as u64;
                }
            }
            ByteOrder::Motorola => {
                for &b in bytes {
                    value = (value << 8) | b as u64;
                }
            }
        }

        let bits = bytes.len() as u32 * 8;
        if signed && bits > 0 && bits < 64 && value & (1 << (bits - 1)) != 0 {
            value as i64 - (1i64 << bits)
        } else {
            value as i64
        }
    }

    pub(crate) fn write(&self, value: i64, len: usize) -> Vec<u8> {
        let mut bytes: Vec<u8> = (0..len).map(|i| (value >> (8 * i)) as u8).collect();
        if let ByteOrder::Motorola = self {
            bytes.reverse();
        }
        bytes
    }
}

/// A TIFF image file directory: tagged entries plus the sub-IFDs hanging off it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ifd {
    tag: u16,
    entry_type: EntryType,
    entries: BTreeMap<u16, Entry>,
    children: Vec<Ifd>,
}

impl Ifd {
    pub fn new(tag: u16, entry_type: EntryType) -> Self {
        Ifd {
            tag,
            entry_type,
            entries: BTreeMap::new(),
            children: vec![],
        }
    }

    /// The tag of the entry pointing at this directory; 0 and 1 for the main and thumbnail IFDs.
    pub fn tag(&self) -> u16 {
        self.tag
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn entries(&self) -> &BTreeMap<u16, Entry> {
        &self.entries
    }

    pub fn children(&self) -> &[Ifd] {
        &self.children
    }

    pub fn add_entry(&mut self, tag: u16, entry: Entry) -> Option<Entry> {
        self.entries.insert(tag, entry)
    }

    pub fn remove_entry(&mut self, tag: u16) -> Option<Entry> {
        self.entries.remove(&tag)
    }

    pub fn add_child(&mut self, ifd: Ifd) {
        self.children.push(ifd);
    }

    pub fn child(&self, tag: u16) -> Option<&Ifd> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn child_mut(&mut self, tag: u16) -> Option<&mut Ifd> {
        self.children.iter_mut().find(|c| c.tag == tag)
    }

    /// Looks `tag` up here first, then depth-first through the sub-IFDs.
    pub fn entry(&self, tag: u16) -> Option<&Entry> {
        self.entries
            .get(&tag)
            .or_else(|| self.children.iter().find_map(|c| c.entry(tag)))
    }

    pub fn entry_mut(&mut self, tag: u16) -> Option<&mut Entry> {
        if self.entries.contains_key(&tag) {
            return self.entries.get_mut(&tag);
        }
        self.children.iter_mut().find_map(|c| c.entry_mut(tag))
    }

    /// Number of directory entries this IFD occupies, sub-IFD pointers included.
    pub fn len(&self) -> usize {
        self.entries.len() + self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The fields of one raw 12-byte directory entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawEntry {
    pub(crate) tag: u16,
    pub(crate) entry_type: EntryType,
    pub(crate) count: usize,
    /// Where the value bytes start, relative to the TIFF header.
    pub(crate) offset: usize,
}

impl RawEntry {
    pub(crate) fn len(&self) -> usize {
        self.count * self.entry_type.size()
    }
}

/// Parses IFDs out of the bytes following a TIFF header start.
pub(crate) struct IfdReader<'a> {
    data: &'a [u8],
    order: ByteOrder,
    make: Option<String>,
    model: Option<String>,
    depth: usize,
    pub(crate) maker_note: MakerNoteKind,
}

impl<'a> IfdReader<'a> {
    pub(crate) fn from(data: &'a [u8], order: ByteOrder) -> Self {
        IfdReader {
            data,
            order,
            make: None,
            model: None,
            depth: 0,
            maker_note: MakerNoteKind::Opaque,
        }
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(malformed(format!(
                "{len} bytes at offset {offset} run past the {} byte Exif data",
                self.data.len()
            )))
    }

    pub(crate) fn int(&self, offset: usize, len: usize, signed: bool) -> Result<i64> {
        Ok(self.order.read(self.bytes(offset, len)?, signed))
    }

    pub(crate) fn read_ifd(
        &mut self,
        offset: usize,
        tag: u16,
        entry_type: EntryType,
    ) -> Result<Ifd> {
        if self.depth >= MAX_DEPTH {
            return Err(malformed(format!(
                "IFD nesting deeper than {MAX_DEPTH} at offset {offset}"
            )));
        }

        let num_entries = self.int(offset, 2, false)? as usize;
        if tag == tags::INTEROPERABILITYOFFSET && num_entries > 5 {
            return Err(malformed(format!(
                "Too many entries ({num_entries}) for tag 0x{tag:x}. Should not be more than 5."
            )));
        }
        self.bytes(offset + 2, num_entries * DIR_ENTRY_SIZE)?;

        let mut ifd = Ifd::new(tag, entry_type);
        self.depth += 1;
        let result = self.read_entries(offset, num_entries, &mut ifd);
        self.depth -= 1;
        result?;

        Ok(ifd)
    }

    fn read_entries(&mut self, offset: usize, num_entries: usize, ifd: &mut Ifd) -> Result<()> {
        for i in 0..num_entries {
            let at = offset + 2 + DIR_ENTRY_SIZE * i;
            let tag = self.int(at, 2, false)? as u16;
            let Some(entry_type) = EntryType::from(self.int(at + 2, 2, false)? as u16) else {
                continue;
            };

            let count = self.int(at + 4, 4, false)? as usize;
            let mut raw = RawEntry {
                tag,
                entry_type,
                count,
                offset: at + 8,
            };
            if raw.len() > 4 {
                raw.offset = self.int(at + 8, 4, false)? as usize;
            }

            if self.bytes(raw.offset, raw.len()).is_err() {
                warn!(
                    "Skipping tag 0x{tag:04x}: {} value bytes at {} lie outside the Exif data",
                    raw.len(),
                    raw.offset
                );
                continue;
            }

            if entry_type == EntryType::Ascii {
                let text = self.text(&raw)?;
                if ifd.tag == crate::exif::MAIN_IFD {
                    match tag {
                        tags::MAKE => self.make = Some(text.clone()),
                        tags::MODEL => self.model = Some(text.clone()),
                        _ => {}
                    }
                }
                ifd.add_entry(tag, Entry::text(text));
                continue;
            }

            if tag == tags::MAKERNOTE {
                self.maker_note = maker_note_kind(
                    self.make.as_deref().unwrap_or(crate::exif::NA),
                    self.model.as_deref().unwrap_or(crate::exif::NA),
                );
                let handler = self.maker_note.handler();
                handler.load(self, ifd, &raw)?;
                continue;
            }

            let values = self.values(&raw)?;
            let pointer = matches!(
                tag,
                tags::EXIFOFFSET | tags::INTEROPERABILITYOFFSET | tags::GPSINFO
            );

            match values.first().and_then(Value::as_integer) {
                Some(target) if pointer && target > 0 => {
                    match self.read_ifd(target as usize, tag, entry_type) {
                        Ok(child) => ifd.add_child(child),
                        Err(e) => warn!("Warning: {e}"),
                    }
                }
                _ => {
                    ifd.add_entry(tag, Entry::values(entry_type, values));
                }
            }
        }

        Ok(())
    }

    /// A zero-terminated string; the terminator is not kept.
    fn text(&self, raw: &RawEntry) -> Result<String> {
        let bytes = self.bytes(raw.offset, raw.count.saturating_sub(1))?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    pub(crate) fn values(&self, raw: &RawEntry) -> Result<Vec<Value>> {
        let size = raw.entry_type.size();
        let signed = raw.entry_type.is_signed();

        (0..raw.count)
            .map(|j| {
                let at = raw.offset + j * size;
                match raw.entry_type {
                    EntryType::Rational | EntryType::SRational => Ok(Value::Rational(Rational::new(
                        self.int(at, 4, signed)?,
                        self.int(at + 4, 4, signed)?,
                    ))),
                    _ => Ok(Value::Integer(self.int(at, size, signed)?)),
                }
            })
            .collect()
    }
}

/// A directory entry ready to be placed: its value bytes go inline when they fit in 4 bytes.
#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub(crate) tag: u16,
    pub(crate) entry_type: EntryType,
    pub(crate) count: usize,
    pub(crate) data: Vec<u8>,
}

/// The embedded thumbnail to place in the thumbnail IFD, as found in the source marker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThumbnailSource<'a> {
    pub(crate) kind: ThumbnailKind,
    pub(crate) bytes: &'a [u8],
    pub(crate) offset_type: EntryType,
}

/// Serializes IFDs, assigning every overflow value and sub-IFD the next free offset.
pub(crate) struct IfdWriter<'a> {
    pub(crate) order: ByteOrder,
    pub(crate) op: Transform,
    pub(crate) options: Options,
    pub(crate) maker_note: &'a dyn MakerNoteHandler,
    pub(crate) thumbnail: Option<ThumbnailSource<'a>>,
    /// Offset and length the thumbnail was written at, relative to the TIFF header.
    pub(crate) placed_thumbnail: Option<(usize, usize)>,
}

impl<'a> IfdWriter<'a> {
    pub(crate) fn encode(&self, entry: &Entry) -> Vec<u8> {
        if let Some(text) = entry.as_text() {
            let mut bytes: Vec<u8> = text
                .chars()
                .map(|c| u8::try_from(c).unwrap_or(b'?'))
                .collect();
            bytes.push(0);
            return bytes;
        }

        let entry_type = entry.entry_type();
        let mut bytes = Vec::with_capacity(entry.count() * entry_type.size());
        for value in entry.as_values() {
            let (numerator, denominator) = match (entry_type, value) {
                (EntryType::Rational | EntryType::SRational, Value::Integer(v)) => (*v, 1),
                (EntryType::Rational | EntryType::SRational, Value::Rational(r)) => {
                    (r.numerator, r.denominator)
                }
                (_, Value::Integer(v)) => {
                    bytes.extend(self.order.write(*v, entry_type.size()));
                    continue;
                }
                (_, Value::Rational(r)) => {
                    bytes.extend(self.order.write(r.numerator, entry_type.size()));
                    continue;
                }
            };
            bytes.extend(self.order.write(numerator, 4));
            bytes.extend(self.order.write(denominator, 4));
        }
        bytes
    }

    fn field(&self, tag: u16, entry: &Entry) -> Field {
        let data = self.encode(entry);
        let count = match entry.as_text() {
            Some(_) => data.len(),
            None => entry.count(),
        };
        Field {
            tag,
            entry_type: entry.entry_type(),
            count,
            data,
        }
    }

    /// Appends the 12-byte entry to `dir`; overflow values land in `data`, which starts at
    /// offset `data_slot`.
    fn place(&self, field: Field, dir: &mut Vec<u8>, data: &mut Vec<u8>, data_slot: usize) {
        dir.extend(self.order.write(field.tag as i64, 2));
        dir.extend(self.order.write(field.entry_type.code() as i64, 2));
        dir.extend(self.order.write(field.count as i64, 4));

        if field.data.len() > 4 {
            dir.extend(self.order.write((data_slot + data.len()) as i64, 4));
            data.extend(field.data);
        } else {
            let mut inline = field.data;
            inline.resize(4, 0);
            dir.extend(inline);
        }
    }

    fn thumbnail_bytes(&self, source: &ThumbnailSource<'_>) -> Vec<u8> {
        let transform = self.options.contains(Options::XFORM_THUMBNAIL)
            && !matches!(self.op, Transform::None | Transform::Crop)
            && source.kind == ThumbnailKind::Jpeg;

        if transform {
            match crate::exif::thumbnail::transform_jpeg(source.bytes, self.op) {
                Ok(bytes) => return bytes,
                Err(e) => {
                    warn!("Warning: Unable to Transform Thumbnail, will write it unchanged: {e}")
                }
            }
        }
        source.bytes.to_vec()
    }

    /// Serializes `ifd` as it will sit at `slot`: the directory, the next-IFD link, then the
    /// overflow values, thumbnail and sub-IFDs.
    pub(crate) fn write_ifd(&mut self, ifd: &Ifd, slot: usize, last: bool) -> Result<Vec<u8>> {
        let thumbnail = match ifd.tag == THUMBNAIL_IFD {
            true => self.thumbnail,
            false => None,
        };

        let mut fields: Vec<Field> = ifd
            .entries
            .iter()
            .filter(|(tag, _)| **tag != tags::MAKERNOTE)
            .filter(|(tag, _)| thumbnail.is_none() || !THUMBNAIL_TAGS.contains(*tag))
            .map(|(&tag, entry)| self.field(tag, entry))
            .collect();

        let children: Vec<&Ifd> = ifd
            .children
            .iter()
            .filter(|c| c.tag != tags::MAKERNOTE)
            .collect();

        let has_note =
            ifd.entries.contains_key(&tags::MAKERNOTE) || ifd.child(tags::MAKERNOTE).is_some();
        let num_entries = fields.len()
            + usize::from(has_note)
            + if thumbnail.is_some() { 2 } else { 0 }
            + children.len();

        let data_slot = slot + 2 + num_entries * DIR_ENTRY_SIZE + 4;
        let mut dir = self.order.write(num_entries as i64, 2);
        let mut data = vec![];

        if has_note {
            let at = fields.partition_point(|f| f.tag < tags::MAKERNOTE);
            let note_slot = data_slot
                + fields[..at]
                    .iter()
                    .filter(|f| f.data.len() > 4)
                    .map(|f| f.data.len())
                    .sum::<usize>();

            let handler = self.maker_note;
            let field = handler
                .save(self, ifd, note_slot)?
                .ok_or(malformed("maker note does not match its handler"))?;
            fields.insert(at, field);
        }

        for field in fields {
            self.place(field, &mut dir, &mut data, data_slot);
        }

        if let Some(source) = thumbnail {
            let bytes = self.thumbnail_bytes(&source);
            let offset = data_slot + data.len();
            let (offset_tag, length_tag) = match source.kind {
                ThumbnailKind::Jpeg => (
                    tags::JPEGINTERCHANGEFORMAT,
                    tags::JPEGINTERCHANGEFORMATLENGTH,
                ),
                ThumbnailKind::Strip => (tags::STRIPOFFSETS, tags::STRIPBYTECOUNTS),
            };

            let offset_field = Field {
                tag: offset_tag,
                entry_type: source.offset_type,
                count: 1,
                data: self.order.write(offset as i64, source.offset_type.size().min(4)),
            };
            let length_field = Field {
                tag: length_tag,
                entry_type: EntryType::Long,
                count: 1,
                data: self.order.write(bytes.len() as i64, 4),
            };
            self.place(offset_field, &mut dir, &mut data, data_slot);
            self.place(length_field, &mut dir, &mut data, data_slot);

            self.placed_thumbnail = Some((offset, bytes.len()));
            data.extend(bytes);
        }

        for child in children {
            let child_slot = data_slot + data.len();
            let bytes = self.write_ifd(child, child_slot, true)?;
            let pointer = Field {
                tag: child.tag,
                entry_type: EntryType::Long,
                count: 1,
                data: self.order.write(child_slot as i64, 4),
            };
            self.place(pointer, &mut dir, &mut data, data_slot);
            data.extend(bytes);
        }

        let next = if last { 0 } else { data_slot + data.len() };
        dir.extend(self.order.write(next as i64, 4));
        dir.extend(data);
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::maker_note::OpaqueNote;

    #[test]
    fn test_sub_ifd_pointer_written_as_long() -> Result<()> {
        let mut main = Ifd::new(0, EntryType::Long);
        main.add_entry(tags::ORIENTATION, Entry::short(6));
        let mut sub = Ifd::new(tags::EXIFOFFSET, EntryType::Short);
        sub.add_entry(tags::EXIFIMAGEWIDTH, Entry::long(24));
        main.add_child(sub);

        let mut writer = IfdWriter {
            order: ByteOrder::Motorola,
            op: Transform::None,
            options: Options::DEFAULTS,
            maker_note: &OpaqueNote,
            thumbnail: None,
            placed_thumbnail: None,
        };
        let mut tiff = vec![0; 8];
        tiff.extend(writer.write_ifd(&main, 8, true)?);

        // second directory entry, after the count and the orientation entry
        let pointer_type = &tiff[8 + 2 + DIR_ENTRY_SIZE + 2..][..2];
        assert_eq!(pointer_type, [0, EntryType::Long.code() as u8]);

        let read = IfdReader::from(&tiff, ByteOrder::Motorola).read_ifd(8, 0, EntryType::Long)?;
        let sub = read.child(tags::EXIFOFFSET).ok_or(malformed("sub-IFD lost"))?;
        assert_eq!(sub.entry_type(), EntryType::Long);
        assert_eq!(sub.entry(tags::EXIFIMAGEWIDTH), Some(&Entry::long(24)));
        assert_eq!(read.entry(tags::ORIENTATION), Some(&Entry::short(6)));

        Ok(())
    }
}
