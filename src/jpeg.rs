use crate::coefficient::{CoefficientPlane, Mcu};
use crate::error::{invalid_argument, invalid_state, LljtError};
use crate::exif::Exif;
use crate::frame_header::FrameHeader;
use crate::huffman_tables::HuffmanTables;
use crate::image_info::{self, rewrite_appx, ImageInfo, InfoRewrite};
use crate::marker::Marker;
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::quantization_table::QuantizationTable;
use crate::reader::{CountingReader, JpegData, MappedSource, MarkerReader, ReadDepth, ReadState, Step};
use crate::transform::{self, CropRect, Imperfection, Options, Transform, TransformPlan};
use crate::writer::{CountingWriter, MarkerWriter, WriteConfig, WriteState};
use crate::xfer::{self, StoredInfo, Xfer};
use anyhow::Result;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::io::{Cursor, Read, Write};

const HANDED_OVER: &str = "the input has been handed over already";

/// A JPEG image held as quantized DCT coefficients, transformed and written back without
/// decoding to pixels.
///
/// Reading and writing are resumable: `init_read`/`next_read` and `init_write`/`next_write`
/// process about a byte budget per call. `read` and `save` run them to completion.
pub struct LosslessJpeg {
    source: Option<Box<dyn Read>>,
    reader: MarkerReader,
    data: JpegData,
    writer: Option<MarkerWriter>,
    read_upto: Option<ReadDepth>,
    modified: bool,
    released: bool,
    progress: Option<ProgressTracker>,
    bytes_read: usize,
    bytes_written: usize,
}

impl LosslessJpeg {
    pub fn from_reader(source: impl Read + 'static) -> Self {
        LosslessJpeg {
            source: Some(Box::new(source)),
            reader: MarkerReader::new(),
            data: JpegData::new(),
            writer: None,
            read_upto: None,
            modified: false,
            released: false,
            progress: None,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn from_file_path(file_path: &str) -> Result<Self> {
        Ok(LosslessJpeg::from_reader(MappedSource::from_file_path(file_path)?))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        LosslessJpeg::from_reader(Cursor::new(bytes))
    }

    fn live(&self) -> Result<()> {
        match self.released {
            true => Err(LljtError::Released.into()),
            false => Ok(()),
        }
    }

    /// Reports progress of coefficient reads and writes whenever it moved by more than
    /// `interval` (a fraction of the whole).
    pub fn set_progress(&mut self, callback: Box<dyn ProgressCallback>, interval: f64) {
        self.progress = Some(ProgressTracker::from(callback, interval));
    }

    // Reading

    pub fn init_read(&mut self, depth: ReadDepth, keep_appxs: bool) -> Result<()> {
        self.live()?;
        if self.source.is_none() {
            return Err(invalid_state(HANDED_OVER));
        }
        self.reader.init(depth, keep_appxs);
        if let Some(progress) = self.progress.as_mut() {
            progress.restart();
        }
        Ok(())
    }

    /// Reads about `budget` more bytes.
    pub fn next_read(&mut self, budget: usize) -> Result<Step> {
        self.live()?;
        let source = self
            .source
            .as_mut()
            .ok_or(invalid_state(HANDED_OVER))?;

        let mut src = CountingReader::from(&mut **source);
        let result = self
            .reader
            .step(&mut src, &mut self.data, budget, self.progress.as_mut());
        self.bytes_read += src.count();

        let step = result?;
        if step == Step::Stop {
            let depth = match self.reader.state() {
                ReadState::Done if self.data.plane.is_some() => ReadDepth::All,
                _ if self.data.frame.is_some() => ReadDepth::Header,
                _ => ReadDepth::Info,
            };
            self.read_upto = self.read_upto.max(Some(depth));
        }
        Ok(step)
    }

    /// Reads up to `depth` in one go. Markers met past `depth` stay unread.
    pub fn read(&mut self, depth: ReadDepth, keep_appxs: bool) -> Result<()> {
        self.init_read(depth, keep_appxs)?;
        while self.next_read(usize::MAX)? == Step::Continue {}
        Ok(())
    }

    pub fn read_state(&self) -> ReadState {
        self.reader.state()
    }

    pub fn read_upto(&self) -> Option<ReadDepth> {
        self.read_upto
    }

    // Transforming

    /// How exactly `op` would carry over the partial edges of this image.
    pub fn check_perfect(&self, op: Transform, crop: Option<&CropRect>) -> Result<Imperfection> {
        transform::check_perfect(self.frame()?, op, crop)
    }

    pub fn transform(&mut self, op: Transform, options: Options) -> Result<()> {
        self.transform_with(op, options, None)
    }

    pub fn crop(&mut self, crop: &CropRect, options: Options) -> Result<()> {
        self.transform_with(Transform::Crop, options, Some(crop))
    }

    /// Transforms the coefficients in memory. With `XFORM_APPX` the image-info marker is
    /// rewritten to match.
    pub fn transform_with(
        &mut self,
        op: Transform,
        options: Options,
        crop: Option<&CropRect>,
    ) -> Result<()> {
        self.live()?;
        if self.read_upto != Some(ReadDepth::All) {
            return Err(invalid_state("transform needs the image read with ReadDepth::All"));
        }
        let plane = self.data.live_plane()?;
        let frame = self.frame()?;
        let plan = TransformPlan::from(frame, &self.data.quant_tables, op, options, crop)?;
        let width = plan.mapping.width_in_mcu();
        let rows = (0..plan.mapping.height_in_mcu())
            .into_par_iter()
            .map(|new_iy| {
                (0..width)
                    .map(|new_ix| plan.output_mcu(plane, new_ix, new_iy))
                    .collect::<Result<Vec<Mcu>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let frame_changed = plan.frame != *frame;

        if op != Transform::None && options.contains(Options::XFORM_APPX) {
            self.rewrite_info(&InfoRewrite::from(op, options, true).sized(&plan.frame))?;
        }

        info!(
            "{op} applied: {}x{} image",
            plan.frame.image_width, plan.frame.image_height
        );
        self.data.plane = Some(CoefficientPlane::from_rows(width, rows));
        self.data.frame = Some(plan.frame);
        self.data.quant_tables = plan.quant_tables;
        self.modified |= op != Transform::None || frame_changed;
        Ok(())
    }

    fn rewrite_info(&mut self, rewrite: &InfoRewrite) -> Result<bool> {
        let (Some(index), Some(info)) = (self.data.app_hdr_index, self.data.image_info.as_mut())
        else {
            return Ok(false);
        };
        let appx = self
            .data
            .appxs
            .get(index)
            .ok_or(invalid_state(format!("image info marker {index} is missing")))?;

        let marker = rewrite_appx(appx, info.as_mut(), rewrite)?;
        self.data.appxs[index] = marker;
        Ok(true)
    }

    // Writing

    /// Starts a write. A transform in `config` is applied to the output only.
    pub fn init_write(&mut self, config: &WriteConfig) -> Result<()> {
        self.live()?;
        if self.read_upto != Some(ReadDepth::All) {
            return Err(invalid_state("writing needs the image read with ReadDepth::All"));
        }
        self.writer = Some(MarkerWriter::from(&mut self.data, config, self.modified)?);
        if let Some(progress) = self.progress.as_mut() {
            progress.restart();
        }
        Ok(())
    }

    /// Writes about `budget` more bytes to `out`.
    pub fn next_write<W: Write + ?Sized>(&mut self, out: &mut W, budget: usize) -> Result<Step> {
        self.live()?;
        let writer = self
            .writer
            .as_mut()
            .ok_or(invalid_state("no write in progress"))?;
        if writer.state() == WriteState::Complete {
            return Err(invalid_state("the write has completed"));
        }

        let mut out = CountingWriter::from(out);
        let result = writer.step(&mut out, &mut self.data, budget, self.progress.as_mut());
        self.bytes_written += out.count();
        result
    }

    pub fn write_state(&self) -> Option<WriteState> {
        self.writer.as_ref().map(MarkerWriter::state)
    }

    pub fn save<W: Write + ?Sized>(&mut self, out: &mut W, options: Options) -> Result<()> {
        self.save_with(out, &WriteConfig::from(options))
    }

    pub fn save_with<W: Write + ?Sized>(&mut self, out: &mut W, config: &WriteConfig) -> Result<()> {
        self.init_write(config)?;
        while self.next_write(out, usize::MAX)? == Step::Continue {}
        Ok(())
    }

    /// Copies the rest of the input to `out` with this image's APPn and COM markers, after a
    /// read that stopped at `ReadDepth::Info`. No coefficients are decoded.
    pub fn xfer_info<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        appxs: Xfer,
        comments: Xfer,
    ) -> Result<()> {
        self.live()?;
        if self.read_upto != Some(ReadDepth::Info) {
            return Err(invalid_state("xfer_info needs the image read with ReadDepth::Info"));
        }
        let mut source = self
            .source
            .take()
            .ok_or(invalid_state(HANDED_OVER))?;
        let pending = self.reader.take_pending_marker();

        let mut src = CountingReader::from(&mut *source);
        let mut dst = CountingWriter::from(out);
        let result = xfer::transfer(
            &mut src,
            &mut dst,
            pending,
            self.stored_info(),
            appxs,
            comments,
            true,
        );
        self.bytes_read += src.count();
        self.bytes_written += dst.count();
        result
    }

    /// Copies another JPEG stream from `src` to `out`, swapping in this image's APPn and COM
    /// markers as `appxs` and `comments` say.
    pub fn xfer_info_from<R: Read + ?Sized, W: Write + ?Sized>(
        &self,
        src: &mut R,
        out: &mut W,
        appxs: Xfer,
        comments: Xfer,
    ) -> Result<()> {
        self.live()?;
        xfer::transfer(src, out, None, self.stored_info(), appxs, comments, false)
    }

    fn stored_info(&self) -> StoredInfo<'_> {
        StoredInfo {
            appxs: &self.data.appxs,
            comment: self.data.comment.as_deref(),
        }
    }

    /// Drops the image. Everything but the counters fails with `LljtError::Released` after.
    pub fn free_memory(&mut self) {
        debug!("releasing image memory");
        self.data = JpegData::new();
        self.writer = None;
        self.released = true;
    }

    // APPn markers

    pub fn appx_count(&self) -> Result<usize> {
        self.live()?;
        Ok(self.data.appxs.len())
    }

    /// The complete marker at `index`, code and length included.
    pub fn appx(&self, index: usize) -> Result<&[u8]> {
        self.live()?;
        self.data
            .appxs
            .get(index)
            .map(Vec::as_slice)
            .ok_or(invalid_argument(format!("no APP marker at {index}")))
    }

    pub fn image_info_index(&self) -> Option<usize> {
        self.data.app_hdr_index
    }

    /// Replaces the marker at `index`. With `for_image_info` the marker is parsed as the new
    /// image info.
    pub fn set_appx(&mut self, index: usize, marker: Vec<u8>, for_image_info: bool) -> Result<()> {
        self.live()?;
        validate_appx(&marker)?;
        let slot = self
            .data
            .appxs
            .get_mut(index)
            .ok_or(invalid_argument(format!("no APP marker at {index}")))?;
        *slot = marker;

        if for_image_info {
            let loaded = match image_info::load(&self.data.appxs[index]) {
                Ok(info) => info,
                Err(e) => {
                    error!("Error Parsing ImageInfo: {e}");
                    None
                }
            };
            self.data.app_hdr_index = loaded.as_ref().map(|_| index);
            self.data.image_info = loaded;
        } else if self.data.app_hdr_index == Some(index) {
            self.data.image_info = None;
            self.data.app_hdr_index = None;
        }
        Ok(())
    }

    pub fn insert_appx(&mut self, index: usize, marker: Vec<u8>, for_image_info: bool) -> Result<()> {
        self.live()?;
        validate_appx(&marker)?;
        if index > self.data.appxs.len() {
            return Err(invalid_argument(format!(
                "cannot insert at {index} among {} APP markers",
                self.data.appxs.len()
            )));
        }

        self.data.appxs.insert(index, Vec::new());
        if let Some(hdr) = self.data.app_hdr_index.as_mut() {
            if index <= *hdr {
                *hdr += 1;
            }
        }
        self.set_appx(index, marker, for_image_info)
    }

    pub fn add_appx(&mut self, marker: Vec<u8>, for_image_info: bool) -> Result<()> {
        let index = self.appx_count()?;
        self.insert_appx(index, marker, for_image_info)
    }

    pub fn remove_appx(&mut self, index: usize) -> Result<Vec<u8>> {
        self.live()?;
        if index >= self.data.appxs.len() {
            return Err(invalid_argument(format!("no APP marker at {index}")));
        }

        let removed = self.data.appxs.remove(index);
        match self.data.app_hdr_index {
            Some(hdr) if hdr == index => {
                self.data.app_hdr_index = None;
                self.data.image_info = None;
            }
            Some(hdr) if index < hdr => self.data.app_hdr_index = Some(hdr - 1),
            _ => {}
        }
        Ok(removed)
    }

    /// Regenerates the image-info marker from its tree, after the tree was edited.
    pub fn refresh_appx(&mut self) -> Result<bool> {
        self.live()?;
        self.rewrite_info(&InfoRewrite::from(Transform::None, Options::NONE, true))
    }

    // Comments and thumbnail

    pub fn comment(&self) -> Option<&str> {
        self.data.comment.as_deref()
    }

    /// Sets the text written as the COM marker.
    pub fn set_comment(&mut self, comment: Option<String>) -> Result<()> {
        self.live()?;
        self.data.comment = comment;
        Ok(())
    }

    /// The thumbnail embedded in the image info, if any.
    pub fn thumbnail(&self) -> Result<Option<&[u8]>> {
        self.live()?;
        let (Some(index), Some(info)) = (self.data.app_hdr_index, self.data.image_info.as_ref())
        else {
            return Ok(None);
        };

        let (offset, length) = match (info.thumbnail_offset(), info.thumbnail_length()) {
            (Some(offset), length) if offset > 0 && length > 0 => (offset, length),
            _ => return Ok(None),
        };
        let start = offset + 4;
        match self.data.appxs.get(index).and_then(|appx| appx.get(start..start + length)) {
            Some(bytes) => Ok(Some(bytes)),
            None => {
                warn!("thumbnail at {start}+{length} lies outside its marker");
                Ok(None)
            }
        }
    }

    /// Writes the thumbnail to `out`, returning how many bytes were written.
    pub fn write_thumbnail<W: Write + ?Sized>(&self, out: &mut W) -> Result<usize> {
        match self.thumbnail()? {
            Some(bytes) => {
                out.write_all(bytes)?;
                Ok(bytes.len())
            }
            None => Ok(0),
        }
    }

    // Queries

    pub fn frame(&self) -> Result<&FrameHeader> {
        self.live()?;
        self.data
            .frame
            .as_ref()
            .ok_or(invalid_state("no frame header has been read"))
    }

    pub fn width(&self) -> Result<usize> {
        Ok(self.frame()?.image_width)
    }

    pub fn height(&self) -> Result<usize> {
        Ok(self.frame()?.image_height)
    }

    pub fn width_in_mcu(&self) -> Result<usize> {
        Ok(self.frame()?.width_in_mcu())
    }

    pub fn height_in_mcu(&self) -> Result<usize> {
        Ok(self.frame()?.height_in_mcu())
    }

    pub fn mcu_width(&self) -> Result<usize> {
        Ok(self.frame()?.mcu_width())
    }

    pub fn mcu_height(&self) -> Result<usize> {
        Ok(self.frame()?.mcu_height())
    }

    pub fn component_count(&self) -> Result<usize> {
        Ok(self.frame()?.components.len())
    }

    /// Horizontal and vertical sampling factors of component `index`.
    pub fn sampling(&self, index: usize) -> Result<(u8, u8)> {
        self.frame()?
            .components
            .get(index)
            .map(|c| c.sampling())
            .ok_or(invalid_argument(format!("no component {index}")))
    }

    pub fn max_h(&self) -> Result<usize> {
        Ok(self.frame()?.max_h())
    }

    pub fn max_v(&self) -> Result<usize> {
        Ok(self.frame()?.max_v())
    }

    pub fn restart_interval(&self) -> u16 {
        self.data.restart_interval
    }

    pub fn quant_table(&self, id: usize) -> Option<&QuantizationTable> {
        self.data.quant_tables.get(id).and_then(Option::as_ref)
    }

    pub fn huffman_tables(&self) -> &HuffmanTables {
        &self.data.huffman_tables
    }

    pub fn coefficients(&self) -> Result<&CoefficientPlane> {
        self.live()?;
        self.data.plane.as_ref().ok_or(invalid_state("no coefficients have been read"))
    }

    pub fn image_info(&self) -> Option<&dyn ImageInfo> {
        self.data.image_info.as_deref()
    }

    pub fn exif(&self) -> Option<&Exif> {
        self.data.image_info.as_ref().and_then(|info| info.as_exif())
    }

    /// The Exif tree, for edits that `refresh_appx` then writes back to the marker.
    pub fn exif_mut(&mut self) -> Option<&mut Exif> {
        self.data.image_info.as_mut().and_then(|info| info.as_exif_mut())
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// False once an unsupported frame marker has been met.
    pub fn can_be_processed(&self) -> bool {
        self.data.can_be_processed
    }

    /// The marker read past the requested depth, left for the next read.
    pub fn unprocessed_marker(&self) -> Option<u8> {
        self.reader.pending_marker()
    }

    pub fn pending_error(&self) -> Option<&str> {
        self.reader.pending_error()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.reader.error_message()
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

/// Checks a complete APP1..APP15 marker: prefix, code and length field.
fn validate_appx(marker: &[u8]) -> Result<()> {
    match marker {
        [0xFF, code, hi, lo, ..] if (Marker::APP1 as u8..=Marker::APPF as u8).contains(code) => {
            let length = u16::from_be_bytes([*hi, *lo]) as usize;
            if length + Marker::SIZE != marker.len() {
                return Err(invalid_argument(format!(
                    "APP marker length field {length} does not match its {} bytes",
                    marker.len()
                )));
            }
            Ok(())
        }
        [first, second, ..] => Err(invalid_argument(format!(
            "Incorrect 1st two bytes for App marker: 0x{first:02x}:0x{second:02x}"
        ))),
        _ => Err(invalid_argument("APP marker too short")),
    }
}

impl std::fmt::Debug for LosslessJpeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LosslessJpeg")
            .field("frame", &self.data.frame)
            .field("read_state", &self.reader.state())
            .field("read_upto", &self.read_upto)
            .field("modified", &self.modified)
            .field("released", &self.released)
            .field("bytes_read", &self.bytes_read)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}
