use crate::coding::CodingProcess;
use crate::coefficient::CoefficientPlane;
use crate::entropy_decoder::McuDecoder;
use crate::error::{invalid_state, malformed, unsupported, LljtError};
use crate::frame_header::FrameHeader;
use crate::huffman_tables::HuffmanTables;
use crate::image_info::{self, ImageInfo};
use crate::marker::{Marker, MarkerType};
use crate::progress::ProgressTracker;
use crate::quantization_table::QuantizationTable;
use crate::scan_header::ScanHeader;
use anyhow::Result;
use log::{debug, info, warn};
use memmap::Mmap;
use std::fs::File;
use std::io::{self, Read};

/// How far a read goes before it stops.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadDepth {
    /// Up to the first table, frame or scan marker: APPn and COM markers only.
    Info,
    /// Up to the start of scan, with every table and the frame header.
    Header,
    /// The whole image, coefficients included.
    All,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadState {
    ScanningMarker,
    ReadingAppx,
    ReadingDct,
    FrameComplete,
    Done,
}

/// Outcome of one budgeted step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    /// The budget ran out with work left.
    Continue,
    /// The requested depth has been reached.
    Stop,
}

/// A file mapped into memory and read front to back.
pub struct MappedSource {
    mmap: Mmap,
    cursor: usize,
}

impl MappedSource {
    pub fn from_file(file: File) -> Result<Self> {
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(MappedSource { mmap, cursor: 0 })
    }

    pub fn from_file_path(file_path: &str) -> Result<Self> {
        let file = File::open(file_path)?;
        MappedSource::from_file(file)
    }
}

impl Read for MappedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let end = (self.cursor + buf.len()).min(self.mmap.len());
        let len = end - self.cursor;
        buf[..len].copy_from_slice(&self.mmap[self.cursor..end]);
        self.cursor = end;
        Ok(len)
    }
}

/// Counts the bytes pulled through it.
#[derive(Debug)]
pub(crate) struct CountingReader<R> {
    inner: R,
    count: usize,
}

impl<R: Read> CountingReader<R> {
    pub(crate) fn from(inner: R) -> Self {
        CountingReader { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n;
        Ok(n)
    }
}

/// Everything read from the stream.
#[derive(Debug, Default)]
pub struct JpegData {
    pub(crate) frame: Option<FrameHeader>,
    pub(crate) scan: Option<ScanHeader>,
    pub(crate) quant_tables: [Option<QuantizationTable>; 4],
    pub(crate) huffman_tables: HuffmanTables,
    pub(crate) restart_interval: u16,
    /// Complete APPn markers, code and length included.
    pub(crate) appxs: Vec<Vec<u8>>,
    /// The marker in `appxs` that `image_info` was parsed from.
    pub(crate) app_hdr_index: Option<usize>,
    pub(crate) image_info: Option<Box<dyn ImageInfo>>,
    pub(crate) comment: Option<String>,
    pub(crate) plane: Option<CoefficientPlane>,
    pub(crate) can_be_processed: bool,
}

impl JpegData {
    pub(crate) fn new() -> Self {
        JpegData {
            can_be_processed: true,
            ..JpegData::default()
        }
    }

    /// The coefficients, as long as they can still be transformed and written.
    pub(crate) fn live_plane(&self) -> Result<&CoefficientPlane> {
        if !self.can_be_processed {
            return Err(invalid_state("the image uses an unsupported coding process"));
        }
        match self.plane.as_ref() {
            Some(plane) if !plane.is_released() => Ok(plane),
            _ => Err(LljtError::Released.into()),
        }
    }
}

/// An APPn marker read piecewise across steps.
#[derive(Debug)]
struct PartialSegment {
    bytes: Vec<u8>,
    length: usize,
}

/// Resumable reader: each step consumes roughly a byte budget of markers or MCUs, then hands
/// control back.
#[derive(Debug)]
pub(crate) struct MarkerReader {
    state: ReadState,
    depth: ReadDepth,
    keep_appxs: bool,
    started: bool,
    pending_marker: Option<u8>,
    pending_error: Option<String>,
    error_message: Option<String>,
    segment: Option<PartialSegment>,
    decoder: Option<McuDecoder>,
}

fn read_byte<R: Read + ?Sized>(src: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    src.read_exact(&mut byte)
        .map_err(|e| malformed(format!("Unexpected End Of Input: {e}")))?;
    Ok(byte[0])
}

/// Reads a complete segment after its marker code: length field, then payload.
fn read_payload<R: Read + ?Sized>(src: &mut R, code: u8) -> Result<Vec<u8>> {
    let mut length = [0u8; 2];
    src.read_exact(&mut length)
        .map_err(|e| malformed(format!("Unexpected End Of Input: {e}")))?;
    let len = (u16::from_be_bytes(length) as usize)
        .checked_sub(2)
        .ok_or(malformed(format!("marker 0x{code:02x} has a length below 2")))?;

    let mut payload = vec![0u8; len];
    src.read_exact(&mut payload)
        .map_err(|e| malformed(format!("Unexpected End Of Input in marker 0x{code:02x}: {e}")))?;
    Ok(payload)
}

impl MarkerReader {
    pub(crate) fn new() -> Self {
        MarkerReader {
            state: ReadState::ScanningMarker,
            depth: ReadDepth::Info,
            keep_appxs: false,
            started: false,
            pending_marker: None,
            pending_error: None,
            error_message: None,
            segment: None,
            decoder: None,
        }
    }

    pub(crate) fn state(&self) -> ReadState {
        self.state
    }

    pub(crate) fn pending_marker(&self) -> Option<u8> {
        self.pending_marker
    }

    pub(crate) fn take_pending_marker(&mut self) -> Option<u8> {
        self.pending_marker.take()
    }

    pub(crate) fn pending_error(&self) -> Option<&str> {
        self.pending_error.as_deref()
    }

    pub(crate) fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Sets up a read to `depth`. A reader that stopped at a shallower depth resumes from its
    /// pending marker.
    pub(crate) fn init(&mut self, depth: ReadDepth, keep_appxs: bool) {
        self.keep_appxs = keep_appxs;
        if depth > self.depth && self.state == ReadState::Done && self.pending_marker.is_some() {
            self.state = ReadState::ScanningMarker;
        }
        self.depth = self.depth.max(depth);
    }

    /// Processes markers and MCUs until about `budget` bytes have been consumed or the depth is
    /// reached. A failure is kept and replayed by every later step.
    pub(crate) fn step<R: Read + ?Sized>(
        &mut self,
        src: &mut CountingReader<&mut R>,
        data: &mut JpegData,
        budget: usize,
        progress: Option<&mut ProgressTracker>,
    ) -> Result<Step> {
        if let Some(message) = &self.pending_error {
            return Err(LljtError::Deferred(message.clone()).into());
        }

        match self.run(src, data, budget, progress) {
            Ok(step) => Ok(step),
            Err(e) => {
                let message = e.to_string();
                self.error_message = Some(message.clone());
                self.pending_error = Some(message);
                Err(e)
            }
        }
    }

    fn run<R: Read + ?Sized>(
        &mut self,
        src: &mut CountingReader<&mut R>,
        data: &mut JpegData,
        budget: usize,
        mut progress: Option<&mut ProgressTracker>,
    ) -> Result<Step> {
        let start = src.count();

        loop {
            if self.state == ReadState::Done {
                return Ok(Step::Stop);
            }
            if src.count() - start >= budget {
                return Ok(Step::Continue);
            }

            match self.state {
                ReadState::ScanningMarker => {
                    let code = match self.pending_marker.take() {
                        Some(code) => code,
                        None => self.next_marker(src)?,
                    };
                    self.handle_marker(src, data, code)?;
                }
                ReadState::ReadingAppx => {
                    let left = budget.saturating_sub(src.count() - start).max(1);
                    self.continue_appx(src, data, left)?;
                }
                ReadState::ReadingDct => {
                    let (frame, decoder, plane) = match (&data.frame, &mut self.decoder, &mut data.plane) {
                        (Some(frame), Some(decoder), Some(plane)) => (frame, decoder, plane),
                        _ => return Err(malformed("scan data without a frame")),
                    };

                    let mut pending = None;
                    while !decoder.is_done() && src.count() - start < budget {
                        let mcu = decoder.decode_mcu(src, &data.huffman_tables, &mut pending)?;
                        plane.push_mcu(mcu);
                        if let Some(progress) = progress.as_deref_mut() {
                            progress.advance(decoder.decoded(), decoder.total());
                        }
                    }

                    if decoder.is_done() {
                        debug!(
                            "decoded {} MCUs of a {}x{} frame, {} restarts",
                            decoder.decoded(),
                            frame.image_width,
                            frame.image_height,
                            decoder.restarts_seen()
                        );
                        self.pending_marker = pending;
                        self.decoder = None;
                        self.state = ReadState::FrameComplete;
                    }
                }
                ReadState::FrameComplete => {
                    let code = match self.pending_marker.take() {
                        Some(code) => Some(code),
                        None => self.next_marker(src).ok(),
                    };
                    match code {
                        Some(code) if code == Marker::EOI as u8 => {}
                        Some(code) => warn!(
                            "Found Bytes 0xff{code:02x} instead of EOI, Ignoring remaining input"
                        ),
                        None => warn!("Missing EOI marker"),
                    }
                    self.state = ReadState::Done;
                }
                ReadState::Done => {}
            }
        }
    }

    /// Reads a marker prefix and code, skipping 0xFF fill.
    fn next_marker<R: Read + ?Sized>(&mut self, src: &mut CountingReader<&mut R>) -> Result<u8> {
        let first = read_byte(src)?;
        if first != Marker::GLOBAL as u8 {
            if !self.started {
                let mut signature = vec![first];
                signature.extend((0..3).map_while(|_| read_byte(src).ok()));
                return match signature.as_slice() {
                    b"II*\0" | b"MM\0*" => Err(unsupported("Not a Jpeg File (TIFF)")),
                    _ => Err(unsupported("Not a Jpeg File")),
                };
            }
            return Err(malformed(format!(
                "Invalid Marker found: 0x{first:02x} where a marker was expected"
            )));
        }
        self.started = true;

        loop {
            let code = read_byte(src)?;
            if code != Marker::GLOBAL as u8 {
                return Ok(code);
            }
        }
    }

    fn stop_at(&mut self, code: u8, depth: ReadDepth) -> bool {
        if self.depth <= depth {
            self.pending_marker = Some(code);
            self.state = ReadState::Done;
            return true;
        }
        false
    }

    fn handle_marker<R: Read + ?Sized>(
        &mut self,
        src: &mut CountingReader<&mut R>,
        data: &mut JpegData,
        code: u8,
    ) -> Result<()> {
        let marker = match Marker::from(code) {
            Some(marker) => marker,
            None => {
                warn!("Unsupported marker 0xff{code:02x}, skipping it");
                read_payload(src, code)?;
                return Ok(());
            }
        };

        match marker {
            Marker::SOI | Marker::GLOBAL => {}
            _ if Marker::is_app(code) => {
                let mut length = [0u8; 2];
                src.read_exact(&mut length)
                    .map_err(|e| malformed(format!("Unexpected End Of Input: {e}")))?;
                let total = u16::from_be_bytes(length) as usize + Marker::SIZE;
                if total < 4 {
                    return Err(malformed(format!("APP marker 0x{code:02x} has a length below 2")));
                }

                let mut bytes = Vec::with_capacity(total);
                bytes.extend_from_slice(&[Marker::GLOBAL as u8, code]);
                bytes.extend_from_slice(&length);
                self.segment = Some(PartialSegment {
                    bytes,
                    length: total,
                });
                self.state = ReadState::ReadingAppx;
            }
            Marker::COM => {
                let payload = read_payload(src, code)?;
                let text = String::from_utf8_lossy(&payload).into_owned();
                data.comment = Some(match data.comment.take() {
                    Some(comment) => format!("{comment}\n{text}"),
                    None => text,
                });
            }
            Marker::DQT => {
                if self.stop_at(code, ReadDepth::Info) {
                    return Ok(());
                }
                for table in QuantizationTable::parse_segment(&read_payload(src, code)?)? {
                    let id = table.destination_id() as usize;
                    let slot = data
                        .quant_tables
                        .get_mut(id)
                        .ok_or(malformed(format!("quantization table id {id} out of range")))?;
                    *slot = Some(table);
                }
            }
            Marker::DHT => {
                if self.stop_at(code, ReadDepth::Info) {
                    return Ok(());
                }
                data.huffman_tables.parse_segment(&read_payload(src, code)?)?;
            }
            Marker::SOF0 | Marker::SOF1 => {
                if self.stop_at(code, ReadDepth::Info) {
                    return Ok(());
                }
                let payload = read_payload(src, code)?;
                let frame = FrameHeader::parse(CodingProcess::from(marker)?, &payload)?;
                info!(
                    "{}x{} frame, {} components, {}",
                    frame.image_width,
                    frame.image_height,
                    frame.components.len(),
                    frame.process.describe()
                );
                data.frame = Some(frame);
            }
            _ if marker.is_rejected_frame() => {
                if self.stop_at(code, ReadDepth::Info) {
                    return Ok(());
                }
                data.can_be_processed = false;
                return Err(CodingProcess::from(marker).err().unwrap_or_else(|| {
                    unsupported(format!("Unsupported SOF marker 0x{code:02x}"))
                }));
            }
            Marker::DRI => {
                if self.stop_at(code, ReadDepth::Info) {
                    return Ok(());
                }
                let payload = read_payload(src, code)?;
                if payload.len() != 2 {
                    return Err(malformed("Wrong length of DRI marker"));
                }
                data.restart_interval = u16::from_be_bytes([payload[0], payload[1]]);
            }
            Marker::SOS => {
                if self.stop_at(code, ReadDepth::Header) {
                    return Ok(());
                }
                let scan = ScanHeader::parse(&read_payload(src, code)?)?;
                if !scan.is_sequential() {
                    warn!("Image is not sequential, reading on as if it were");
                }

                let frame = data
                    .frame
                    .as_ref()
                    .ok_or(malformed("Start of scan before any frame header"))?;
                self.decoder = Some(McuDecoder::from(frame, &scan, data.restart_interval)?);
                data.plane = Some(CoefficientPlane::new(
                    frame.width_in_mcu(),
                    frame.height_in_mcu(),
                ));
                data.scan = Some(scan);
                self.state = ReadState::ReadingDct;
            }
            Marker::EOI => {
                warn!("EOI before any image data");
                self.state = ReadState::Done;
            }
            _ => match marker.is_segment() {
                MarkerType::Segment => {
                    warn!("Unsupported marker 0xff{code:02x}, skipping it");
                    read_payload(src, code)?;
                }
                MarkerType::StandAlone => debug!("stray marker 0xff{code:02x} ignored"),
            },
        }

        Ok(())
    }

    fn continue_appx<R: Read + ?Sized>(
        &mut self,
        src: &mut CountingReader<&mut R>,
        data: &mut JpegData,
        budget: usize,
    ) -> Result<()> {
        let segment = self
            .segment
            .as_mut()
            .ok_or(malformed("no APP marker in progress"))?;

        let at = segment.bytes.len();
        let take = (segment.length - at).min(budget);
        segment.bytes.resize(at + take, 0);
        src.read_exact(&mut segment.bytes[at..])
            .map_err(|e| malformed(format!("Unexpected End Of Input in APP marker: {e}")))?;

        if segment.bytes.len() < segment.length {
            return Ok(());
        }

        let appx = std::mem::take(&mut segment.bytes);
        self.segment = None;
        self.state = ReadState::ScanningMarker;

        if !self.keep_appxs {
            return Ok(());
        }

        if let Some(info) = image_info::load(&appx)? {
            debug!("{} image info in APP marker {}", info.format(), data.appxs.len());
            data.image_info = Some(info);
            data.app_hdr_index = Some(data.appxs.len());
        }
        data.appxs.push(appx);
        Ok(())
    }
}
