use crate::coefficient::CoefficientPlane;
use crate::entropy_encoder::McuEncoder;
use crate::error::{invalid_argument, invalid_state, malformed, LljtError};
use crate::huffman_tables::HuffmanTables;
use crate::image_info::{rewrite_appx, InfoRewrite};
use crate::marker::{segment, Marker};
use crate::progress::ProgressTracker;
use crate::reader::{JpegData, Step};
use crate::scan_header::ScanHeader;
use crate::transform::{CropRect, Options, Transform, TransformPlan};
use anyhow::Result;
use log::{debug, info};
use std::io::{self, Write};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteState {
    Begin,
    Appxs,
    Comments,
    Quant,
    Huff,
    FrameStart,
    Dct,
    Complete,
}

/// What a write produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConfig {
    /// Applied while writing; the image in memory keeps its orientation.
    pub op: Transform,
    pub options: Options,
    pub crop: Option<CropRect>,
    /// Overrides the restart interval read from the image.
    pub restart_interval: Option<u16>,
    /// Release each source row as soon as it has been written.
    pub pull_down: bool,
}

impl WriteConfig {
    pub fn from(options: Options) -> Self {
        WriteConfig {
            op: Transform::None,
            options,
            crop: None,
            restart_interval: None,
            pull_down: false,
        }
    }
}

/// Counts the bytes pushed through it.
#[derive(Debug)]
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: usize,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn from(inner: W) -> Self {
        CountingWriter { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Resumable writer emitting SOI, APPn, COM, DQT, DHT, SOF, DRI, SOS, the scan and EOI, a
/// byte budget at a time.
#[derive(Debug)]
pub(crate) struct MarkerWriter {
    state: WriteState,
    options: Options,
    pull_down: bool,
    plan: TransformPlan,
    scan: ScanHeader,
    tables: HuffmanTables,
    restart_interval: u16,
    encoder: McuEncoder,
    /// The image-info marker regenerated for a transform applied while writing.
    info_appx: Option<Vec<u8>>,
    next_appx: usize,
    next_mcu: usize,
}

impl MarkerWriter {
    /// Plans the output and picks its Huffman tables. `modified` tells whether the plane has
    /// changed since it was read.
    pub(crate) fn from(data: &mut JpegData, config: &WriteConfig, modified: bool) -> Result<Self> {
        let frame = data
            .frame
            .as_ref()
            .ok_or(invalid_state("the image has to be read fully before writing"))?;
        let read_scan = data
            .scan
            .as_ref()
            .ok_or(invalid_state("the image has to be read fully before writing"))?;
        let plane = data.live_plane()?;
        if config.pull_down && config.op.is_quarter_turn() {
            return Err(invalid_state(format!(
                "pull-down writing cannot apply {}: it needs every row at once",
                config.op
            )));
        }

        let plan = TransformPlan::from(
            frame,
            &data.quant_tables,
            config.op,
            config.options,
            config.crop.as_ref(),
        )?;
        let restart_interval = config.restart_interval.unwrap_or(data.restart_interval);

        let (tables, scan) = if config.options.contains(Options::OPTIMIZE_HUFF) {
            let scan = read_scan.with_standard_destinations();
            let mut gathering = McuEncoder::gathering(&plan.frame, &scan, restart_interval)?;
            let mut sink = io::sink();
            for new_iy in 0..plan.mapping.height_in_mcu() {
                for new_ix in 0..plan.mapping.width_in_mcu() {
                    gathering.encode_mcu(&mut sink, &plan.output_mcu(plane, new_ix, new_iy)?)?;
                }
            }
            debug!("optimized Huffman tables from {} MCUs", plan.total_mcus());
            (HuffmanTables::from_specs(gathering.into_specs()?)?, scan)
        } else if !modified && config.op == Transform::None && !data.huffman_tables.is_empty() {
            (data.huffman_tables.clone(), read_scan.clone())
        } else {
            (HuffmanTables::standard()?, read_scan.with_standard_destinations())
        };

        let info_appx = match (config.op, data.app_hdr_index, data.image_info.as_mut()) {
            (Transform::None, _, _) => None,
            (op, Some(index), Some(info)) if config.options.contains(Options::XFORM_APPX) => {
                let appx = data
                    .appxs
                    .get(index)
                    .ok_or(malformed(format!("image info marker {index} is missing")))?;
                let rewrite = InfoRewrite::from(op, config.options, false).sized(&plan.frame);
                Some(rewrite_appx(appx, info.as_mut(), &rewrite)?)
            }
            _ => None,
        };

        let encoder = McuEncoder::emitting(&plan.frame, &scan, &tables, restart_interval)?;
        Ok(MarkerWriter {
            state: WriteState::Begin,
            options: config.options,
            pull_down: config.pull_down,
            plan,
            scan,
            tables,
            restart_interval,
            encoder,
            info_appx,
            next_appx: 0,
            next_mcu: 0,
        })
    }

    pub(crate) fn state(&self) -> WriteState {
        self.state
    }

    /// Writes until about `budget` bytes have gone out or the image is complete.
    pub(crate) fn step<W: Write + ?Sized>(
        &mut self,
        out: &mut CountingWriter<&mut W>,
        data: &mut JpegData,
        budget: usize,
        mut progress: Option<&mut ProgressTracker>,
    ) -> Result<Step> {
        let start = out.count();

        loop {
            if self.state == WriteState::Complete {
                return Ok(Step::Stop);
            }
            if out.count() - start >= budget {
                return Ok(Step::Continue);
            }

            match self.state {
                WriteState::Begin => {
                    out.write_all(&Marker::SOI.to_bytes())?;
                    self.state = WriteState::Appxs;
                }
                WriteState::Appxs => {
                    if !self.options.contains(Options::WRITE_APPXS)
                        || self.next_appx >= data.appxs.len()
                    {
                        self.state = WriteState::Comments;
                        continue;
                    }

                    let index = self.next_appx;
                    match (&self.info_appx, data.app_hdr_index) {
                        (Some(appx), Some(info)) if info == index => out.write_all(appx)?,
                        _ => out.write_all(&data.appxs[index])?,
                    }
                    self.next_appx += 1;
                }
                WriteState::Comments => {
                    if self.options.contains(Options::WRITE_COMMENTS) {
                        if let Some(comment) = data.comment.as_deref().filter(|c| !c.is_empty()) {
                            if comment.len() > u16::MAX as usize - 2 {
                                return Err(invalid_argument(format!(
                                    "comment of {} bytes does not fit in a marker",
                                    comment.len()
                                )));
                            }
                            out.write_all(&segment(Marker::COM, comment.as_bytes()))?;
                        }
                    }
                    self.state = WriteState::Quant;
                }
                WriteState::Quant => {
                    for table in self.plan.quant_tables.iter().flatten() {
                        out.write_all(&segment(Marker::DQT, &table.to_bytes()))?;
                    }
                    self.state = WriteState::Huff;
                }
                WriteState::Huff => {
                    out.write_all(&segment(Marker::DHT, &self.tables.to_segment_payload()))?;
                    self.state = WriteState::FrameStart;
                }
                WriteState::FrameStart => {
                    let frame = &self.plan.frame;
                    out.write_all(&segment(frame.output_marker(), &frame.to_bytes()))?;
                    if self.restart_interval != 0 {
                        out.write_all(&segment(
                            Marker::DRI,
                            &self.restart_interval.to_be_bytes(),
                        ))?;
                    }
                    out.write_all(&segment(Marker::SOS, &self.scan.to_bytes()))?;
                    info!(
                        "writing {}x{} image, {} applied",
                        frame.image_width, frame.image_height, self.plan.op
                    );
                    self.state = WriteState::Dct;
                }
                WriteState::Dct => {
                    let plane = data.plane.as_mut().ok_or(LljtError::Released)?;
                    let width = self.plan.mapping.width_in_mcu();
                    let total = self.plan.total_mcus();

                    while self.next_mcu < total && out.count() - start < budget {
                        let (new_ix, new_iy) = (self.next_mcu % width, self.next_mcu / width);
                        let mcu = self.plan.output_mcu(plane, new_ix, new_iy)?;
                        self.encoder.encode_mcu(out, &mcu)?;
                        self.next_mcu += 1;

                        if self.pull_down && new_ix + 1 == width {
                            release_rows(plane, &self.plan, new_iy);
                        }
                        if let Some(progress) = progress.as_deref_mut() {
                            progress.advance(self.next_mcu, total);
                        }
                    }

                    if self.next_mcu >= total {
                        self.encoder.finish(out)?;
                        out.write_all(&Marker::EOI.to_bytes())?;
                        out.flush()?;
                        self.state = WriteState::Complete;
                    }
                }
                WriteState::Complete => {}
            }
        }
    }
}

fn release_rows(plane: &mut CoefficientPlane, plan: &TransformPlan, new_iy: usize) {
    for iy in plan.source_rows(new_iy) {
        if plane.take_row(iy).is_some() {
            debug!("released source row {iy}");
        }
    }
}
