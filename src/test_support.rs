//! Synthetic frames, EXIF blocks and complete JPEG streams for unit tests.

use crate::coding::CodingProcess;
use crate::coefficient::{Block, CoefficientPlane, Mcu};
use crate::exif::ifd::ByteOrder;
use crate::exif::{tags, SIGNATURE};
use crate::frame_header::FrameHeader;
use crate::huffman_tables::HuffmanTables;
use crate::image_info;
use crate::quantization_table::QuantizationTable;
use crate::reader::{JpegData, Step};
use crate::sample_precision::SamplePrecision;
use crate::scan_header::ScanHeader;
use crate::transform::Options;
use crate::writer::{CountingWriter, MarkerWriter, WriteConfig};
use anyhow::Result;

const ASCII: u16 = 2;
const SHORT: u16 = 3;
const LONG: u16 = 4;
const RATIONAL: u16 = 5;
const UNDEFINED: u16 = 7;

/// Baseline frame with component ids 1..=n; the first component uses table 0, the rest table 1.
pub(crate) fn frame_header(width: usize, height: usize, sampling: &[(u8, u8)]) -> FrameHeader {
    let mut payload = vec![8];
    payload.extend((height as u16).to_be_bytes());
    payload.extend((width as u16).to_be_bytes());
    payload.push(sampling.len() as u8);
    for (i, &(h, v)) in sampling.iter().enumerate() {
        payload.extend([i as u8 + 1, (h << 4) | v, (i > 0) as u8]);
    }
    FrameHeader::parse(CodingProcess::BaselineDCT, &payload).expect("valid frame header")
}

/// A single sequential scan over every component of `frame`, luma on tables 0 and chroma on 1.
pub(crate) fn scan_header(frame: &FrameHeader) -> ScanHeader {
    let mut payload = vec![frame.components.len() as u8];
    for (i, component) in frame.components.iter().enumerate() {
        let id = if i == 0 { 0x00 } else { 0x11 };
        payload.extend([component.component_id, id]);
    }
    payload.extend([0, 63, 0]);
    ScanHeader::parse(&payload).expect("valid scan header")
}

/// Deterministic coefficients for the `i`th MCU of `frame`.
pub(crate) fn sample_mcu(frame: &FrameHeader, i: usize) -> Mcu {
    (0..frame.blocks_per_mcu())
        .map(|b| {
            let seed = (i * 7 + b * 13) as i32;
            let mut block = Block::new(seed % 50 - 25);
            block.push(1, seed % 5 + 1);
            block.push(2, -(seed % 3) - 1);
            if (i + b) % 2 == 0 {
                block.push(9, 3);
            }
            if (i + b) % 3 == 0 {
                block.push(35, -2);
            }
            if (i + b) % 4 == 1 {
                block.push(63, 1);
            }
            block
        })
        .collect()
}

fn quant_tables(count: usize) -> [Option<QuantizationTable>; 4] {
    let mut tables: [Option<QuantizationTable>; 4] = Default::default();
    for (id, slot) in tables.iter_mut().enumerate().take(count.min(2)) {
        let mut elements = [0u16; 64];
        for (k, element) in elements.iter_mut().enumerate() {
            *element = 1 + ((k + id * 3) % 16) as u16;
        }
        *slot = Some(QuantizationTable::from(id as u8, SamplePrecision::EightBit, elements));
    }
    tables
}

#[derive(Debug, Clone)]
pub(crate) struct ExifFixture {
    pub(crate) order: ByteOrder,
    pub(crate) orientation: u16,
    /// Hangs a Canon-style IFD maker note off the EXIF sub-IFD.
    pub(crate) maker_note_ifd: bool,
    pub(crate) thumbnail: Vec<u8>,
}

impl Default for ExifFixture {
    fn default() -> Self {
        let mut thumbnail = vec![0xFF, 0xD8];
        thumbnail.extend((0..140u32).map(|i| (i * 37 % 200) as u8));
        thumbnail.extend([0xFF, 0xD9]);

        ExifFixture {
            order: ByteOrder::Intel,
            orientation: 1,
            maker_note_ifd: false,
            thumbnail,
        }
    }
}

struct Field {
    tag: u16,
    entry_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl Field {
    fn from(tag: u16, entry_type: u16, count: u32, data: Vec<u8>) -> Self {
        Field {
            tag,
            entry_type,
            count,
            data,
        }
    }
}

fn ifd_len(fields: &[Field]) -> usize {
    let overflow: usize = fields.iter().filter(|f| f.data.len() > 4).map(|f| f.data.len()).sum();
    2 + 12 * fields.len() + 4 + overflow
}

/// Lays out a directory at `at` (relative to the TIFF header), with out-of-line values placed
/// right after it in field order.
fn ifd_bytes(order: ByteOrder, at: usize, fields: &[Field], next: usize) -> Vec<u8> {
    let mut out = order.write(fields.len() as i64, 2);
    let mut overflow: Vec<u8> = Vec::new();
    let mut slot = at + 2 + 12 * fields.len() + 4;

    for field in fields {
        out.extend(order.write(field.tag as i64, 2));
        out.extend(order.write(field.entry_type as i64, 2));
        out.extend(order.write(field.count as i64, 4));
        if field.data.len() > 4 {
            out.extend(order.write(slot as i64, 4));
            overflow.extend_from_slice(&field.data);
            slot += field.data.len();
        } else {
            let mut inline = field.data.clone();
            inline.resize(4, 0);
            out.extend(inline);
        }
    }
    out.extend(order.write(next as i64, 4));
    out.extend(overflow);
    out
}

/// A complete APP1 marker: Make, Orientation and resolutions in IFD0, image dimensions 24x16 in
/// the EXIF sub-IFD and the fixture's thumbnail behind IFD1.
pub(crate) fn exif_marker(fixture: &ExifFixture) -> Result<Vec<u8>> {
    let order = fixture.order;
    let short = |v: u16| order.write(v as i64, 2);
    let long = |v: u32| order.write(v as i64, 4);
    let rational = |n: u32, d: u32| [long(n), long(d)].concat();

    let mut ifd0 = vec![
        Field::from(tags::MAKE, ASCII, 6, b"Canon\0".to_vec()),
        Field::from(tags::ORIENTATION, SHORT, 1, short(fixture.orientation)),
        Field::from(tags::XRESOLUTION, RATIONAL, 1, rational(72, 1)),
        Field::from(tags::YRESOLUTION, RATIONAL, 1, rational(300, 1)),
        Field::from(tags::EXIFOFFSET, LONG, 1, long(0)),
    ];
    let ifd0_at = 8;
    let exif_at = ifd0_at + ifd_len(&ifd0);

    let mut exif_fields = vec![];
    if fixture.maker_note_ifd {
        let note_fields = vec![
            Field::from(0x0001, SHORT, 4, [short(1), short(2), short(3), short(4)].concat()),
            Field::from(0x0006, ASCII, 10, b"Canon EOS\0".to_vec()),
        ];
        // the note is the first out-of-line value of a three-entry directory
        let note_at = exif_at + 2 + 12 * 3 + 4;
        let note = ifd_bytes(order, note_at, &note_fields, 0);
        exif_fields.push(Field::from(tags::MAKERNOTE, UNDEFINED, note.len() as u32, note));
    }
    exif_fields.push(Field::from(tags::EXIFIMAGEWIDTH, LONG, 1, long(24)));
    exif_fields.push(Field::from(tags::EXIFIMAGELENGTH, LONG, 1, long(16)));

    let ifd1_at = exif_at + ifd_len(&exif_fields);
    let mut ifd1 = vec![
        Field::from(tags::COMPRESSION, SHORT, 1, short(6)),
        Field::from(tags::JPEGINTERCHANGEFORMAT, LONG, 1, long(0)),
        Field::from(
            tags::JPEGINTERCHANGEFORMATLENGTH,
            LONG,
            1,
            long(fixture.thumbnail.len() as u32),
        ),
    ];
    let thumbnail_at = ifd1_at + ifd_len(&ifd1);
    ifd1[1].data = long(thumbnail_at as u32);
    ifd0[4].data = long(exif_at as u32);

    let mut tiff = match order {
        ByteOrder::Intel => b"II".to_vec(),
        ByteOrder::Motorola => b"MM".to_vec(),
    };
    tiff.extend(short(0x2A));
    tiff.extend(long(ifd0_at as u32));
    tiff.extend(ifd_bytes(order, ifd0_at, &ifd0, ifd1_at));
    tiff.extend(ifd_bytes(order, exif_at, &exif_fields, 0));
    tiff.extend(ifd_bytes(order, ifd1_at, &ifd1, 0));
    tiff.extend(&fixture.thumbnail);
    debug_assert_eq!(tiff.len(), thumbnail_at + fixture.thumbnail.len());

    let length = 2 + SIGNATURE.len() + tiff.len();
    let mut appx = vec![0xFF, 0xE1];
    appx.extend((length as u16).to_be_bytes());
    appx.extend(SIGNATURE);
    appx.extend(tiff);
    Ok(appx)
}

#[derive(Debug, Clone)]
pub(crate) struct JpegFixture {
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) sampling: Vec<(u8, u8)>,
    pub(crate) comment: Option<String>,
    pub(crate) restart_interval: u16,
    pub(crate) exif: Option<ExifFixture>,
}

impl Default for JpegFixture {
    fn default() -> Self {
        JpegFixture {
            width: 32,
            height: 32,
            sampling: vec![(2, 2), (1, 1), (1, 1)],
            comment: None,
            restart_interval: 0,
            exif: Some(ExifFixture::default()),
        }
    }
}

/// Encodes a baseline JPEG with the standard Huffman tables: SOI, the EXIF APP1 when present,
/// COM, DQT, DHT, SOF0, DRI, SOS, the entropy-coded data and EOI.
pub(crate) fn encode_jpeg(fixture: &JpegFixture) -> Result<Vec<u8>> {
    let frame = frame_header(fixture.width, fixture.height, &fixture.sampling);
    let scan = scan_header(&frame);
    let (width_in_mcu, height_in_mcu) = (frame.width_in_mcu(), frame.height_in_mcu());
    let rows = (0..height_in_mcu)
        .map(|iy| {
            (0..width_in_mcu)
                .map(|ix| sample_mcu(&frame, iy * width_in_mcu + ix))
                .collect()
        })
        .collect();

    let mut data = JpegData::new();
    data.quant_tables = quant_tables(frame.components.len());
    data.huffman_tables = HuffmanTables::standard()?;
    data.restart_interval = fixture.restart_interval;
    data.comment = fixture.comment.clone();
    if let Some(exif) = &fixture.exif {
        let appx = exif_marker(exif)?;
        data.image_info = image_info::load(&appx)?;
        data.app_hdr_index = Some(0);
        data.appxs.push(appx);
    }
    data.plane = Some(CoefficientPlane::from_rows(width_in_mcu, rows));
    data.frame = Some(frame);
    data.scan = Some(scan);

    let config = WriteConfig::from(Options::DEFAULTS);
    let mut writer = MarkerWriter::from(&mut data, &config, true)?;
    let mut out = vec![];
    let mut counting = CountingWriter::from(&mut out);
    while writer.step(&mut counting, &mut data, usize::MAX, None)? == Step::Continue {}

    Ok(out)
}
