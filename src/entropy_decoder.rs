use crate::coefficient::{Block, Mcu};
use crate::error::{malformed, unsupported};
use crate::frame_header::FrameHeader;
use crate::huffman_tables::HuffmanTables;
use crate::marker::Marker;
use crate::scan_header::ScanHeader;
use anyhow::Result;
use entropy::{BitReader, HuffmanClass};
use log::{debug, error};
use std::io::Read;

/// How one scan component is coded: its block count per MCU and its table destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanComponent {
    pub(crate) blocks: usize,
    pub(crate) dc_table: u8,
    pub(crate) ac_table: u8,
}

/// Resolves the scan's component selectors against the frame. Only a single interleaved scan
/// holding every component in frame order is supported.
pub(crate) fn scan_plan(frame: &FrameHeader, scan: &ScanHeader) -> Result<Vec<ScanComponent>> {
    if scan.scan_component_selectors.len() != frame.components.len() {
        return Err(unsupported(format!(
            "scan codes {} of {} components; multi-scan images are not supported",
            scan.scan_component_selectors.len(),
            frame.components.len()
        )));
    }

    frame
        .components
        .iter()
        .zip(scan.scan_component_selectors.iter())
        .map(|(component, selector)| {
            if component.component_id != selector.component_id {
                return Err(unsupported(format!(
                    "scan component {} does not follow frame order",
                    selector.component_id
                )));
            }
            Ok(ScanComponent {
                blocks: component.blocks_per_mcu(),
                dc_table: selector.dc_destination_id,
                ac_table: selector.ac_destination_id,
            })
        })
        .collect()
}

/// Huffman-decodes MCUs one at a time, tracking DC predictors and restart intervals.
#[derive(Debug)]
pub(crate) struct McuDecoder {
    reader: BitReader,
    plan: Vec<ScanComponent>,
    last_dc: Vec<i32>,
    restart_interval: u16,
    restarts_to_go: u16,
    next_restart: u8,
    restarts_seen: usize,
    decoded: usize,
    total: usize,
}

impl McuDecoder {
    pub(crate) fn from(
        frame: &FrameHeader,
        scan: &ScanHeader,
        restart_interval: u16,
    ) -> Result<Self> {
        let plan = scan_plan(frame, scan)?;
        Ok(McuDecoder {
            reader: BitReader::new(),
            last_dc: vec![0; plan.len()],
            plan,
            restart_interval,
            restarts_to_go: restart_interval,
            next_restart: 0,
            restarts_seen: 0,
            decoded: 0,
            total: frame.width_in_mcu() * frame.height_in_mcu(),
        })
    }

    pub(crate) fn is_done(&self) -> bool {
        self.decoded >= self.total
    }

    pub(crate) fn decoded(&self) -> usize {
        self.decoded
    }

    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn restarts_seen(&self) -> usize {
        self.restarts_seen
    }

    fn decode_block<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
        tables: &HuffmanTables,
        c: usize,
    ) -> Result<Block> {
        let ScanComponent {
            dc_table, ac_table, ..
        } = self.plan[c];

        let dc_decoder = tables.decoder(HuffmanClass::DC, dc_table)?;
        let category = dc_decoder.decode(&mut self.reader, src)?;
        let diff = self.reader.receive_extend(src, category)?;
        self.last_dc[c] = predict_dc(self.last_dc[c], diff)?;

        let mut block = Block::new(self.last_dc[c]);

        let ac_decoder = tables.decoder(HuffmanClass::AC, ac_table)?;
        let mut k = 1usize;
        while k < 64 {
            let rs = ac_decoder.decode(&mut self.reader, src)?;
            let run = (rs >> 4) as usize;
            let size = rs & 0x0F;

            if size != 0 {
                k += run;
                if k > 63 {
                    error!("Invalid AC index {k}");
                    k = 63;
                }
                let value = self.reader.receive_extend(src, size)?;
                block.push(k as u8, value);
            } else if run != 15 {
                break;
            } else {
                k += 15;
            }
            k += 1;
        }

        Ok(block)
    }

    /// Decodes the next MCU. A marker met where none was expected at the very end of the scan
    /// is handed back through `pending` instead of failing.
    pub(crate) fn decode_mcu<R: Read + ?Sized>(
        &mut self,
        src: &mut R,
        tables: &HuffmanTables,
        pending: &mut Option<u8>,
    ) -> Result<Mcu> {
        let mut mcu = Vec::with_capacity(self.plan.iter().map(|c| c.blocks).sum());
        for c in 0..self.plan.len() {
            for _ in 0..self.plan[c].blocks {
                mcu.push(self.decode_block(src, tables, c)?);
            }
        }

        self.decoded += 1;
        let last = self.is_done();
        self.restarts_to_go = self.restarts_to_go.wrapping_sub(1);

        if self.restart_interval != 0 && self.restarts_to_go == 0 {
            let code = match self.reader.take_marker() {
                Some(code) => code,
                None => read_marker_code(src)?,
            };

            if code == Marker::restart(self.next_restart) {
                self.next_restart = (self.next_restart + 1) & 7;
                self.restarts_seen += 1;
            } else if last {
                debug!("missing restart marker at end of scan, found 0x{code:02x}");
                *pending = Some(code);
            } else {
                return Err(malformed(format!(
                    "Restart markers are messed up: expected 0x{:02x}, found 0x{code:02x} after MCU {}",
                    Marker::restart(self.next_restart),
                    self.decoded
                )));
            }

            self.restarts_to_go = self.restart_interval;
            self.last_dc.iter_mut().for_each(|dc| *dc = 0);
            self.reader.reset();
        } else if let Some(code) = self.reader.marker() {
            if !last {
                return Err(malformed(format!(
                    "Unexpected marker 0x{code:02x} with restart_interval={} and restarts_to_go={} after MCU {}",
                    self.restart_interval, self.restarts_to_go, self.decoded
                )));
            }
            *pending = self.reader.take_marker();
        }

        Ok(mcu)
    }
}

/// Adds a decoded DC difference to the component's predictor.
fn predict_dc(last: i32, diff: i32) -> Result<i32> {
    last.checked_add(diff)
        .ok_or_else(|| malformed(format!("DC predictor {last} overflows adding {diff}")))
}

/// Reads a marker prefix and code straight from the stream, skipping 0xFF fill.
fn read_marker_code<R: Read + ?Sized>(src: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    src.read_exact(&mut byte)?;
    if byte[0] != Marker::GLOBAL as u8 {
        return Err(malformed(format!(
            "0x{:02x} found instead of restart marker prefix 0xff",
            byte[0]
        )));
    }

    loop {
        src.read_exact(&mut byte)?;
        if byte[0] != Marker::GLOBAL as u8 {
            return Ok(byte[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy_encoder::McuEncoder;
    use crate::error::LljtError;
    use crate::test_support::{frame_header, sample_mcu, scan_header};
    use std::io::Cursor;

    fn encode(mcus: &[Mcu], restart_interval: u16, frame: &FrameHeader) -> Result<Vec<u8>> {
        let scan = scan_header(frame);
        let tables = HuffmanTables::standard()?;
        let mut encoder = McuEncoder::emitting(frame, &scan, &tables, restart_interval)?;

        let mut out = vec![];
        for mcu in mcus {
            encoder.encode_mcu(&mut out, mcu)?;
        }
        encoder.finish(&mut out)?;
        out.extend_from_slice(&Marker::EOI.to_bytes());
        Ok(out)
    }

    #[test]
    fn test_restart_markers_cycle() -> Result<()> {
        // five MCUs of 8x8 grayscale in one row
        let frame = frame_header(40, 8, &[(1, 1)]);
        let scan = scan_header(&frame);
        let mcus: Vec<Mcu> = (0..5).map(|i| sample_mcu(&frame, i)).collect();
        let data = encode(&mcus, 2, &frame)?;

        let tables = HuffmanTables::standard()?;
        let mut decoder = McuDecoder::from(&frame, &scan, 2)?;
        let mut src = Cursor::new(&data[..]);
        let mut pending = None;

        let mut decoded = vec![];
        while !decoder.is_done() {
            decoded.push(decoder.decode_mcu(&mut src, &tables, &mut pending)?);
        }

        assert_eq!(decoded, mcus);
        assert_eq!(decoder.restarts_seen(), 2);
        assert_eq!(decoder.next_restart, 2);
        assert_eq!(pending, None);

        Ok(())
    }

    #[test]
    fn test_missing_final_restart_is_forgiven() -> Result<()> {
        let frame = frame_header(32, 8, &[(1, 1)]);
        let scan = scan_header(&frame);
        let mcus: Vec<Mcu> = (0..4).map(|i| sample_mcu(&frame, i)).collect();

        // encoded without restarts, decoded as if every other MCU ended an interval
        let data = encode(&mcus[..2], 0, &frame_header(16, 8, &[(1, 1)]))?;
        let mut stream = data[..data.len() - 2].to_vec();
        stream.extend_from_slice(&[0xFF, 0xD0]);
        stream.extend(encode(&mcus[2..], 0, &frame_header(16, 8, &[(1, 1)]))?);

        let tables = HuffmanTables::standard()?;
        let mut decoder = McuDecoder::from(&frame, &scan, 2)?;
        let mut src = Cursor::new(&stream[..]);
        let mut pending = None;
        while !decoder.is_done() {
            decoder.decode_mcu(&mut src, &tables, &mut pending)?;
        }

        assert_eq!(pending, Some(Marker::EOI as u8));

        Ok(())
    }

    #[test]
    fn test_wrong_restart_marker_is_fatal() -> Result<()> {
        let frame = frame_header(40, 8, &[(1, 1)]);
        let scan = scan_header(&frame);
        let mcus: Vec<Mcu> = (0..5).map(|i| sample_mcu(&frame, i)).collect();
        let mut data = encode(&mcus, 2, &frame)?;

        let rst0 = data
            .windows(2)
            .position(|w| w == [0xFF, 0xD0])
            .ok_or(malformed("no restart marker written"))?;
        data[rst0 + 1] = 0xD3;

        let tables = HuffmanTables::standard()?;
        let mut decoder = McuDecoder::from(&frame, &scan, 2)?;
        let mut src = Cursor::new(&data[..]);
        let mut pending = None;

        decoder.decode_mcu(&mut src, &tables, &mut pending)?;
        let err = decoder.decode_mcu(&mut src, &tables, &mut pending).unwrap_err();
        assert!(err.to_string().contains("Restart markers are messed up"));

        Ok(())
    }

    #[test]
    fn test_scan_plan_requires_single_scan() -> Result<()> {
        let frame = frame_header(16, 16, &[(2, 2), (1, 1), (1, 1)]);
        let plan = scan_plan(&frame, &scan_header(&frame))?;
        assert_eq!(plan.iter().map(|c| c.blocks).collect::<Vec<_>>(), vec![4, 1, 1]);

        let mut partial = scan_header(&frame);
        partial.scan_component_selectors.truncate(1);
        assert!(scan_plan(&frame, &partial).is_err());

        Ok(())
    }

    #[test]
    fn test_dc_prediction_overflow_is_malformed() -> Result<()> {
        assert_eq!(predict_dc(-1024, 2047)?, 1023);
        assert_eq!(predict_dc(0, -2047)?, -2047);

        let err = predict_dc(i32::MAX, 1).unwrap_err();
        assert!(matches!(err.downcast_ref::<LljtError>(), Some(LljtError::Malformed(_))));
        assert!(predict_dc(i32::MIN, -1).is_err());

        Ok(())
    }
}
