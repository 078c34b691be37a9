use crate::coefficient::{Block, Mcu};
use crate::entropy_decoder::{scan_plan, ScanComponent};
use crate::error::malformed;
use crate::frame_header::FrameHeader;
use crate::huffman_tables::HuffmanTables;
use crate::marker::Marker;
use crate::scan_header::ScanHeader;
use anyhow::Result;
use entropy::bitio::magnitude_category;
use entropy::{BitWriter, EncodeTable, FrequencyCounter, HuffmanClass, HuffmanSpec};
use std::collections::BTreeMap;
use std::io::Write;

const EOB: u8 = 0x00;
const ZRL: u8 = 0xF0;

#[derive(Debug)]
enum Sink {
    /// Huffman codes go to the output, one (DC, AC) table pair per scan component.
    Emit(Vec<(EncodeTable, EncodeTable)>),
    /// Symbols are only counted, to derive optimal tables afterwards.
    Gather(BTreeMap<(HuffmanClass, u8), FrequencyCounter>),
}

/// Huffman-encodes MCUs in scan order, inserting restart markers every `restart_interval` MCUs.
#[derive(Debug)]
pub(crate) struct McuEncoder {
    writer: BitWriter,
    plan: Vec<ScanComponent>,
    last_dc: Vec<i32>,
    restart_interval: u16,
    restarts_to_go: u16,
    next_restart: u8,
    sink: Sink,
}

impl McuEncoder {
    fn from(
        frame: &FrameHeader,
        scan: &ScanHeader,
        restart_interval: u16,
        sink: impl FnOnce(&[ScanComponent]) -> Result<Sink>,
    ) -> Result<Self> {
        let plan = scan_plan(frame, scan)?;
        Ok(McuEncoder {
            writer: BitWriter::new(),
            last_dc: vec![0; plan.len()],
            sink: sink(&plan)?,
            plan,
            restart_interval,
            restarts_to_go: restart_interval,
            next_restart: 0,
        })
    }

    pub(crate) fn emitting(
        frame: &FrameHeader,
        scan: &ScanHeader,
        tables: &HuffmanTables,
        restart_interval: u16,
    ) -> Result<Self> {
        McuEncoder::from(frame, scan, restart_interval, |plan| {
            let pairs = plan
                .iter()
                .map(|c| {
                    Ok((
                        tables.encoder(HuffmanClass::DC, c.dc_table)?.clone(),
                        tables.encoder(HuffmanClass::AC, c.ac_table)?.clone(),
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Sink::Emit(pairs))
        })
    }

    /// An encoder that writes nothing and only gathers symbol statistics.
    pub(crate) fn gathering(
        frame: &FrameHeader,
        scan: &ScanHeader,
        restart_interval: u16,
    ) -> Result<Self> {
        McuEncoder::from(frame, scan, restart_interval, |_| {
            Ok(Sink::Gather(BTreeMap::new()))
        })
    }

    fn put<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        c: usize,
        class: HuffmanClass,
        symbol: u8,
    ) -> Result<()> {
        match &mut self.sink {
            Sink::Emit(pairs) => {
                let table = match class {
                    HuffmanClass::DC => &pairs[c].0,
                    HuffmanClass::AC => &pairs[c].1,
                };
                table.put(&mut self.writer, out, symbol)
            }
            Sink::Gather(counters) => {
                let id = match class {
                    HuffmanClass::DC => self.plan[c].dc_table,
                    HuffmanClass::AC => self.plan[c].ac_table,
                };
                counters.entry((class, id)).or_default().count(symbol);
                Ok(())
            }
        }
    }

    fn put_value<W: Write + ?Sized>(&mut self, out: &mut W, value: i32, size: u8) -> Result<()> {
        if let Sink::Emit(_) = self.sink {
            // negative values are sent as value - 1 in `size` bits
            let bits = if value < 0 { value - 1 } else { value };
            self.writer.put_bits(out, bits as u32, size as u32)?;
        }
        Ok(())
    }

    fn encode_block<W: Write + ?Sized>(&mut self, out: &mut W, block: &Block, c: usize) -> Result<()> {
        let diff = block.dc() - self.last_dc[c];
        self.last_dc[c] = block.dc();

        let category = magnitude_category(diff);
        if category > 15 {
            return Err(malformed(format!("DC difference {diff} cannot be coded")));
        }
        self.put(out, c, HuffmanClass::DC, category)?;
        self.put_value(out, diff, category)?;

        let mut previous = 0u8;
        for &(k, value) in block.ac() {
            let mut run = k - previous - 1;
            while run > 15 {
                self.put(out, c, HuffmanClass::AC, ZRL)?;
                run -= 16;
            }

            let size = magnitude_category(value);
            if size > 15 {
                return Err(malformed(format!("AC coefficient {value} cannot be coded")));
            }
            self.put(out, c, HuffmanClass::AC, (run << 4) + size)?;
            self.put_value(out, value, size)?;
            previous = k;
        }

        if previous < 63 {
            self.put(out, c, HuffmanClass::AC, EOB)?;
        }

        Ok(())
    }

    pub(crate) fn encode_mcu<W: Write + ?Sized>(&mut self, out: &mut W, mcu: &Mcu) -> Result<()> {
        let mut blocks = mcu.iter();
        for c in 0..self.plan.len() {
            for _ in 0..self.plan[c].blocks {
                let block = blocks
                    .next()
                    .ok_or(malformed(format!("MCU holds only {} blocks", mcu.len())))?;
                self.encode_block(out, block, c)?;
            }
        }

        if self.restart_interval != 0 {
            self.restarts_to_go -= 1;
            if self.restarts_to_go == 0 {
                if let Sink::Emit(_) = self.sink {
                    self.writer.flush(out)?;
                    out.write_all(&[Marker::GLOBAL as u8, Marker::restart(self.next_restart)])?;
                }
                self.next_restart = (self.next_restart + 1) & 7;
                self.restarts_to_go = self.restart_interval;
                self.last_dc.iter_mut().for_each(|dc| *dc = 0);
            }
        }

        Ok(())
    }

    pub(crate) fn finish<W: Write + ?Sized>(&mut self, out: &mut W) -> Result<()> {
        if let Sink::Emit(_) = self.sink {
            self.writer.flush(out)?;
        }
        Ok(())
    }

    /// Optimal tables built from the gathered statistics, one per (class, destination) used.
    pub(crate) fn into_specs(self) -> Result<Vec<HuffmanSpec>> {
        match self.sink {
            Sink::Gather(counters) => counters
                .iter()
                .map(|(&(class, id), counter)| counter.to_spec(class, id))
                .collect(),
            Sink::Emit(_) => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy_decoder::McuDecoder;
    use crate::test_support::{frame_header, sample_mcu, scan_header};
    use std::io::Cursor;

    #[test]
    fn test_long_zero_runs_use_zrl() -> Result<()> {
        let frame = frame_header(8, 8, &[(1, 1)]);
        let scan = scan_header(&frame);
        let tables = HuffmanTables::standard()?;

        let mut block = Block::new(5);
        block.push(40, -3);
        block.push(63, 1);

        let mut encoder = McuEncoder::emitting(&frame, &scan, &tables, 0)?;
        let mut out = vec![];
        encoder.encode_mcu(&mut out, &vec![block.clone()])?;
        encoder.finish(&mut out)?;

        let mut decoder = McuDecoder::from(&frame, &scan, 0)?;
        let mut pending = None;
        let decoded = decoder.decode_mcu(&mut Cursor::new(&out[..]), &tables, &mut pending)?;
        assert_eq!(decoded, vec![block]);

        Ok(())
    }

    #[test]
    fn test_restart_after_every_interval() -> Result<()> {
        let frame = frame_header(32, 8, &[(1, 1)]);
        let scan = scan_header(&frame);
        let tables = HuffmanTables::standard()?;

        let mut encoder = McuEncoder::emitting(&frame, &scan, &tables, 2)?;
        let mut out = vec![];
        for i in 0..4 {
            encoder.encode_mcu(&mut out, &sample_mcu(&frame, i))?;
        }
        encoder.finish(&mut out)?;

        let restarts: Vec<u8> = out
            .windows(2)
            .filter(|w| w[0] == 0xFF && Marker::is_restart(w[1]))
            .map(|w| w[1])
            .collect();
        assert_eq!(restarts, vec![0xD0, 0xD1]);
        assert!(out.ends_with(&[0xFF, 0xD1]));

        Ok(())
    }

    #[test]
    fn test_gathered_tables_encode_the_same_blocks() -> Result<()> {
        let frame = frame_header(32, 16, &[(2, 1), (1, 1), (1, 1)]);
        let scan = scan_header(&frame).with_standard_destinations();
        let mcus: Vec<Mcu> = (0..2).map(|i| sample_mcu(&frame, i)).collect();

        let mut gathering = McuEncoder::gathering(&frame, &scan, 0)?;
        let mut sink = std::io::sink();
        for mcu in &mcus {
            gathering.encode_mcu(&mut sink, mcu)?;
        }
        let specs = gathering.into_specs()?;
        assert_eq!(specs.len(), 4);

        let tables = HuffmanTables::from_specs(specs)?;
        let mut encoder = McuEncoder::emitting(&frame, &scan, &tables, 0)?;
        let mut out = vec![];
        for mcu in &mcus {
            encoder.encode_mcu(&mut out, mcu)?;
        }
        encoder.finish(&mut out)?;

        let mut decoder = McuDecoder::from(&frame, &scan, 0)?;
        let mut src = Cursor::new(&out[..]);
        let mut pending = None;
        for mcu in &mcus {
            assert_eq!(&decoder.decode_mcu(&mut src, &tables, &mut pending)?, mcu);
        }

        Ok(())
    }
}
