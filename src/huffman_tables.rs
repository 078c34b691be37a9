use crate::error::malformed;
use anyhow::Result;
use entropy::{DecodeTable, EncodeTable, HuffmanClass, HuffmanSpec};
use std::collections::HashMap;

/// The Huffman tables installed at each (class, destination) slot, kept in the form found in the
/// DHT segments together with their decoder and encoder views.
#[derive(Debug, Clone, Default)]
pub struct HuffmanTables {
    specs: Vec<HuffmanSpec>,
    decoders: HashMap<(HuffmanClass, u8), DecodeTable>,
    encoders: HashMap<(HuffmanClass, u8), EncodeTable>,
}

impl HuffmanTables {
    pub fn new() -> Self {
        HuffmanTables::default()
    }

    pub(crate) fn from_specs(specs: Vec<HuffmanSpec>) -> Result<Self> {
        let mut tables = HuffmanTables::new();
        for spec in specs {
            tables.install(spec)?;
        }
        Ok(tables)
    }

    /// The Annex K tables, installed at destinations 0 and 1.
    pub(crate) fn standard() -> Result<Self> {
        HuffmanTables::from_specs(HuffmanSpec::standard())
    }

    /// Installs a table, replacing whatever occupied its slot. A DHT may legally redefine a
    /// destination.
    pub(crate) fn install(&mut self, spec: HuffmanSpec) -> Result<()> {
        let key = (spec.class, spec.destination_id);
        self.decoders.insert(key, DecodeTable::from(&spec)?);
        self.encoders.insert(key, EncodeTable::from(&spec)?);

        match self
            .specs
            .iter_mut()
            .find(|s| s.class == spec.class && s.destination_id == spec.destination_id)
        {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }

        Ok(())
    }

    pub(crate) fn parse_segment(&mut self, payload: &[u8]) -> Result<()> {
        for spec in HuffmanSpec::parse_segment(payload)? {
            self.install(spec)?;
        }
        Ok(())
    }

    pub(crate) fn decoder(&self, class: HuffmanClass, id: u8) -> Result<&DecodeTable> {
        self.decoders
            .get(&(class, id))
            .ok_or(malformed(format!("{class:?} Huffman table {id} is not defined")))
    }

    pub(crate) fn encoder(&self, class: HuffmanClass, id: u8) -> Result<&EncodeTable> {
        self.encoders
            .get(&(class, id))
            .ok_or(malformed(format!("{class:?} Huffman table {id} is not defined")))
    }

    /// One DHT payload carrying every table: DC tables first, then AC tables.
    pub(crate) fn to_segment_payload(&self) -> Vec<u8> {
        let mut payload = vec![];
        for class in [HuffmanClass::DC, HuffmanClass::AC] {
            for spec in self.specs.iter().filter(|s| s.class == class) {
                payload.extend(spec.to_bytes());
            }
        }
        payload
    }

    pub fn specs(&self) -> &[HuffmanSpec] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tables_installed() -> Result<()> {
        let tables = HuffmanTables::standard()?;

        assert_eq!(tables.specs().len(), 4);
        assert!(tables.decoder(HuffmanClass::AC, 1).is_ok());
        assert!(tables.encoder(HuffmanClass::DC, 0).is_ok());
        assert!(tables.decoder(HuffmanClass::DC, 2).is_err());

        Ok(())
    }

    #[test]
    fn test_redefinition_replaces_slot() -> Result<()> {
        let mut tables = HuffmanTables::standard()?;

        let mut counts = [0u8; 16];
        counts[0] = 1;
        let spec = HuffmanSpec::from(HuffmanClass::DC, 0, counts, vec![0])?;
        tables.parse_segment(&spec.to_bytes())?;

        assert_eq!(tables.specs().len(), 4);
        assert_eq!(tables.specs()[0], spec);

        Ok(())
    }

    #[test]
    fn test_segment_payload_orders_dc_first() -> Result<()> {
        let specs = HuffmanSpec::standard();
        let tables = HuffmanTables::from_specs(vec![specs[2].clone(), specs[0].clone()])?;
        let payload = tables.to_segment_payload();

        assert_eq!(payload[0], 0x00);
        assert_eq!(payload[specs[0].to_bytes().len()], 0x10);

        Ok(())
    }
}
