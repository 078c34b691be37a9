use crate::error::malformed;
use anyhow::Result;
use log::error;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanHeader {
    pub(crate) scan_component_selectors: Vec<ScanComponentSelector>,

    /// Ss: In DCT modes of operation, this parameter specifies the first DCT coefficient in each
    /// block in zig-zag order which shall be coded in the scan. This parameter is set to zero for
    /// sequential DCT processes.
    pub(crate) start_of_spectral_selection: u8,

    /// Se: Specifies the last DCT coefficient in each block in zig-zag order which shall be coded
    /// in the scan. This parameter shall be set to 63 for sequential DCT processes.
    pub(crate) end_of_spectral_selection: u8,

    /// Ah: The point transform used in the preceding scan. Zero for sequential processes.
    pub(crate) successive_approx_bit_position_high: u8,

    /// Al: The point transform used before coding this band. Zero for sequential processes.
    pub(crate) point_transform: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanComponentSelector {
    /// Csj: Selects which of the components specified in the frame parameters shall be the jth
    /// component in the scan.
    pub(crate) component_id: u8,

    /// Tdj: Specifies one of four possible DC entropy coding table destinations.
    pub(crate) dc_destination_id: u8,

    /// Taj: Specifies one of four possible AC entropy coding table destinations.
    pub(crate) ac_destination_id: u8,
}

impl ScanComponentSelector {
    pub(crate) fn from(component_id: u8, dc_destination_id: u8, ac_destination_id: u8) -> Self {
        Self {
            component_id,
            dc_destination_id,
            ac_destination_id,
        }
    }
}

impl ScanHeader {
    pub(crate) fn parse(payload: &[u8]) -> Result<Self> {
        let num_components = *payload
            .first()
            .ok_or(malformed("empty scan header"))? as usize;

        if payload.len() < 1 + num_components * 2 + 3 {
            return Err(malformed(format!(
                "scan header declares {num_components} components in {} bytes",
                payload.len()
            )));
        }

        let scan_component_selectors = payload[1..1 + num_components * 2]
            .chunks_exact(2)
            .map(|chunk| ScanComponentSelector::from(chunk[0], chunk[1] >> 4, chunk[1] & 0x0F))
            .collect();

        let tail = &payload[1 + num_components * 2..];
        let header = ScanHeader {
            scan_component_selectors,
            start_of_spectral_selection: tail[0],
            end_of_spectral_selection: tail[1],
            successive_approx_bit_position_high: tail[2] >> 4,
            point_transform: tail[2] & 0x0F,
        };

        if !header.is_sequential() {
            error!(
                "Not sequential image, Ss={} Se={} Ah={} Al={}",
                header.start_of_spectral_selection,
                header.end_of_spectral_selection,
                header.successive_approx_bit_position_high,
                header.point_transform
            );
        }

        Ok(header)
    }

    pub(crate) fn is_sequential(&self) -> bool {
        self.start_of_spectral_selection == 0
            && self.end_of_spectral_selection == 63
            && self.successive_approx_bit_position_high == 0
            && self.point_transform == 0
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut payload = vec![self.scan_component_selectors.len() as u8];
        for selector in &self.scan_component_selectors {
            payload.push(selector.component_id);
            payload.push((selector.dc_destination_id << 4) | selector.ac_destination_id);
        }
        payload.push(self.start_of_spectral_selection);
        payload.push(self.end_of_spectral_selection);
        payload.push((self.successive_approx_bit_position_high << 4) | self.point_transform);
        payload
    }

    /// The same scan, with tables reassigned so that the first component uses destination 0 and
    /// every other component destination 1.
    pub(crate) fn with_standard_destinations(&self) -> Self {
        let mut header = self.clone();
        for (i, selector) in header.scan_component_selectors.iter_mut().enumerate() {
            let id = u8::from(i > 0);
            selector.dc_destination_id = id;
            selector.ac_destination_id = id;
        }
        header
    }
}
