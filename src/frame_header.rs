use crate::coding::CodingProcess;
use crate::error::malformed;
use crate::marker::Marker;
use anyhow::Result;

pub(crate) const DCT_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub(crate) process: CodingProcess,

    /// P: Specifies the precision in bits for the samples of the components in the frame.
    pub(crate) precision: u8,

    /// Y: Number of lines -- Specifies the maximum number of lines in the source image. This shall
    /// be equal to the number of lines in the component with the maximum number of vertical samples.
    pub(crate) image_height: usize,

    /// X: Number of samples per line -- Specifies the maximum number of samples per line in the
    /// source image.
    pub(crate) image_width: usize,

    /// Ci, Hi, Vi, Tqi for each of the Nf components, in frame order.
    pub(crate) components: Vec<Component>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ComponentType {
    Grayscale,
    Color,
}

impl ComponentType {
    pub(crate) fn from(num_components: usize) -> Self {
        match num_components {
            1 => ComponentType::Grayscale,
            _ => ComponentType::Color,
        }
    }
}

/// One of the two-dimensional arrays which comprise an image
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Ci: Assigns a unique label to the ith component in the sequence of frame component
    /// specification parameters.
    pub(crate) component_id: u8,

    /// Hi: Specifies the relationship between the component horizontal dimension and
    /// `image_width`; also the number of horizontal blocks of component Ci in each MCU.
    pub(crate) horizontal_scaling_factor: u8,

    /// Vi: Specifies the relationship between the component vertical dimension and
    /// `image_height`; also the number of vertical blocks of component Ci in each MCU.
    pub(crate) vertical_scaling_factor: u8,

    /// Tqi: Specifies one of four possible quantization table destinations.
    pub(crate) qt_table_id: u8,
}

impl Component {
    pub(crate) fn from(
        component_id: u8,
        horizontal_sf: u8,
        vertical_sf: u8,
        qt_table_id: u8,
    ) -> Self {
        Component {
            component_id,
            horizontal_scaling_factor: horizontal_sf,
            vertical_scaling_factor: vertical_sf,
            qt_table_id,
        }
    }

    pub(crate) fn blocks_per_mcu(&self) -> usize {
        self.horizontal_scaling_factor as usize * self.vertical_scaling_factor as usize
    }

    pub fn sampling(&self) -> (u8, u8) {
        (self.horizontal_scaling_factor, self.vertical_scaling_factor)
    }
}

impl FrameHeader {
    /// Parses the payload of an SOF0/SOF1 segment.
    pub(crate) fn parse(process: CodingProcess, payload: &[u8]) -> Result<Self> {
        if payload.len() < 6 {
            return Err(malformed("frame header truncated"));
        }

        let precision = payload[0];
        let image_height = u16::from_be_bytes([payload[1], payload[2]]) as usize;
        let image_width = u16::from_be_bytes([payload[3], payload[4]]) as usize;
        let num_components = payload[5] as usize;

        if num_components == 0 || payload.len() < 6 + num_components * 3 {
            return Err(malformed(format!(
                "frame header declares {num_components} components in {} bytes",
                payload.len()
            )));
        }

        let mut components = Vec::with_capacity(num_components);
        for chunk in payload[6..6 + num_components * 3].chunks_exact(3) {
            let (h, v) = (chunk[1] >> 4, chunk[1] & 0x0F);
            if !(1..=4).contains(&h) || !(1..=4).contains(&v) {
                return Err(malformed(format!("invalid sampling factors {h}x{v}")));
            }
            components.push(Component::from(chunk[0], h, v, chunk[2]));
        }

        // a single component is coded non-interleaved: one block per MCU whatever it declares
        if let [component] = components.as_mut_slice() {
            component.horizontal_scaling_factor = 1;
            component.vertical_scaling_factor = 1;
        }

        Ok(FrameHeader {
            process,
            precision,
            image_height,
            image_width,
            components,
        })
    }

    pub(crate) fn output_marker(&self) -> Marker {
        match self.precision {
            8 => Marker::SOF0,
            _ => Marker::SOF1,
        }
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(6 + self.components.len() * 3);
        payload.push(self.precision);
        payload.extend_from_slice(&(self.image_height as u16).to_be_bytes());
        payload.extend_from_slice(&(self.image_width as u16).to_be_bytes());
        payload.push(self.components.len() as u8);
        for component in &self.components {
            payload.push(component.component_id);
            payload.push((component.horizontal_scaling_factor << 4) | component.vertical_scaling_factor);
            payload.push(component.qt_table_id);
        }
        payload
    }

    pub fn process(&self) -> CodingProcess {
        self.process
    }

    pub fn component_type(&self) -> ComponentType {
        ComponentType::from(self.components.len())
    }

    pub fn max_h(&self) -> usize {
        self.components
            .iter()
            .map(|c| c.horizontal_scaling_factor as usize)
            .max()
            .unwrap_or(1)
    }

    pub fn max_v(&self) -> usize {
        self.components
            .iter()
            .map(|c| c.vertical_scaling_factor as usize)
            .max()
            .unwrap_or(1)
    }

    pub fn mcu_width(&self) -> usize {
        DCT_SIZE * self.max_h()
    }

    pub fn mcu_height(&self) -> usize {
        DCT_SIZE * self.max_v()
    }

    pub fn width_in_mcu(&self) -> usize {
        self.image_width.div_ceil(self.mcu_width())
    }

    pub fn height_in_mcu(&self) -> usize {
        self.image_height.div_ceil(self.mcu_height())
    }

    pub(crate) fn blocks_per_mcu(&self) -> usize {
        self.components.iter().map(Component::blocks_per_mcu).sum()
    }

    /// Swaps the roles of rows and columns: dimensions and every sampling factor.
    pub(crate) fn transpose(&mut self) {
        std::mem::swap(&mut self.image_width, &mut self.image_height);
        for component in self.components.iter_mut() {
            std::mem::swap(
                &mut component.horizontal_scaling_factor,
                &mut component.vertical_scaling_factor,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuv420(width: u16, height: u16) -> Vec<u8> {
        let mut payload = vec![8];
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&[3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1]);
        payload
    }

    #[test]
    fn test_parse_frame_geometry() -> Result<()> {
        let frame = FrameHeader::parse(CodingProcess::BaselineDCT, &yuv420(24, 16))?;

        assert_eq!(frame.image_width, 24);
        assert_eq!(frame.image_height, 16);
        assert_eq!(frame.component_type(), ComponentType::Color);
        assert_eq!((frame.mcu_width(), frame.mcu_height()), (16, 16));
        assert_eq!((frame.width_in_mcu(), frame.height_in_mcu()), (2, 1));
        assert_eq!(frame.blocks_per_mcu(), 6);
        assert_eq!(frame.to_bytes(), yuv420(24, 16));

        Ok(())
    }

    #[test]
    fn test_transpose_swaps_sampling() -> Result<()> {
        let mut payload = yuv420(40, 8);
        payload[7] = 0x21;
        let mut frame = FrameHeader::parse(CodingProcess::BaselineDCT, &payload)?;
        frame.transpose();

        assert_eq!((frame.image_width, frame.image_height), (8, 40));
        assert_eq!(frame.components[0].sampling(), (1, 2));
        assert_eq!((frame.mcu_width(), frame.mcu_height()), (8, 16));

        Ok(())
    }

    #[test]
    fn test_single_component_is_one_block_per_mcu() -> Result<()> {
        let payload = [8, 0, 16, 0, 16, 1, 1, 0x22, 0];
        let frame = FrameHeader::parse(CodingProcess::BaselineDCT, &payload)?;

        assert_eq!(frame.component_type(), ComponentType::Grayscale);
        assert_eq!(frame.mcu_width(), 8);
        assert_eq!(frame.blocks_per_mcu(), 1);

        Ok(())
    }

    #[test]
    fn test_rejects_truncated_frame() {
        assert!(FrameHeader::parse(CodingProcess::BaselineDCT, &[8, 0, 16, 0, 16, 3, 1]).is_err());
    }
}
