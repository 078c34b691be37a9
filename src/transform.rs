use crate::coefficient::{Block, CoefficientPlane, Mcu};
use crate::error::{invalid_argument, LljtError};
use crate::frame_header::{Component, FrameHeader};
use crate::quantization_table::QuantizationTable;
use anyhow::Result;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// The lossless geometric operators, numbered as in the orientation-correction table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Transform {
    None = 0,
    FlipH = 1,
    FlipV = 2,
    Transpose = 3,
    Transverse = 4,
    Rot90 = 5,
    Rot180 = 6,
    Rot270 = 7,
    Crop = 8,
}

impl Transform {
    /// The eight geometric operators (every one but crop).
    pub const ALL: [Transform; 8] = [
        Transform::None,
        Transform::FlipH,
        Transform::FlipV,
        Transform::Transpose,
        Transform::Transverse,
        Transform::Rot90,
        Transform::Rot180,
        Transform::Rot270,
    ];

    pub fn from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Transform::None),
            1 => Ok(Transform::FlipH),
            2 => Ok(Transform::FlipV),
            3 => Ok(Transform::Transpose),
            4 => Ok(Transform::Transverse),
            5 => Ok(Transform::Rot90),
            6 => Ok(Transform::Rot180),
            7 => Ok(Transform::Rot270),
            8 => Ok(Transform::Crop),
            _ => Err(invalid_argument(format!("unknown transform {code}"))),
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// The operator undoing this one. Crop has none.
    pub fn inverse(&self) -> Option<Transform> {
        match self {
            Transform::Rot90 => Some(Transform::Rot270),
            Transform::Rot270 => Some(Transform::Rot90),
            Transform::Crop => None,
            op => Some(*op),
        }
    }

    /// Operators that exchange rows and columns.
    pub fn is_quarter_turn(&self) -> bool {
        matches!(
            self,
            Transform::Transpose | Transform::Transverse | Transform::Rot90 | Transform::Rot270
        )
    }

    /// Operators moving the right edge of the source somewhere other than the right.
    fn relocates_right_edge(&self) -> bool {
        matches!(
            self,
            Transform::Rot270 | Transform::Transverse | Transform::Rot180 | Transform::FlipH
        )
    }

    /// Operators moving the bottom edge of the source somewhere other than the bottom.
    fn relocates_bottom_edge(&self) -> bool {
        matches!(
            self,
            Transform::Rot90 | Transform::Transverse | Transform::Rot180 | Transform::FlipV
        )
    }
}

impl FromStr for Transform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Transform::None),
            "flip-h" | "fliph" | "flip_h" => Ok(Transform::FlipH),
            "flip-v" | "flipv" | "flip_v" => Ok(Transform::FlipV),
            "transpose" => Ok(Transform::Transpose),
            "transverse" => Ok(Transform::Transverse),
            "rot90" | "rot-90" | "rot_90" => Ok(Transform::Rot90),
            "rot180" | "rot-180" | "rot_180" => Ok(Transform::Rot180),
            "rot270" | "rot-270" | "rot_270" => Ok(Transform::Rot270),
            "crop" => Ok(Transform::Crop),
            _ => Err(invalid_argument(format!("unknown transform '{s}'"))),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transform::None => "none",
            Transform::FlipH => "flip-h",
            Transform::FlipV => "flip-v",
            Transform::Transpose => "transpose",
            Transform::Transverse => "transverse",
            Transform::Rot90 => "rot90",
            Transform::Rot180 => "rot180",
            Transform::Rot270 => "rot270",
            Transform::Crop => "crop",
        };
        f.write_str(name)
    }
}

/// Transform and write options, combined with `|`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Options(u32);

impl Options {
    pub const NONE: Options = Options(0);

    /// Rewrite the image-info marker to match the transformed image.
    pub const XFORM_APPX: Options = Options(0x1);

    /// Transform the embedded thumbnail too. Requires `XFORM_APPX`.
    pub const XFORM_THUMBNAIL: Options = Options(0x2);

    /// Drop partial edge MCUs that would otherwise end up on a leading edge.
    pub const XFORM_TRIM: Options = Options(0x4);

    /// Keep partial edge MCUs by moving them to a trailing edge with a substitute operator.
    pub const XFORM_ADJUST_EDGES: Options = Options(0x8);

    /// Transform the orientation tag along with the pixels.
    pub const XFORM_ORIENTATION: Options = Options(0x10);

    pub const WRITE_APPXS: Options = Options(0x100);
    pub const WRITE_COMMENTS: Options = Options(0x200);

    /// Synthesize optimal Huffman tables for the output.
    pub const OPTIMIZE_HUFF: Options = Options(0x400);

    pub const DEFAULTS: Options = Options(
        Options::XFORM_APPX.0
            | Options::XFORM_ADJUST_EDGES.0
            | Options::WRITE_APPXS.0
            | Options::WRITE_COMMENTS.0,
    );

    pub fn from_bits(bits: u32) -> Self {
        Options(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Options) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Options) {
        self.0 &= !other.0;
    }

    pub fn without(mut self, other: Options) -> Self {
        self.remove(other);
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::DEFAULTS
    }
}

impl BitOr for Options {
    type Output = Options;

    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

impl BitOrAssign for Options {
    fn bitor_assign(&mut self, rhs: Options) {
        self.0 |= rhs.0;
    }
}

/// A crop rectangle in pixels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CropRect {
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
}

impl CropRect {
    pub fn new(left: usize, top: usize, width: usize, height: usize) -> Self {
        CropRect {
            left,
            top,
            width,
            height,
        }
    }

    /// Snaps the origin down to the MCU boundary at or before it and clips the size to the frame.
    ///
    /// The origin is always floored, never rounded to the nearest boundary: an origin one pixel
    /// short of the next MCU still snaps back a whole MCU. The width and height are kept, so the
    /// snapped rectangle may end before the requested one.
    pub fn snap(&self, frame: &FrameHeader) -> Result<CropRect> {
        let (frame_width, frame_height) = (frame.image_width, frame.image_height);
        if self.width == 0 || self.height == 0 {
            return Err(invalid_argument("crop width and height must be positive"));
        }
        if self.left >= frame_width || self.top >= frame_height {
            return Err(invalid_argument(format!(
                "crop origin ({}, {}) is outside the {frame_width}x{frame_height} image",
                self.left, self.top
            )));
        }

        let left = self.left - self.left % frame.mcu_width();
        let top = self.top - self.top % frame.mcu_height();

        Ok(CropRect {
            left,
            top,
            width: self.width.min(frame_width - left),
            height: self.height.min(frame_height - top),
        })
    }
}

impl FromStr for CropRect {
    type Err = anyhow::Error;

    /// `left,top,width,height`
    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid_argument(format!("bad crop rectangle '{s}': {e}")))?;

        match parts.as_slice() {
            &[left, top, width, height] => Ok(CropRect::new(left, top, width, height)),
            _ => Err(invalid_argument(format!(
                "crop rectangle '{s}' needs left,top,width,height"
            ))),
        }
    }
}

/// Bits telling which partial edge a transform cannot carry over exactly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Imperfection(u8);

impl Imperfection {
    pub const IMPERFECT_X: u8 = 1;
    pub const IMPERFECT_Y: u8 = 2;

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_perfect(&self) -> bool {
        self.0 == 0
    }

    pub fn x(&self) -> bool {
        self.0 & Imperfection::IMPERFECT_X != 0
    }

    pub fn y(&self) -> bool {
        self.0 & Imperfection::IMPERFECT_Y != 0
    }
}

/// Which edges of the output a transform of `frame` would leave imperfect. For crop, the
/// rectangle is judged as given, before snapping.
pub fn check_perfect(frame: &FrameHeader, op: Transform, crop: Option<&CropRect>) -> Result<Imperfection> {
    let (mcu_width, mcu_height) = (frame.mcu_width(), frame.mcu_height());
    let mut bits = 0;

    match op {
        Transform::Crop => {
            let crop = crop.ok_or(invalid_argument("crop needs a rectangle"))?;
            if crop.left % mcu_width != 0 {
                bits |= Imperfection::IMPERFECT_X;
            }
            if crop.top % mcu_height != 0 {
                bits |= Imperfection::IMPERFECT_Y;
            }
        }
        _ => {
            if op.relocates_right_edge() && frame.image_width % mcu_width != 0 {
                bits |= Imperfection::IMPERFECT_X;
            }
            if op.relocates_bottom_edge() && frame.image_height % mcu_height != 0 {
                bits |= Imperfection::IMPERFECT_Y;
            }
        }
    }

    Ok(Imperfection(bits))
}

/// Which source edges hold partial MCUs once the frame has been resized for the transform.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) struct PartialEdges {
    pub(crate) x: bool,
    pub(crate) y: bool,
}

/// Resizes `frame` (still in source orientation) for `op`: to the crop rectangle for crop, and
/// without the partial strips TRIM drops.
pub(crate) fn adjust_frame(
    frame: &mut FrameHeader,
    op: Transform,
    options: Options,
    crop: Option<&CropRect>,
) -> PartialEdges {
    if let (Transform::Crop, Some(crop)) = (op, crop) {
        frame.image_width = crop.width;
        frame.image_height = crop.height;
    }

    let (mcu_width, mcu_height) = (frame.mcu_width(), frame.mcu_height());
    let x_rem = frame.image_width % mcu_width;
    let y_rem = frame.image_height % mcu_height;
    let mut edges = PartialEdges {
        x: x_rem != 0,
        y: y_rem != 0,
    };

    if options.contains(Options::XFORM_TRIM) {
        if edges.y && op.relocates_bottom_edge() && frame.height_in_mcu() > 1 {
            edges.y = false;
            frame.image_height -= y_rem;
        }
        if edges.x && op.relocates_right_edge() && frame.width_in_mcu() > 1 {
            edges.x = false;
            frame.image_width -= x_rem;
        }
    }

    edges
}

/// Where each output MCU comes from, and which operator its blocks get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct McuMapping {
    op: Transform,
    /// Output size in MCUs.
    width_in_mcu: usize,
    height_in_mcu: usize,
    handle_x: bool,
    handle_y: bool,
    crop_offset: (usize, usize),
}

impl McuMapping {
    /// `frame` is the output frame: adjusted, then transposed for quarter turns. `crop_offset`
    /// is the snapped crop origin in source MCUs.
    pub(crate) fn from(
        op: Transform,
        frame: &FrameHeader,
        edges: PartialEdges,
        options: Options,
        crop_offset: (usize, usize),
    ) -> Self {
        let adjust = options.contains(Options::XFORM_ADJUST_EDGES);
        McuMapping {
            op,
            width_in_mcu: frame.width_in_mcu(),
            height_in_mcu: frame.height_in_mcu(),
            handle_x: adjust && edges.x,
            handle_y: adjust && edges.y,
            crop_offset,
        }
    }

    pub(crate) fn width_in_mcu(&self) -> usize {
        self.width_in_mcu
    }

    pub(crate) fn height_in_mcu(&self) -> usize {
        self.height_in_mcu
    }

    /// Source MCU column and row for output MCU (`new_ix`, `new_iy`), with the operator its
    /// blocks take. A partial source edge that would land on a leading output edge is shifted
    /// to the trailing edge and given a substitute operator.
    pub(crate) fn source_for(&self, new_ix: usize, new_iy: usize) -> (usize, usize, Transform) {
        let (w, h) = (self.width_in_mcu, self.height_in_mcu);
        let mut block_op = self.op;

        let (ix, iy) = match self.op {
            Transform::Transpose => (new_iy, new_ix),
            Transform::Rot90 => {
                let mut iy = w - 1 - new_ix;
                if self.handle_y {
                    if iy > 0 {
                        iy -= 1;
                    } else {
                        iy = w - 1;
                        block_op = Transform::Transpose;
                    }
                }
                (new_iy, iy)
            }
            Transform::Rot270 => {
                let mut ix = h - 1 - new_iy;
                if self.handle_x {
                    if ix > 0 {
                        ix -= 1;
                    } else {
                        ix = h - 1;
                        block_op = Transform::Transpose;
                    }
                }
                (ix, new_ix)
            }
            Transform::Transverse => {
                let mut ix = h - 1 - new_iy;
                let mut iy = w - 1 - new_ix;
                if self.handle_x {
                    if ix > 0 {
                        ix -= 1;
                    } else {
                        ix = h - 1;
                        block_op = Transform::Rot90;
                    }
                }
                if self.handle_y {
                    if iy > 0 {
                        iy -= 1;
                    } else {
                        iy = w - 1;
                        block_op = match block_op {
                            Transform::Transverse => Transform::Rot270,
                            _ => Transform::Transpose,
                        };
                    }
                }
                (ix, iy)
            }
            Transform::FlipH => {
                let mut ix = w - 1 - new_ix;
                if self.handle_x {
                    if ix > 0 {
                        ix -= 1;
                    } else {
                        ix = w - 1;
                        block_op = Transform::None;
                    }
                }
                (ix, new_iy)
            }
            Transform::FlipV => {
                let mut iy = h - 1 - new_iy;
                if self.handle_y {
                    if iy > 0 {
                        iy -= 1;
                    } else {
                        iy = h - 1;
                        block_op = Transform::None;
                    }
                }
                (new_ix, iy)
            }
            Transform::Rot180 => {
                let mut ix = w - 1 - new_ix;
                let mut iy = h - 1 - new_iy;
                if self.handle_x {
                    if ix > 0 {
                        ix -= 1;
                    } else {
                        ix = w - 1;
                        block_op = Transform::FlipV;
                    }
                }
                if self.handle_y {
                    if iy > 0 {
                        iy -= 1;
                    } else {
                        iy = h - 1;
                        block_op = match block_op {
                            Transform::Rot180 => Transform::FlipH,
                            _ => Transform::None,
                        };
                    }
                }
                (ix, iy)
            }
            Transform::Crop => {
                block_op = Transform::None;
                (new_ix + self.crop_offset.0, new_iy + self.crop_offset.1)
            }
            Transform::None => (new_ix, new_iy),
        };

        (ix, iy, block_op)
    }
}

/// Reorders and transforms the blocks of one source MCU into output order.
///
/// `components` carry the output sampling factors (already swapped for quarter turns).
pub(crate) fn transform_mcu(mcu: &Mcu, components: &[Component], op: Transform) -> Result<Mcu> {
    let mut out = Vec::with_capacity(mcu.len());
    let mut off = 0;

    let block = |index: usize| -> Result<&Block> {
        mcu.get(index).ok_or(
            LljtError::Malformed(format!("MCU holds {} blocks, wanted block {index}", mcu.len()))
                .into(),
        )
    };

    for component in components {
        let h = component.horizontal_scaling_factor as usize;
        let v = component.vertical_scaling_factor as usize;

        match op {
            Transform::Transpose | Transform::Rot90 | Transform::Rot270 | Transform::Transverse => {
                let columns: Vec<usize> = match op {
                    Transform::Rot270 | Transform::Transverse => (0..v).rev().collect(),
                    _ => (0..v).collect(),
                };
                let rows: Vec<usize> = match op {
                    Transform::Rot90 | Transform::Transverse => (0..h).rev().collect(),
                    _ => (0..h).collect(),
                };
                for &mx in &columns {
                    for &my in &rows {
                        out.push(block(off + my * v + mx)?.apply(op));
                    }
                }
            }
            Transform::FlipH | Transform::FlipV | Transform::Rot180 => {
                let rows: Vec<usize> = match op {
                    Transform::FlipH => (0..v).collect(),
                    _ => (0..v).rev().collect(),
                };
                let columns: Vec<usize> = match op {
                    Transform::FlipV => (0..h).collect(),
                    _ => (0..h).rev().collect(),
                };
                for &my in &rows {
                    for &mx in &columns {
                        out.push(block(off + my * h + mx)?.apply(op));
                    }
                }
            }
            Transform::None | Transform::Crop => {
                for b in 0..h * v {
                    out.push(block(off + b)?.clone());
                }
            }
        }

        off += h * v;
    }

    Ok(out)
}

/// Output geometry of a transform: the frame and tables the output carries and where each
/// output MCU comes from.
#[derive(Debug, Clone)]
pub(crate) struct TransformPlan {
    pub(crate) op: Transform,
    pub(crate) frame: FrameHeader,
    pub(crate) quant_tables: [Option<QuantizationTable>; 4],
    pub(crate) mapping: McuMapping,
}

impl TransformPlan {
    pub(crate) fn from(
        frame: &FrameHeader,
        quant_tables: &[Option<QuantizationTable>; 4],
        op: Transform,
        options: Options,
        crop: Option<&CropRect>,
    ) -> Result<Self> {
        let mut out = frame.clone();
        let snapped = match op {
            Transform::Crop => Some(
                crop.ok_or(invalid_argument("crop needs a rectangle"))?
                    .snap(frame)?,
            ),
            _ => None,
        };
        let crop_offset = snapped.map_or((0, 0), |c| {
            (c.left / frame.mcu_width(), c.top / frame.mcu_height())
        });

        let edges = adjust_frame(&mut out, op, options, snapped.as_ref());
        let mut quant_tables = quant_tables.clone();
        if op.is_quarter_turn() {
            out.transpose();
            quant_tables.iter_mut().flatten().for_each(QuantizationTable::transpose);
        }

        let mapping = McuMapping::from(op, &out, edges, options, crop_offset);
        Ok(TransformPlan {
            op,
            frame: out,
            quant_tables,
            mapping,
        })
    }

    pub(crate) fn total_mcus(&self) -> usize {
        self.mapping.width_in_mcu() * self.mapping.height_in_mcu()
    }

    /// Output MCU (`new_ix`, `new_iy`), built from its source MCU in `plane`.
    pub(crate) fn output_mcu(
        &self,
        plane: &CoefficientPlane,
        new_ix: usize,
        new_iy: usize,
    ) -> Result<Mcu> {
        let (ix, iy, block_op) = self.mapping.source_for(new_ix, new_iy);
        let mcu = plane.mcu(ix, iy)?;
        let expected = self.frame.blocks_per_mcu();
        if mcu.len() != expected {
            return Err(LljtError::Malformed(format!(
                "MCU ({ix}, {iy}) holds {} blocks, the frame needs {expected}",
                mcu.len()
            ))
            .into());
        }
        transform_mcu(mcu, &self.frame.components, block_op)
    }

    /// The source rows output row `new_iy` reads from.
    pub(crate) fn source_rows(&self, new_iy: usize) -> Vec<usize> {
        let mut rows: Vec<usize> = (0..self.mapping.width_in_mcu())
            .map(|new_ix| self.mapping.source_for(new_ix, new_iy).1)
            .collect();
        rows.dedup();
        rows
    }
}
