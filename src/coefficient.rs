use crate::error::LljtError;
use crate::transform::Transform;
use anyhow::Result;

/// Zig-zag position to natural (row-major) index.
pub const NATURAL_ORDER: [u8; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27, 20,
    13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58, 59,
    52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Natural (row-major) index to zig-zag position.
pub const ZIGZAG_ORDER: [u8; 64] = [
    0, 1, 5, 6, 14, 15, 27, 28, 2, 4, 7, 13, 16, 26, 29, 42, 3, 8, 12, 17, 25, 30, 41, 43, 9, 11,
    18, 24, 31, 40, 44, 53, 10, 19, 23, 32, 39, 45, 52, 54, 20, 22, 33, 38, 46, 51, 55, 60, 21, 34,
    37, 47, 50, 56, 59, 61, 35, 36, 48, 49, 57, 58, 62, 63,
];

/// The quantized DCT coefficients of one 8x8 block, stored sparsely as (zig-zag index, value)
/// pairs.
///
/// The first pair is always the DC coefficient at index 0, stored as an absolute value. The AC
/// pairs follow with strictly increasing indices and nonzero values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    coefficients: Vec<(u8, i32)>,
}

impl Block {
    pub fn new(dc: i32) -> Self {
        Block {
            coefficients: vec![(0, dc)],
        }
    }

    /// Builds a block from 64 coefficients in zig-zag order, dropping zero AC terms.
    pub fn from_zigzag(values: &[i32; 64]) -> Self {
        let mut block = Block::new(values[0]);
        for (k, &value) in values.iter().enumerate().skip(1) {
            if value != 0 {
                block.coefficients.push((k as u8, value));
            }
        }
        block
    }

    pub(crate) fn push(&mut self, index: u8, value: i32) {
        debug_assert!(self.coefficients.last().is_some_and(|&(last, _)| index > last));
        self.coefficients.push((index, value));
    }

    pub fn dc(&self) -> i32 {
        self.coefficients[0].1
    }

    /// The AC terms, in zig-zag order.
    pub fn ac(&self) -> &[(u8, i32)] {
        &self.coefficients[1..]
    }

    pub fn coefficients(&self) -> &[(u8, i32)] {
        &self.coefficients
    }

    pub fn to_zigzag(&self) -> [i32; 64] {
        let mut values = [0; 64];
        for &(k, value) in &self.coefficients {
            values[k as usize] = value;
        }
        values
    }

    /// Moves every coefficient to a new natural position, possibly negating it, and restores
    /// zig-zag order.
    fn remap(&self, map: impl Fn(usize) -> (usize, bool)) -> Block {
        let mut coefficients: Vec<(u8, i32)> = self
            .coefficients
            .iter()
            .map(|&(zz, value)| {
                let (natural, negate) = map(NATURAL_ORDER[zz as usize] as usize);
                let value = if negate { -value } else { value };
                (ZIGZAG_ORDER[natural], value)
            })
            .collect();

        coefficients.sort_unstable_by_key(|&(zz, _)| zz);
        Block { coefficients }
    }

    /// Negates in place the coefficients whose natural index satisfies `negate`.
    fn reflect(&self, negate: impl Fn(usize) -> bool) -> Block {
        let coefficients = self
            .coefficients
            .iter()
            .map(|&(zz, value)| match negate(NATURAL_ORDER[zz as usize] as usize) {
                true => (zz, -value),
                false => (zz, value),
            })
            .collect();

        Block { coefficients }
    }

    pub fn transposed(&self) -> Block {
        self.remap(|k| (transpose_index(k), false))
    }

    /// Quarter turn clockwise.
    pub fn rot90(&self) -> Block {
        self.remap(|k| {
            let t = transpose_index(k);
            (t, t & 1 != 0)
        })
    }

    pub fn rot270(&self) -> Block {
        self.remap(|k| {
            let t = transpose_index(k);
            (t, t & 8 != 0)
        })
    }

    pub fn transverse(&self) -> Block {
        self.remap(|k| {
            let t = transpose_index(k);
            (t, (k & 1 != 0) ^ (t & 1 != 0))
        })
    }

    pub fn flip_h(&self) -> Block {
        self.reflect(|k| k & 1 != 0)
    }

    pub fn flip_v(&self) -> Block {
        self.reflect(|k| k & 8 != 0)
    }

    pub fn rot180(&self) -> Block {
        self.reflect(|k| matches!(k & 9, 1 | 8))
    }

    pub fn apply(&self, op: Transform) -> Block {
        match op {
            Transform::None | Transform::Crop => self.clone(),
            Transform::FlipH => self.flip_h(),
            Transform::FlipV => self.flip_v(),
            Transform::Transpose => self.transposed(),
            Transform::Transverse => self.transverse(),
            Transform::Rot90 => self.rot90(),
            Transform::Rot180 => self.rot180(),
            Transform::Rot270 => self.rot270(),
        }
    }
}

fn transpose_index(k: usize) -> usize {
    ((k & 7) << 3) + (k >> 3)
}

/// The blocks of one MCU: for each component in frame order, Hi x Vi blocks row by row.
pub type Mcu = Vec<Block>;

/// Every MCU of the image, row by row. A row is `None` once released.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoefficientPlane {
    width_in_mcu: usize,
    rows: Vec<Option<Vec<Mcu>>>,
}

impl CoefficientPlane {
    /// An empty plane of the given size in MCUs. Rows are added as they are decoded.
    pub fn new(width_in_mcu: usize, height_in_mcu: usize) -> Self {
        CoefficientPlane {
            width_in_mcu,
            rows: Vec::with_capacity(height_in_mcu),
        }
    }

    pub fn from_rows(width_in_mcu: usize, rows: Vec<Vec<Mcu>>) -> Self {
        CoefficientPlane {
            width_in_mcu,
            rows: rows.into_iter().map(Some).collect(),
        }
    }

    pub fn width_in_mcu(&self) -> usize {
        self.width_in_mcu
    }

    pub fn height_in_mcu(&self) -> usize {
        self.rows.len()
    }

    /// Appends a decoded MCU, starting a new row when the current one is full.
    pub(crate) fn push_mcu(&mut self, mcu: Mcu) {
        let width = self.width_in_mcu;
        match self.rows.last_mut() {
            Some(Some(row)) if row.len() < width => row.push(mcu),
            _ => {
                let mut row = Vec::with_capacity(width);
                row.push(mcu);
                self.rows.push(Some(row));
            }
        }
    }

    pub fn mcu(&self, ix: usize, iy: usize) -> Result<&Mcu> {
        match self.rows.get(iy) {
            Some(Some(row)) => row.get(ix).ok_or(
                LljtError::InvalidArgument(format!("MCU ({ix}, {iy}) is outside the plane")).into(),
            ),
            Some(None) => Err(LljtError::Released.into()),
            None => Err(
                LljtError::InvalidArgument(format!("MCU row {iy} is outside the plane")).into(),
            ),
        }
    }

    /// Releases one row of MCUs, returning it if it was still held.
    pub(crate) fn take_row(&mut self, iy: usize) -> Option<Vec<Mcu>> {
        self.rows.get_mut(iy).and_then(Option::take)
    }

    /// True when any row has already been handed out.
    pub fn is_released(&self) -> bool {
        self.rows.iter().any(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// 64 coefficients laid out as an 8x8 matrix in natural order.
    fn natural(block: &Block) -> [i32; 64] {
        let zigzag = block.to_zigzag();
        let mut values = [0; 64];
        for (zz, &value) in zigzag.iter().enumerate() {
            values[NATURAL_ORDER[zz] as usize] = value;
        }
        values
    }

    fn sample() -> Block {
        let mut values = [0; 64];
        for (k, v) in values.iter_mut().enumerate() {
            *v = (k as i32 * 7) % 13 - 6;
        }
        values[0] = 120;
        Block::from_zigzag(&values)
    }

    #[test]
    fn test_zigzag_tables_are_inverse() {
        for k in 0..64 {
            assert_eq!(NATURAL_ORDER[ZIGZAG_ORDER[k] as usize] as usize, k);
        }
    }

    #[test]
    fn test_transpose_moves_basis_functions() -> Result<()> {
        let block = sample();
        let original = natural(&block);
        let transposed = natural(&block.transposed());

        for row in 0..8 {
            for col in 0..8 {
                assert_eq!(transposed[col * 8 + row], original[row * 8 + col]);
            }
        }

        Ok(())
    }

    #[test]
    fn test_flips_negate_odd_frequencies() -> Result<()> {
        let block = sample();
        let original = natural(&block);
        let flipped_h = natural(&block.flip_h());
        let flipped_v = natural(&block.flip_v());

        for row in 0..8 {
            for col in 0..8 {
                let k = row * 8 + col;
                let h_sign = if col % 2 == 1 { -1 } else { 1 };
                let v_sign = if row % 2 == 1 { -1 } else { 1 };
                assert_eq!(flipped_h[k], h_sign * original[k]);
                assert_eq!(flipped_v[k], v_sign * original[k]);
            }
        }

        Ok(())
    }

    #[test]
    fn test_compositions() -> Result<()> {
        let block = sample();

        assert_eq!(block.rot90(), block.transposed().flip_h());
        assert_eq!(block.rot270(), block.transposed().flip_v());
        assert_eq!(block.rot180(), block.flip_h().flip_v());
        assert_eq!(block.transverse(), block.rot90().flip_v());
        assert_eq!(block.rot90().rot90(), block.rot180());

        Ok(())
    }

    #[test]
    fn test_dc_stays_first() -> Result<()> {
        let block = sample();
        for op in Transform::ALL {
            let transformed = block.apply(op);
            assert_eq!(transformed.coefficients()[0], (0, 120));
            assert!(transformed.ac().windows(2).all(|w| w[0].0 < w[1].0));
        }

        Ok(())
    }

    #[test]
    fn test_plane_rows() -> Result<()> {
        let mut plane = CoefficientPlane::new(2, 2);
        for dc in 0..4 {
            plane.push_mcu(vec![Block::new(dc)]);
        }

        assert_eq!(plane.height_in_mcu(), 2);
        assert_eq!(plane.mcu(1, 1)?[0].dc(), 3);
        assert!(plane.mcu(2, 0).is_err());

        let row = plane.take_row(0);
        assert_eq!(row.map(|r| r.len()), Some(2));
        assert!(plane.is_released());
        assert!(matches!(
            plane.mcu(0, 0).unwrap_err().downcast_ref::<LljtError>(),
            Some(LljtError::Released)
        ));

        Ok(())
    }

    fn sparse_block() -> impl Strategy<Value = Block> {
        (
            -2047i32..2047,
            proptest::collection::btree_map(1u8..64, (1i32..1024, any::<bool>()), 0..20),
        )
            .prop_map(|(dc, ac)| {
                let mut block = Block::new(dc);
                for (k, (magnitude, negative)) in ac {
                    block.push(k, if negative { -magnitude } else { magnitude });
                }
                block
            })
    }

    proptest! {
        #[test]
        fn prop_inverse_pairs_restore_block(block in sparse_block()) {
            for op in Transform::ALL {
                let inverse = op.inverse().unwrap();
                prop_assert_eq!(&block.apply(op).apply(inverse), &block);
            }
        }

        #[test]
        fn prop_four_quarter_turns_are_identity(block in sparse_block()) {
            prop_assert_eq!(&block.rot90().rot90().rot90().rot90(), &block);
        }
    }
}
