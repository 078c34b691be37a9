use crate::transform::Transform;

/// Corner labels of the oriented image for each orientation tag.
///
/// The corners of the stored image are numbered clockwise from the top left:
///
/// ```text
/// 0 1
/// 3 2
/// ```
///
/// Each entry packs the labels found at the top-left, top-right, bottom-right and bottom-left
/// corners of the displayed image, two bits each, top-left in the high bits.
const CORNERS: [u8; 9] = [
    0,
    (1 << 4) + (2 << 2) + 3,        // 1: 0,1,2,3
    (1 << 6) + (3 << 2) + 2,        // 2: 1,0,3,2
    (2 << 6) + (3 << 4) + 1,        // 3: 2,3,0,1
    (3 << 6) + (2 << 4) + (1 << 2), // 4: 3,2,1,0
    (3 << 4) + (2 << 2) + 1,        // 5: 0,3,2,1
    (1 << 6) + (2 << 4) + (3 << 2), // 6: 1,2,3,0
    (2 << 6) + (1 << 4) + 3,        // 7: 2,1,0,3
    (3 << 6) + (1 << 2) + 2,        // 8: 3,0,1,2
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    TopLeft = 1,
    TopRight = 2,
    BottomRight = 3,
    BottomLeft = 4,
    LeftTop = 5,
    RightTop = 6,
    RightBottom = 7,
    LeftBottom = 8,
}

impl Orientation {
    pub fn from(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Orientation::TopLeft),
            2 => Some(Orientation::TopRight),
            3 => Some(Orientation::BottomRight),
            4 => Some(Orientation::BottomLeft),
            5 => Some(Orientation::LeftTop),
            6 => Some(Orientation::RightTop),
            7 => Some(Orientation::RightBottom),
            8 => Some(Orientation::LeftBottom),
            _ => None,
        }
    }

    pub fn tag(&self) -> u16 {
        *self as u16
    }

    /// The transform that displays an image stored with this orientation upright.
    pub fn correction(&self) -> Transform {
        match self {
            Orientation::TopLeft => Transform::None,
            Orientation::TopRight => Transform::FlipH,
            Orientation::BottomRight => Transform::Rot180,
            Orientation::BottomLeft => Transform::FlipV,
            Orientation::LeftTop => Transform::Transpose,
            Orientation::RightTop => Transform::Rot90,
            Orientation::RightBottom => Transform::Transverse,
            Orientation::LeftBottom => Transform::Rot270,
        }
    }

    /// The orientation the image has once `op` has been applied to its pixels.
    pub fn transformed(&self, op: Transform) -> Orientation {
        let corners = permute(CORNERS[self.tag() as usize], op);
        (1..=8u16)
            .find(|&t| CORNERS[t as usize] == corners)
            .and_then(Orientation::from)
            .unwrap_or(*self)
    }
}

fn permute(p: u8, op: Transform) -> u8 {
    let (c0, c1, c2, c3) = (p >> 6, (p >> 4) & 3, (p >> 2) & 3, p & 3);
    let pack = |a: u8, b: u8, c: u8, d: u8| (a << 6) | (b << 4) | (c << 2) | d;

    match op {
        Transform::Transpose => pack(c0, c3, c2, c1),
        Transform::Transverse => pack(c2, c1, c0, c3),
        Transform::Rot90 => pack(c3, c0, c1, c2),
        Transform::Rot270 => pack(c1, c2, c3, c0),
        Transform::Rot180 => pack(c2, c3, c0, c1),
        Transform::FlipH => pack(c1, c0, c3, c2),
        Transform::FlipV => pack(c3, c2, c1, c0),
        Transform::None | Transform::Crop => p,
    }
}

/// Rewrites a raw orientation tag value for `op`. Values outside 1..=8 map to 0.
pub fn transform_orientation_tag(tag: u16, op: Transform) -> u16 {
    Orientation::from(tag).map_or(0, |o| o.transformed(op).tag())
}
