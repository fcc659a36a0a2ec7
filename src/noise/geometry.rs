//! Coordinate quantization and read-region clipping.

use crate::rng::stable_noise;

const GRID: f64 = 256.0;

/// Snap to the nearest 1/256. Halves round toward +∞, as page scripts do.
#[inline]
pub fn q256(v: f64) -> f64 {
    if !v.is_finite() {
        return v;
    }
    (v * GRID + 0.5).floor() / GRID
}

/// `fillRect`/`strokeRect`/`clearRect` style arguments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectArgs {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectArgs {
    pub fn quantized(&self) -> Self {
        Self {
            x: q256(self.x),
            y: q256(self.y),
            width: q256(self.width),
            height: q256(self.height),
        }
    }
}

/// The three `drawImage` overloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawImageArgs {
    At { dx: f64, dy: f64 },
    Scaled { dx: f64, dy: f64, dw: f64, dh: f64 },
    Cropped { sx: f64, sy: f64, sw: f64, sh: f64, dx: f64, dy: f64, dw: f64, dh: f64 },
}

impl DrawImageArgs {
    /// Destination coordinates snapped to the grid; source rectangle kept.
    pub fn quantized(&self) -> Self {
        match *self {
            DrawImageArgs::At { dx, dy } => DrawImageArgs::At { dx: q256(dx), dy: q256(dy) },
            DrawImageArgs::Scaled { dx, dy, dw, dh } => DrawImageArgs::Scaled {
                dx: q256(dx),
                dy: q256(dy),
                dw: q256(dw),
                dh: q256(dh),
            },
            DrawImageArgs::Cropped { sx, sy, sw, sh, dx, dy, dw, dh } => DrawImageArgs::Cropped {
                sx,
                sy,
                sw,
                sh,
                dx: q256(dx),
                dy: q256(dy),
                dw: q256(dw),
                dh: q256(dh),
            },
        }
    }

    pub fn destination(&self) -> (f64, f64) {
        match *self {
            DrawImageArgs::At { dx, dy }
            | DrawImageArgs::Scaled { dx, dy, .. }
            | DrawImageArgs::Cropped { dx, dy, .. } => (dx, dy),
        }
    }

    /// Build from a positional argument list (without the image source).
    pub fn from_slice(args: &[f64]) -> Option<Self> {
        match *args {
            [dx, dy] => Some(DrawImageArgs::At { dx, dy }),
            [dx, dy, dw, dh] => Some(DrawImageArgs::Scaled { dx, dy, dw, dh }),
            [sx, sy, sw, sh, dx, dy, dw, dh] => {
                Some(DrawImageArgs::Cropped { sx, sy, sw, sh, dx, dy, dw, dh })
            }
            _ => None,
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        match *self {
            DrawImageArgs::At { dx, dy } => vec![dx, dy],
            DrawImageArgs::Scaled { dx, dy, dw, dh } => vec![dx, dy, dw, dh],
            DrawImageArgs::Cropped { sx, sy, sw, sh, dx, dy, dw, dh } => {
                vec![sx, sy, sw, sh, dx, dy, dw, dh]
            }
        }
    }
}

/// A `getImageData` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Normalise negative extents the way hosts do, pull the origin inside
    /// the canvas and shrink the extent so the read never runs past the
    /// right or bottom edge. Extents never drop below 1.
    pub fn clipped(&self, canvas_width: u32, canvas_height: u32) -> Self {
        let (x, width) = clip_axis(self.x, self.width, canvas_width);
        let (y, height) = clip_axis(self.y, self.height, canvas_height);
        Self { x, y, width, height }
    }
}

fn clip_axis(origin: i32, extent: i32, limit: u32) -> (i32, i32) {
    let limit = i64::from(limit.min(i32::MAX as u32));
    let (mut start, mut len) = (i64::from(origin), i64::from(extent));
    if len < 0 {
        start += len;
        len = -len;
    }
    let end = (start + len).min(limit);
    let start = start.clamp(0, (limit - 1).max(0));
    let len = (end - start).max(1);
    // Both values are bounded by `limit`, which fits in i32.
    (start as i32, len as i32)
}

/// Which text primitive an offset is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Fill,
    Stroke,
}

/// Deterministic origin offset for a text draw, within `±max_px` per axis.
pub fn text_offset(seed: &str, op: TextOp, font: &str, text: &str, max_px: f64) -> (f64, f64) {
    if max_px == 0.0 {
        return (0.0, 0.0);
    }
    let (kx, ky) = match op {
        TextOp::Fill => ("fx", "fy"),
        TextOp::Stroke => ("sx", "sy"),
    };
    let id = format!("{font}\u{241F}{text}");
    (
        stable_noise(seed, &format!("{kx}|{id}"), -max_px, max_px),
        stable_noise(seed, &format!("{ky}|{id}"), -max_px, max_px),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q256() {
        assert_eq!(q256(1.0), 1.0);
        assert_eq!(q256(0.1), 26.0 / 256.0);
        assert_eq!(q256(-0.5 / 256.0), 0.0);
        assert!(q256(f64::NAN).is_nan());
        assert_eq!(q256(q256(3.14159)), q256(3.14159));
    }

    #[test]
    fn test_draw_image_keeps_source_rect() {
        let args = DrawImageArgs::from_slice(&[0.3, 0.3, 5.0, 5.0, 1.001, 2.002, 3.003, 4.004]).unwrap();
        match args.quantized() {
            DrawImageArgs::Cropped { sx, dx, .. } => {
                assert_eq!(sx, 0.3);
                assert_eq!(dx, q256(1.001));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(DrawImageArgs::from_slice(&[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_region_clipping() {
        let r = Region::new(-5, -5, 20, 20).clipped(10, 10);
        assert_eq!(r, Region::new(0, 0, 10, 10));
        let r = Region::new(8, 9, 5, 5).clipped(10, 10);
        assert_eq!(r, Region::new(8, 9, 2, 1));
        let r = Region::new(12, 0, 5, 5).clipped(10, 10);
        assert_eq!(r, Region::new(9, 0, 1, 5));
        let inside = Region::new(1, 1, 2, 2);
        assert_eq!(inside.clipped(10, 10), inside);
    }

    #[test]
    fn test_region_clipping_huge_extents() {
        let r = Region::new(10, 0, i32::MAX, 1).clipped(100, 100);
        assert_eq!(r, Region::new(10, 0, 90, 1));
        let r = Region::new(i32::MAX, i32::MAX, i32::MAX, i32::MAX).clipped(100, 100);
        assert_eq!(r, Region::new(99, 99, 1, 1));
        let r = Region::new(i32::MIN, 0, i32::MAX, 1).clipped(100, 100);
        assert_eq!(r, Region::new(0, 0, 1, 1));
    }

    #[test]
    fn test_region_clipping_negative_extents() {
        // (8, 6) with -5 x -4 covers the same pixels as (3, 2) with 5 x 4.
        assert_eq!(Region::new(8, 6, -5, -4).clipped(10, 10), Region::new(3, 2, 5, 4));
        assert_eq!(Region::new(2, 0, -5, 3).clipped(10, 10), Region::new(0, 0, 2, 3));
        let r = Region::new(5, 5, i32::MIN, i32::MIN).clipped(10, 10);
        assert_eq!(r, Region::new(0, 0, 5, 5));
    }

    #[test]
    fn test_text_offset_stable_and_bounded() {
        let a = text_offset("abc123", TextOp::Fill, "16px sans-serif", "hello", 0.1);
        assert_eq!(a, text_offset("abc123", TextOp::Fill, "16px sans-serif", "hello", 0.1));
        assert!(a.0.abs() <= 0.1 && a.1.abs() <= 0.1);
        assert_ne!(a, text_offset("abc123", TextOp::Stroke, "16px sans-serif", "hello", 0.1));
        assert_eq!(text_offset("s", TextOp::Fill, "f", "t", 0.0), (0.0, 0.0));
    }
}
