//! RGBA image buffers and the edge-aware sub-pixel resampler.
//!
//! Flat regions are left alone. Textured regions absorb a tiny translation
//! whose vector is a pure function of `(operation, size, dpr)`.

use std::collections::HashMap;
use std::f64::consts::PI;

use crate::config::ResampleConfig;
use crate::error::{Result, SpoofError};
use crate::rng::stable_noise;

/// Row-major, non-premultiplied RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ImageBuffer {
    /// Wrap raw pixels; `data.len()` must be `width * height * 4`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or(SpoofError::BufferSize { expected: usize::MAX, got: data.len() })?;
        if data.len() != expected {
            return Err(SpoofError::BufferSize { expected, got: data.len() });
        }
        Ok(Self { width, height, data })
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    /// Copy of the `w`×`h` block at `(x, y)`. Pixels outside the image
    /// read as transparent black.
    pub fn crop(&self, x: i32, y: i32, w: u32, h: u32) -> ImageBuffer {
        let mut out = ImageBuffer::filled(w, h, [0, 0, 0, 0]);
        for row in 0..h {
            for col in 0..w {
                let sx = x + col as i32;
                let sy = y + row as i32;
                if sx >= 0 && sy >= 0 && (sx as u32) < self.width && (sy as u32) < self.height {
                    out.set_pixel(col, row, self.pixel(sx as u32, sy as u32));
                }
            }
        }
        out
    }

    /// Paste `src` with its top-left corner at `(x, y)`, clipped to bounds.
    pub fn blit(&mut self, src: &ImageBuffer, x: i32, y: i32) {
        for row in 0..src.height {
            for col in 0..src.width {
                let dx = x + col as i32;
                let dy = y + row as i32;
                if dx >= 0 && dy >= 0 && (dx as u32) < self.width && (dy as u32) < self.height {
                    self.set_pixel(dx as u32, dy as u32, src.pixel(col, row));
                }
            }
        }
    }
}

/// Sub-pixel translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    pub dx: f64,
    pub dy: f64,
}

impl Jitter {
    pub fn magnitude(&self) -> f64 {
        self.dx.hypot(self.dy)
    }
}

/// `dpr` scaled to an integer so it can take part in string keys.
pub fn dpr_key(dpr: f64) -> i64 {
    (dpr * 1024.0).round() as i64
}

pub fn jitter_key(op: &str, width: u32, height: u32, dpr: f64) -> String {
    format!("{op}:{width}x{height}@{}", dpr_key(dpr))
}

/// Memoized jitter vectors.
///
/// Entries are derived from keyed samples, so the cache only saves work:
/// a cold lookup and a warm one return the same vector.
#[derive(Debug, Default)]
pub struct JitterCache {
    entries: HashMap<String, Jitter>,
}

impl JitterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn jitter(
        &mut self,
        seed: &str,
        op: &str,
        width: u32,
        height: u32,
        dpr: f64,
        cfg: &ResampleConfig,
    ) -> Result<Jitter> {
        if !dpr.is_finite() || dpr <= 0.0 {
            return Err(SpoofError::InvalidConfig(format!("dpr = {dpr}")));
        }
        let key = jitter_key(op, width, height, dpr);
        if let Some(j) = self.entries.get(&key) {
            return Ok(*j);
        }
        let base = 1.0 / (cfg.eps_base_px * dpr);
        let m = stable_noise(seed, &format!("{key}|m"), 0.0, 1.0);
        let a = stable_noise(seed, &format!("{key}|a"), 0.0, 1.0);
        let mag = base * (1.0 + cfg.jitter_factor * m);
        let angle = 2.0 * PI * a;
        let jitter = Jitter {
            dx: angle.cos() * mag,
            dy: angle.sin() * mag,
        };
        self.entries.insert(key, jitter);
        Ok(jitter)
    }
}

#[inline]
fn luminance(px: &[u8]) -> f64 {
    0.2126 * f64::from(px[0]) + 0.7152 * f64::from(px[1]) + 0.0722 * f64::from(px[2])
}

/// Per-pixel edge mass in [0, 1] from forward luminance differences.
pub fn edge_mask(img: &ImageBuffer, gain: f64) -> Vec<f64> {
    let (w, h) = (img.width as usize, img.height as usize);
    let lum: Vec<f64> = img.data.chunks_exact(4).map(luminance).collect();
    let mut mask = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let l = lum[i];
            let right = if x + 1 < w { lum[i + 1] } else { l };
            let down = if y + 1 < h { lum[i + w] } else { l };
            let m = ((l - right).abs() + (l - down).abs()) / 255.0 * gain;
            mask[i] = m.min(1.0);
        }
    }
    mask
}

/// 3×3 box blur; border pixels average only their in-bounds neighbours.
pub fn box_blur(mask: &[f64], width: usize, height: usize, passes: u32) -> Vec<f64> {
    let mut cur = mask.to_vec();
    for _ in 0..passes {
        let mut next = vec![0.0; cur.len()];
        for y in 0..height {
            for x in 0..width {
                let mut sum = 0.0;
                let mut count = 0u32;
                for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                        sum += cur[ny * width + nx];
                        count += 1;
                    }
                }
                next[y * width + x] = sum / f64::from(count);
            }
        }
        cur = next;
    }
    cur
}

/// Bilinear sample of channel `c` at a fractional position, clamped to
/// the image edge.
fn sample(img: &ImageBuffer, fx: f64, fy: f64, c: usize) -> f64 {
    let max_x = f64::from(img.width - 1);
    let max_y = f64::from(img.height - 1);
    let fx = fx.clamp(0.0, max_x);
    let fy = fy.clamp(0.0, max_y);
    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(img.width - 1);
    let y1 = (y0 + 1).min(img.height - 1);
    let tx = fx - f64::from(x0);
    let ty = fy - f64::from(y0);
    let at = |x: u32, y: u32| f64::from(img.data[img.offset(x, y) + c]);
    let top = at(x0, y0) * (1.0 - tx) + at(x1, y0) * tx;
    let bottom = at(x0, y1) * (1.0 - tx) + at(x1, y1) * tx;
    top * (1.0 - ty) + bottom * ty
}

/// Blend a translated copy into `img` weighted by the blurred edge mask.
///
/// Returns an unchanged copy when the mean edge mass is under the flatness
/// threshold. Alpha is never touched.
pub fn resample_with_jitter(img: &ImageBuffer, jitter: Jitter, cfg: &ResampleConfig) -> ImageBuffer {
    if img.width == 0 || img.height == 0 {
        return img.clone();
    }
    let (w, h) = (img.width as usize, img.height as usize);
    let raw = edge_mask(img, cfg.edge_gain);
    let mean = raw.iter().sum::<f64>() / raw.len() as f64;
    if mean < cfg.flat_mean_threshold {
        return img.clone();
    }
    let mask = box_blur(&raw, w, h, cfg.blur_passes);

    let mut out = img.clone();
    for y in 0..img.height {
        for x in 0..img.width {
            let m = mask[y as usize * w + x as usize];
            if m <= 0.0 {
                continue;
            }
            let sx = f64::from(x) - jitter.dx;
            let sy = f64::from(y) - jitter.dy;
            let base = img.offset(x, y);
            for c in 0..3 {
                let src = f64::from(img.data[base + c]);
                let dst = sample(img, sx, sy, c);
                let v = src + (dst - src) * m;
                out.data[base + c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagonal(size: u32) -> ImageBuffer {
        let mut img = ImageBuffer::filled(size, size, [0, 0, 0, 255]);
        for y in 0..size {
            for x in 0..size {
                if x > y {
                    img.set_pixel(x, y, [255, 0, 0, 255]);
                }
            }
        }
        img
    }

    #[test]
    fn test_buffer_shape_checked() {
        assert!(ImageBuffer::new(2, 2, vec![0; 16]).is_ok());
        assert_eq!(
            ImageBuffer::new(2, 2, vec![0; 15]).unwrap_err(),
            SpoofError::BufferSize { expected: 16, got: 15 }
        );
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let err = ImageBuffer::new(u32::MAX, u32::MAX, Vec::new()).unwrap_err();
        assert!(matches!(err, SpoofError::BufferSize { got: 0, .. }));
    }

    #[test]
    fn test_crop_and_blit() {
        let mut img = ImageBuffer::filled(4, 4, [10, 20, 30, 255]);
        let block = img.crop(3, 3, 2, 2);
        assert_eq!(block.pixel(0, 0), [10, 20, 30, 255]);
        assert_eq!(block.pixel(1, 1), [0, 0, 0, 0]);

        img.blit(&ImageBuffer::filled(2, 2, [1, 2, 3, 4]), -1, -1);
        assert_eq!(img.pixel(0, 0), [1, 2, 3, 4]);
        assert_eq!(img.pixel(1, 1), [10, 20, 30, 255]);
    }

    #[test]
    fn test_jitter_is_order_independent() {
        let cfg = ResampleConfig::default();
        let mut warm = JitterCache::new();
        let a = warm.jitter("abc123", "encode", 10, 10, 1.0, &cfg).unwrap();
        warm.jitter("abc123", "encode", 20, 20, 2.0, &cfg).unwrap();
        let again = warm.jitter("abc123", "encode", 10, 10, 1.0, &cfg).unwrap();
        assert_eq!(a, again);
        assert_eq!(warm.len(), 2);

        let mut cold = JitterCache::new();
        cold.jitter("abc123", "encode", 20, 20, 2.0, &cfg).unwrap();
        assert_eq!(cold.jitter("abc123", "encode", 10, 10, 1.0, &cfg).unwrap(), a);
    }

    #[test]
    fn test_jitter_magnitude_bounds() {
        let cfg = ResampleConfig::default();
        let mut cache = JitterCache::new();
        let j = cache.jitter("s", "encode", 64, 32, 1.0, &cfg).unwrap();
        let base = 1.0 / cfg.eps_base_px;
        assert!(j.magnitude() >= base - 1e-12);
        assert!(j.magnitude() <= base * (1.0 + cfg.jitter_factor) + 1e-12);
    }

    #[test]
    fn test_jitter_rejects_bad_dpr() {
        let mut cache = JitterCache::new();
        let cfg = ResampleConfig::default();
        assert!(cache.jitter("s", "encode", 1, 1, 0.0, &cfg).is_err());
        assert!(cache.jitter("s", "encode", 1, 1, f64::NAN, &cfg).is_err());
    }

    #[test]
    fn test_flat_image_untouched() {
        let img = ImageBuffer::filled(16, 16, [200, 10, 10, 255]);
        let jitter = Jitter { dx: 0.4, dy: -0.3 };
        let out = resample_with_jitter(&img, jitter, &ResampleConfig::default());
        assert_eq!(out, img);
    }

    #[test]
    fn test_edge_mask_flat_is_zero() {
        let img = ImageBuffer::filled(5, 5, [9, 9, 9, 255]);
        assert!(edge_mask(&img, 4.0).iter().all(|m| *m == 0.0));
    }

    #[test]
    fn test_box_blur_preserves_constant() {
        let mask = vec![0.5; 12];
        let blurred = box_blur(&mask, 4, 3, 2);
        assert!(blurred.iter().all(|m| (m - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_diagonal_edge_is_perturbed() {
        let img = diagonal(10);
        let out = resample_with_jitter(&img, Jitter { dx: 0.02, dy: 0.0 }, &ResampleConfig::default());
        assert_ne!(out, img);
        // Alpha stays put.
        assert!(out.data().chunks_exact(4).all(|px| px[3] == 255));
        // Far-from-edge corners stay put.
        assert_eq!(out.pixel(9, 0), img.pixel(9, 0));
        assert_eq!(out.pixel(0, 9), img.pixel(0, 9));
    }
}
