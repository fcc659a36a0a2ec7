//! Sparse per-pixel colour noise.
//!
//! Each pixel's fate is a keyed sample of its absolute position within its
//! canvas, so re-reading an unchanged region yields the same bytes.

use crate::config::PixelNoiseConfig;
use crate::noise::image::{dpr_key, ImageBuffer};
use crate::rng::stable_noise;

/// Where a buffer came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelOrigin {
    /// Top-left of the buffer within the canvas.
    pub x: i32,
    pub y: i32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub dpr: f64,
}

fn base_key(img: &ImageBuffer, origin: &PixelOrigin) -> String {
    format!(
        "px|{}x{}|cnv@{}x{}@{}|dx:{},dy:{}",
        img.width(),
        img.height(),
        origin.canvas_width,
        origin.canvas_height,
        dpr_key(origin.dpr),
        origin.x,
        origin.y,
    )
}

#[inline]
fn apply_delta(v: u8, delta: f64) -> u8 {
    (f64::from(v) + delta).round().clamp(0.0, 255.0) as u8
}

/// Perturb RGB of a gated subset of pixels in place. Alpha is kept.
pub fn add_pixel_noise(seed: &str, img: &mut ImageBuffer, origin: &PixelOrigin, cfg: &PixelNoiseConfig) {
    if cfg.density <= 0.0 || cfg.strength <= 0.0 {
        return;
    }
    let base = base_key(img, origin);
    let s = cfg.strength;
    let (w, h) = (img.width(), img.height());
    for y in 0..h {
        for x in 0..w {
            let key = format!(
                "{base}|x:{},y:{}",
                origin.x + x as i32,
                origin.y + y as i32
            );
            if stable_noise(seed, &format!("{key}|gate"), 0.0, 1.0) > cfg.density {
                continue;
            }
            let mut px = img.pixel(x, y);
            if cfg.mono {
                let d = stable_noise(seed, &format!("{key}|mono"), -s, s);
                for c in px.iter_mut().take(3) {
                    *c = apply_delta(*c, d);
                }
            } else {
                for (c, ch) in px.iter_mut().take(3).zip(["r", "g", "b"]) {
                    let d = stable_noise(seed, &format!("{key}|{ch}"), -s, s);
                    *c = apply_delta(*c, d);
                }
            }
            img.set_pixel(x, y, px);
        }
    }
}
