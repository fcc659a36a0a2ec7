//! Deterministic noise service.
//!
//! Bundles the stream registry with the tuning tables and per-realm caches
//! that the canvas, WebGL and audio hooks draw on.

pub mod audio;
pub mod encode;
pub mod geometry;
pub mod image;
pub mod pixel;
pub mod png;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::config::{AudioNoiseConfig, PixelNoiseConfig, ResampleConfig, SpoofConfig};
use crate::error::Result;
use crate::rng::{Stream, StreamRegistry};

pub use audio::AnalyserParams;
pub use encode::{content_digest, content_signature, encode_key, Blob, EncodeCache};
pub use geometry::{q256, DrawImageArgs, RectArgs, Region, TextOp};
pub use image::{ImageBuffer, Jitter, JitterCache};
pub use pixel::PixelOrigin;

pub const STREAM_AUDIO: &str = "audio";
pub const STREAM_WEBGL: &str = "webgl";

/// Label for the resample applied before every encode.
pub const OP_ENCODE: &str = "encode";

#[derive(Debug)]
pub struct NoiseService {
    streams: StreamRegistry,
    resample: ResampleConfig,
    pixel: PixelNoiseConfig,
    audio: AudioNoiseConfig,
    dpr: Cell<f64>,
    epoch: Cell<u32>,
    jitter: RefCell<JitterCache>,
}

impl NoiseService {
    /// Fails when the configuration carries no seed.
    pub fn new(config: &SpoofConfig) -> Result<Self> {
        Ok(Self {
            streams: StreamRegistry::new(config.seed.clone())?,
            resample: config.resample.clone(),
            pixel: config.pixel_noise.clone(),
            audio: config.audio.clone(),
            dpr: Cell::new(config.device.device_pixel_ratio),
            epoch: Cell::new(0),
            jitter: RefCell::new(JitterCache::new()),
        })
    }

    pub fn seed(&self) -> Rc<str> {
        self.streams.seed()
    }

    /// Bumped whenever [`NoiseService::adopt`] changes the seed or dpr.
    /// Caches of noised output key on it.
    pub fn epoch(&self) -> u32 {
        self.epoch.get()
    }

    /// Follow another realm's seed and device pixel ratio. An empty seed
    /// or a non-positive dpr leaves that part unchanged. Returns whether
    /// anything changed.
    pub fn adopt(&self, seed: &str, dpr: Option<f64>) -> Result<bool> {
        let mut changed = false;
        if !seed.is_empty() && seed != &*self.seed() {
            self.streams.reseed(seed)?;
            changed = true;
        }
        if let Some(dpr) = dpr.filter(|v| v.is_finite() && *v > 0.0) {
            if dpr != self.dpr.get() {
                self.dpr.set(dpr);
                changed = true;
            }
        }
        if changed {
            self.jitter.borrow_mut().clear();
            self.epoch.set(self.epoch.get().wrapping_add(1));
        }
        Ok(changed)
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn stream(&self, name: &str) -> Stream {
        self.streams.use_stream(name)
    }

    pub fn dpr(&self) -> f64 {
        self.dpr.get()
    }

    pub fn resample_config(&self) -> &ResampleConfig {
        &self.resample
    }

    pub fn pixel_config(&self) -> &PixelNoiseConfig {
        &self.pixel
    }

    pub fn audio_config(&self) -> &AudioNoiseConfig {
        &self.audio
    }

    /// Default analyser bounds, used when a node does not report its own.
    pub fn analyser_defaults(&self) -> AnalyserParams {
        AnalyserParams::from_config(&self.audio)
    }

    pub fn jitter(&self, op: &str, width: u32, height: u32) -> Result<Jitter> {
        self.jitter
            .borrow_mut()
            .jitter(&self.seed(), op, width, height, self.dpr.get(), &self.resample)
    }

    /// Edge-aware resample of `img` under the jitter for `op`.
    pub fn resample(&self, img: &ImageBuffer, op: &str) -> Result<ImageBuffer> {
        let jitter = self.jitter(op, img.width(), img.height())?;
        Ok(image::resample_with_jitter(img, jitter, &self.resample))
    }

    /// Per-pixel colour noise, when enabled.
    pub fn pixel_noise(&self, img: &mut ImageBuffer, origin: &PixelOrigin) {
        if self.pixel.enabled {
            pixel::add_pixel_noise(&self.seed(), img, origin, &self.pixel);
        }
    }

    pub fn text_offset(&self, op: TextOp, font: &str, text: &str) -> (f64, f64) {
        geometry::text_offset(&self.seed(), op, font, text, self.resample.text_jitter_px)
    }

    pub fn stable(&self, key: &str, lo: f64, hi: f64) -> f64 {
        self.streams.stable(key, lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_requires_seed() {
        assert!(NoiseService::new(&SpoofConfig::default()).is_err());
        assert!(NoiseService::new(&SpoofConfig::with_seed("abc123")).is_ok());
    }

    #[test]
    fn test_resample_is_repeatable() {
        let svc = NoiseService::new(&SpoofConfig::with_seed("abc123")).unwrap();
        let mut img = ImageBuffer::filled(12, 12, [0, 0, 0, 255]);
        for i in 0..12 {
            img.set_pixel(i, i, [255, 255, 255, 255]);
        }
        let a = svc.resample(&img, OP_ENCODE).unwrap();
        let b = svc.resample(&img, OP_ENCODE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_adopt_follows_seed_and_dpr() {
        let svc = NoiseService::new(&SpoofConfig::with_seed("worker")).unwrap();
        let main = NoiseService::new(&SpoofConfig::with_seed("main")).unwrap();
        let mut img = ImageBuffer::filled(12, 12, [0, 0, 0, 255]);
        for i in 0..12 {
            img.set_pixel(i, 11 - i, [255, 255, 255, 255]);
        }
        let before = svc.jitter(OP_ENCODE, 12, 12).unwrap();
        assert_ne!(before, main.jitter(OP_ENCODE, 12, 12).unwrap());

        assert!(svc.adopt("main", None).unwrap());
        assert_eq!(svc.epoch(), 1);
        assert_eq!(&*svc.seed(), "main");
        assert_eq!(svc.jitter(OP_ENCODE, 12, 12).unwrap(), main.jitter(OP_ENCODE, 12, 12).unwrap());
        assert_eq!(svc.resample(&img, OP_ENCODE).unwrap(), main.resample(&img, OP_ENCODE).unwrap());

        assert!(!svc.adopt("", Some(f64::NAN)).unwrap());
        assert!(!svc.adopt("main", Some(main.dpr())).unwrap());
        assert_eq!(svc.epoch(), 1);

        assert!(svc.adopt("main", Some(2.0)).unwrap());
        assert_eq!(svc.dpr(), 2.0);
        assert_eq!(svc.epoch(), 2);
    }

    #[test]
    fn test_pixel_noise_respects_toggle() {
        let svc = NoiseService::new(&SpoofConfig::with_seed("abc123")).unwrap();
        let origin = PixelOrigin { x: 0, y: 0, canvas_width: 8, canvas_height: 8, dpr: 1.0 };
        let src = ImageBuffer::filled(8, 8, [50, 50, 50, 255]);
        let mut out = src.clone();
        svc.pixel_noise(&mut out, &origin);
        assert_eq!(out, src);
    }
}
