//! Delegating wrapper around a 2D rendering context.
//!
//! `SpoofedContext2d` exposes the same [`Context2d`] interface as the
//! context it wraps. Reads are clipped to the canvas, text measurement is
//! completed and memoised, and the registered hooks see every special-cased
//! call. The default hooks snap geometry to the 1/256 grid, offset text by
//! a keyed sub-pixel amount and, when enabled, add pixel noise to reads.

use std::rc::Rc;

use crate::context::metrics::{normalize_font, MetricsCache, TextMetrics};
use crate::context::{Context2d, PatchEnv, SurfaceHooks};
use crate::error::Result;
use crate::noise::{DrawImageArgs, ImageBuffer, NoiseService, PixelOrigin, RectArgs, Region, TextOp};
use crate::patch::{ArgHook, HookList, ResultHook};

/// Arguments of `fillText` / `strokeText`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextArgs {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub max_width: Option<f64>,
}

pub struct Canvas2dHooks<C: ?Sized> {
    pub get_image_data: HookList<ResultHook<C, Region, ImageBuffer>>,
    pub measure_text: HookList<ResultHook<C, String, TextMetrics>>,
    pub fill_text: HookList<ArgHook<C, TextArgs>>,
    pub stroke_text: HookList<ArgHook<C, TextArgs>>,
    pub fill_rect: HookList<ArgHook<C, RectArgs>>,
    pub draw_image: HookList<ArgHook<C, DrawImageArgs>>,
}

impl<C: ?Sized> Clone for Canvas2dHooks<C> {
    fn clone(&self) -> Self {
        Self {
            get_image_data: self.get_image_data.clone(),
            measure_text: self.measure_text.clone(),
            fill_text: self.fill_text.clone(),
            stroke_text: self.stroke_text.clone(),
            fill_rect: self.fill_rect.clone(),
            draw_image: self.draw_image.clone(),
        }
    }
}

impl<C: ?Sized> Canvas2dHooks<C> {
    pub fn new() -> Self {
        Self {
            get_image_data: HookList::new("CanvasRenderingContext2D.getImageData"),
            measure_text: HookList::new("CanvasRenderingContext2D.measureText"),
            fill_text: HookList::new("CanvasRenderingContext2D.fillText"),
            stroke_text: HookList::new("CanvasRenderingContext2D.strokeText"),
            fill_rect: HookList::new("CanvasRenderingContext2D.fillRect"),
            draw_image: HookList::new("CanvasRenderingContext2D.drawImage"),
        }
    }
}

impl<C: ?Sized> Default for Canvas2dHooks<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn text_hook<C: Context2d + ?Sized>(
    noise: Rc<NoiseService>,
    op: TextOp,
) -> impl Fn(&C, &TextArgs) -> Result<Option<TextArgs>> {
    move |ctx, args| {
        let font = normalize_font(&ctx.font());
        let (ox, oy) = noise.text_offset(op, &font, &args.text);
        Ok(Some(TextArgs { x: args.x + ox, y: args.y + oy, ..args.clone() }))
    }
}

impl<C: Context2d + ?Sized + 'static> SurfaceHooks for Canvas2dHooks<C> {
    fn with_defaults(env: &PatchEnv) -> Self {
        let hooks = Self::new();
        hooks.fill_rect.add(|_, rect| Ok(Some(rect.quantized())));
        hooks.draw_image.add(|_, args| Ok(Some(args.quantized())));
        hooks.fill_text.add(text_hook(Rc::clone(&env.noise), TextOp::Fill));
        hooks.stroke_text.add(text_hook(Rc::clone(&env.noise), TextOp::Stroke));

        if env.config.pixel_noise.enabled {
            let noise = Rc::clone(&env.noise);
            hooks.get_image_data.add(move |ctx, img, region| {
                let (canvas_width, canvas_height) = ctx.canvas_size();
                let origin = PixelOrigin {
                    x: region.x,
                    y: region.y,
                    canvas_width,
                    canvas_height,
                    dpr: noise.dpr(),
                };
                let mut out = img.clone();
                noise.pixel_noise(&mut out, &origin);
                Ok(Some(out))
            });
        }
        hooks
    }

    fn hook_count(&self) -> usize {
        self.get_image_data.len()
            + self.measure_text.len()
            + self.fill_text.len()
            + self.stroke_text.len()
            + self.fill_rect.len()
            + self.draw_image.len()
    }
}

/// A 2D context seen through the spoofing layer.
pub struct SpoofedContext2d<C> {
    inner: C,
    hooks: Canvas2dHooks<C>,
    metrics: MetricsCache,
    dpr: f64,
}

impl<C: Context2d + 'static> SpoofedContext2d<C> {
    pub fn new(inner: C, hooks: Canvas2dHooks<C>, dpr: f64) -> Self {
        Self {
            inner,
            hooks,
            metrics: MetricsCache::new(),
            dpr,
        }
    }

    /// The native context underneath.
    pub fn native(&self) -> &C {
        &self.inner
    }

    pub fn metrics_cache(&self) -> &MetricsCache {
        &self.metrics
    }
}

impl<C: Context2d + 'static> Context2d for SpoofedContext2d<C> {
    type ImageSource = C::ImageSource;

    fn canvas_size(&self) -> (u32, u32) {
        self.inner.canvas_size()
    }

    fn font(&self) -> String {
        self.inner.font()
    }

    fn get_image_data(&self, region: Region) -> Result<ImageBuffer> {
        let (w, h) = self.inner.canvas_size();
        let clipped = region.clipped(w, h);
        let img = self.inner.get_image_data(clipped)?;
        Ok(self.hooks.get_image_data.run(&self.inner, img, &clipped))
    }

    fn put_image_data(&self, img: &ImageBuffer, x: i32, y: i32) -> Result<()> {
        self.inner.put_image_data(img, x, y)
    }

    fn measure_text(&self, text: &str) -> Result<TextMetrics> {
        let font = normalize_font(&self.inner.font());
        let metrics = self
            .metrics
            .measure(&font, text, self.dpr, || self.inner.measure_text(text));
        Ok(self.hooks.measure_text.run(&self.inner, metrics, &text.to_string()))
    }

    fn fill_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        let args = TextArgs { text: text.to_string(), x, y, max_width };
        let args = self.hooks.fill_text.run(&self.inner, args);
        self.inner.fill_text(&args.text, args.x, args.y, args.max_width)
    }

    fn stroke_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        let args = TextArgs { text: text.to_string(), x, y, max_width };
        let args = self.hooks.stroke_text.run(&self.inner, args);
        self.inner.stroke_text(&args.text, args.x, args.y, args.max_width)
    }

    fn fill_rect(&self, rect: RectArgs) -> Result<()> {
        let rect = self.hooks.fill_rect.run(&self.inner, rect);
        self.inner.fill_rect(rect)
    }

    fn stroke_rect(&self, rect: RectArgs) -> Result<()> {
        self.inner.stroke_rect(rect.quantized())
    }

    fn clear_rect(&self, rect: RectArgs) -> Result<()> {
        self.inner.clear_rect(rect.quantized())
    }

    fn draw_image(&self, src: &Self::ImageSource, args: DrawImageArgs) -> Result<()> {
        let args = self.hooks.draw_image.run(&self.inner, args);
        self.inner.draw_image(src, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpoofConfig;
    use crate::error::SpoofError;
    use std::cell::RefCell;

    /// Records what reaches the native side.
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        metrics: Option<TextMetrics>,
    }

    impl Context2d for Recorder {
        type ImageSource = ();

        fn canvas_size(&self) -> (u32, u32) {
            (20, 10)
        }

        fn font(&self) -> String {
            "12px serif".into()
        }

        fn get_image_data(&self, r: Region) -> Result<ImageBuffer> {
            self.calls.borrow_mut().push(format!("get {} {} {} {}", r.x, r.y, r.width, r.height));
            Ok(ImageBuffer::filled(r.width as u32, r.height as u32, [90, 90, 90, 255]))
        }

        fn put_image_data(&self, _: &ImageBuffer, _: i32, _: i32) -> Result<()> {
            Ok(())
        }

        fn measure_text(&self, _: &str) -> Result<TextMetrics> {
            self.metrics.ok_or_else(|| SpoofError::host("no metrics"))
        }

        fn fill_text(&self, text: &str, x: f64, y: f64, _: Option<f64>) -> Result<()> {
            self.calls.borrow_mut().push(format!("fill {text} {x} {y}"));
            Ok(())
        }

        fn stroke_text(&self, _: &str, _: f64, _: f64, _: Option<f64>) -> Result<()> {
            Ok(())
        }

        fn fill_rect(&self, r: RectArgs) -> Result<()> {
            self.calls.borrow_mut().push(format!("rect {} {} {} {}", r.x, r.y, r.width, r.height));
            Ok(())
        }

        fn stroke_rect(&self, _: RectArgs) -> Result<()> {
            Ok(())
        }

        fn clear_rect(&self, _: RectArgs) -> Result<()> {
            Ok(())
        }

        fn draw_image(&self, _: &(), args: DrawImageArgs) -> Result<()> {
            self.calls.borrow_mut().push(format!("draw {:?}", args.to_vec()));
            Ok(())
        }
    }

    fn env(pixel_noise: bool) -> PatchEnv {
        let mut cfg = SpoofConfig::with_seed("abc123");
        cfg.pixel_noise.enabled = pixel_noise;
        cfg.pixel_noise.density = 1.0;
        cfg.pixel_noise.strength = 3.0;
        PatchEnv::new(cfg).unwrap()
    }

    fn spoofed(pixel_noise: bool) -> SpoofedContext2d<Recorder> {
        SpoofedContext2d::new(Recorder::default(), Canvas2dHooks::with_defaults(&env(pixel_noise)), 1.0)
    }

    #[test]
    fn test_reads_are_clipped() {
        let ctx = spoofed(false);
        let img = ctx.get_image_data(Region::new(-5, 4, 100, 100)).unwrap();
        assert_eq!((img.width(), img.height()), (20, 6));
        assert_eq!(ctx.native().calls.borrow()[0], "get 0 4 20 6");
    }

    #[test]
    fn test_geometry_is_quantized() {
        let ctx = spoofed(false);
        ctx.fill_rect(RectArgs { x: 0.1, y: 1.0, width: 2.001, height: 3.0 }).unwrap();
        ctx.draw_image(&(), DrawImageArgs::At { dx: 0.3, dy: 0.0 }).unwrap();
        let calls = ctx.native().calls.borrow();
        assert_eq!(calls[0], "rect 0.1015625 1 2 3");
        assert_eq!(calls[1], "draw [0.30078125, 0.0]");
    }

    #[test]
    fn test_text_offset_is_stable_and_small() {
        let ctx = spoofed(false);
        ctx.fill_text("hello", 10.0, 10.0, None).unwrap();
        ctx.fill_text("hello", 10.0, 10.0, None).unwrap();
        let calls = ctx.native().calls.borrow();
        assert_eq!(calls[0], calls[1]);
        let parts: Vec<f64> = calls[0].split(' ').skip(2).map(|v| v.parse().unwrap()).collect();
        assert!((parts[0] - 10.0).abs() <= 0.1);
        assert!((parts[1] - 10.0).abs() <= 0.1);
    }

    #[test]
    fn test_measure_text_completes_and_caches() {
        let mut inner = Recorder::default();
        inner.metrics = Some(TextMetrics { width: Some(33.0), ..Default::default() });
        let ctx = SpoofedContext2d::new(inner, Canvas2dHooks::with_defaults(&env(false)), 1.0);
        let m = ctx.measure_text("abc").unwrap();
        assert_eq!(m.width, Some(33.0));
        assert_eq!(m.actual_bounding_box_ascent, Some(0.8 * 12.0));
        assert!(m.is_complete());
        assert_eq!(ctx.measure_text("abc").unwrap(), m);
        assert_eq!(ctx.metrics_cache().len(), 1);
    }

    #[test]
    fn test_pixel_noise_hook_is_repeatable() {
        let ctx = spoofed(true);
        let a = ctx.get_image_data(Region::new(0, 0, 8, 8)).unwrap();
        let b = ctx.get_image_data(Region::new(0, 0, 8, 8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, ImageBuffer::filled(8, 8, [90, 90, 90, 255]));
    }
}
