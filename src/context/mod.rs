//! Context-proxy layer.
//!
//! Host objects are reached through the capability traits defined here
//! and in the submodules. Each surface has a hook registry type
//! implementing [`SurfaceHooks`]; its default hooks are the spoofing
//! behaviour for that surface, and sibling modules may register more.

pub mod audio;
pub mod canvas;
pub mod metrics;
pub mod proxy2d;
pub mod webgl;
pub mod webgpu;

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::SpoofConfig;
use crate::error::Result;
use crate::noise::{DrawImageArgs, ImageBuffer, NoiseService, RectArgs, Region};

pub use audio::{AnalyserHooks, AnalyserNodeLike, AnalyserPrototype, OfflineHooks, RenderedBuffer};
pub use canvas::{CanvasElement, CanvasHooks, CanvasPrototype, CanvasState, ContextKind, EncodeArgs, EncodePipeline, ToBlobArgs};
pub use metrics::{MetricsCache, TextMetrics};
pub use proxy2d::{Canvas2dHooks, SpoofedContext2d, TextArgs};
pub use webgl::{GlReceiver, GlValue, WebGlHooks, WebGlPrototype};
pub use webgpu::{AdapterInfo, GpuAdapter, MaskedAdapter, MaskedFeatures, MaskedLimits};

/// A caller-supplied buffer the native call writes into.
pub type SharedBuf<T> = Rc<RefCell<Vec<T>>>;

pub fn shared_buf<T>(data: Vec<T>) -> SharedBuf<T> {
    Rc::new(RefCell::new(data))
}

/// What default hooks are built from.
#[derive(Debug, Clone)]
pub struct PatchEnv {
    pub noise: Rc<NoiseService>,
    pub config: Rc<SpoofConfig>,
}

impl PatchEnv {
    pub fn new(config: SpoofConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            noise: Rc::new(NoiseService::new(&config)?),
            config: Rc::new(config),
        })
    }
}

/// A per-surface hook registry.
pub trait SurfaceHooks: Clone + 'static {
    /// Fresh registry with the built-in spoofing hooks registered.
    fn with_defaults(env: &PatchEnv) -> Self;

    /// Total number of registered hooks.
    fn hook_count(&self) -> usize;
}

/// The 2D rendering context operations the proxy special-cases. Everything
/// else stays on the native object.
pub trait Context2d {
    /// Whatever `drawImage` accepts as a source.
    type ImageSource: ?Sized;

    fn canvas_size(&self) -> (u32, u32);
    fn font(&self) -> String;
    fn get_image_data(&self, region: Region) -> Result<ImageBuffer>;
    fn put_image_data(&self, img: &ImageBuffer, x: i32, y: i32) -> Result<()>;
    fn measure_text(&self, text: &str) -> Result<TextMetrics>;
    fn fill_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()>;
    fn stroke_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()>;
    fn fill_rect(&self, rect: RectArgs) -> Result<()>;
    fn stroke_rect(&self, rect: RectArgs) -> Result<()>;
    fn clear_rect(&self, rect: RectArgs) -> Result<()>;
    fn draw_image(&self, src: &Self::ImageSource, args: DrawImageArgs) -> Result<()>;
}

impl<C: Context2d + ?Sized> Context2d for Rc<C> {
    type ImageSource = C::ImageSource;

    fn canvas_size(&self) -> (u32, u32) {
        (**self).canvas_size()
    }

    fn font(&self) -> String {
        (**self).font()
    }

    fn get_image_data(&self, region: Region) -> Result<ImageBuffer> {
        (**self).get_image_data(region)
    }

    fn put_image_data(&self, img: &ImageBuffer, x: i32, y: i32) -> Result<()> {
        (**self).put_image_data(img, x, y)
    }

    fn measure_text(&self, text: &str) -> Result<TextMetrics> {
        (**self).measure_text(text)
    }

    fn fill_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        (**self).fill_text(text, x, y, max_width)
    }

    fn stroke_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        (**self).stroke_text(text, x, y, max_width)
    }

    fn fill_rect(&self, rect: RectArgs) -> Result<()> {
        (**self).fill_rect(rect)
    }

    fn stroke_rect(&self, rect: RectArgs) -> Result<()> {
        (**self).stroke_rect(rect)
    }

    fn clear_rect(&self, rect: RectArgs) -> Result<()> {
        (**self).clear_rect(rect)
    }

    fn draw_image(&self, src: &Self::ImageSource, args: DrawImageArgs) -> Result<()> {
        (**self).draw_image(src, args)
    }
}
