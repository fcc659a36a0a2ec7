//! Software host.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};

use crate::context::audio::{apply_analyser_patches, apply_offline_patches, OfflinePrototype};
use crate::context::canvas::{apply_canvas_patches, DEFAULT_MIME};
use crate::context::metrics::font_px;
use crate::context::webgl::{
    apply_webgl_patches, PrecisionFormat, ReadPixelsArgs, ShaderKind, ShaderSourceArgs, RENDERER,
    UNMASKED_RENDERER_WEBGL, UNMASKED_VENDOR_WEBGL, VENDOR,
};
use crate::context::webgpu::{DeviceDescriptor, GpuDevice, NativeAdapterInfo, WebGpuHooks};
use crate::context::{
    AnalyserHooks, AnalyserNodeLike, AnalyserPrototype, Canvas2dHooks, CanvasElement, CanvasHooks, CanvasPrototype,
    CanvasState, Context2d, ContextKind, EncodeArgs, GlReceiver, GlValue, GpuAdapter, MaskedAdapter, OfflineHooks,
    RenderedBuffer, SharedBuf, SpoofedContext2d, TextMetrics, ToBlobArgs, WebGlHooks, WebGlPrototype,
};
use crate::error::{Result, SpoofError};
use crate::noise::{png, AnalyserParams, Blob, DrawImageArgs, ImageBuffer, RectArgs, Region};
use crate::patch::{AsyncReturn, GuardFlags, NativeFn, Receiver};
use crate::runtime::SpoofRuntime;

/// A 2D context as the software canvas hands it out.
pub type Dyn2d = Rc<dyn Context2d<ImageSource = ImageBuffer>>;

type Pixels = Rc<RefCell<ImageBuffer>>;

/// Advance per glyph, in font px.
const GLYPH_ADVANCE: f64 = 0.55;

pub const MAX_TEXTURE_SIZE: u32 = 0x0D33;
pub const HIGH_FLOAT: u32 = 0x8DF2;
pub const HIGH_INT: u32 = 0x8DF5;

// ---------------------------------------------------------------------------
// Raster
// ---------------------------------------------------------------------------

fn blend_over(dst: [u8; 4], src: [u8; 4], coverage: f64) -> [u8; 4] {
    let sa = f64::from(src[3]) / 255.0 * coverage;
    if sa <= 0.0 {
        return dst;
    }
    let da = f64::from(dst[3]) / 255.0;
    let oa = sa + da * (1.0 - sa);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (f64::from(src[c]) * sa + f64::from(dst[c]) * da * (1.0 - sa)) / oa;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (oa * 255.0).round().clamp(0.0, 255.0) as u8;
    out
}

/// Fill an axis-aligned area with per-pixel coverage, so sub-pixel
/// positions show up in the output.
fn fill_area(img: &mut ImageBuffer, x0: f64, y0: f64, x1: f64, y1: f64, color: [u8; 4]) {
    let (x0, x1) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
    let (y0, y1) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
    let x0 = x0.max(0.0);
    let y0 = y0.max(0.0);
    let x1 = x1.min(f64::from(img.width()));
    let y1 = y1.min(f64::from(img.height()));
    if !(x0 < x1 && y0 < y1) {
        return;
    }
    for py in (y0.floor() as u32)..(y1.ceil() as u32) {
        let cy = (y1.min(f64::from(py) + 1.0) - y0.max(f64::from(py))).max(0.0);
        for px in (x0.floor() as u32)..(x1.ceil() as u32) {
            let cx = (x1.min(f64::from(px) + 1.0) - x0.max(f64::from(px))).max(0.0);
            let cov = cx * cy;
            if cov > 0.0 {
                let d = img.pixel(px, py);
                img.set_pixel(px, py, blend_over(d, color, cov));
            }
        }
    }
}

/// One-pixel outline centred on the rectangle edge.
fn stroke_area(img: &mut ImageBuffer, r: RectArgs, color: [u8; 4]) {
    let h = 0.5;
    let (x1, y1) = (r.x + r.width, r.y + r.height);
    fill_area(img, r.x - h, r.y - h, x1 + h, r.y + h, color);
    fill_area(img, r.x - h, y1 - h, x1 + h, y1 + h, color);
    fill_area(img, r.x - h, r.y + h, r.x + h, y1 - h, color);
    fill_area(img, x1 - h, r.y + h, x1 + h, y1 - h, color);
}

/// Box per visible glyph: `(x0, y0, x1, y1)`.
fn glyph_boxes(font: &str, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Vec<(f64, f64, f64, f64)> {
    let px = font_px(font);
    let n = text.chars().count();
    let mut adv = GLYPH_ADVANCE * px;
    if let Some(mw) = max_width.filter(|m| m.is_finite() && *m > 0.0) {
        if n > 0 && adv * n as f64 > mw {
            adv = mw / n as f64;
        }
    }
    text.chars()
        .enumerate()
        .filter(|(_, c)| !c.is_whitespace())
        .map(|(i, c)| {
            let height = px * (0.45 + f64::from(u32::from(c) % 5) * 0.07);
            let x0 = x + i as f64 * adv + 0.1 * adv;
            (x0, y - height, x0 + 0.75 * adv, y)
        })
        .collect()
}

/// A raster 2D context over a canvas's pixel store.
pub struct SoftwareContext2d {
    pixels: Pixels,
    font: RefCell<String>,
    fill_style: Cell<[u8; 4]>,
    stroke_style: Cell<[u8; 4]>,
}

impl SoftwareContext2d {
    fn new(pixels: Pixels) -> Self {
        Self {
            pixels,
            font: RefCell::new("10px sans-serif".to_string()),
            fill_style: Cell::new([0, 0, 0, 255]),
            stroke_style: Cell::new([0, 0, 0, 255]),
        }
    }

    pub fn set_font(&self, font: &str) {
        *self.font.borrow_mut() = font.to_string();
    }

    pub fn set_fill_style(&self, rgba: [u8; 4]) {
        self.fill_style.set(rgba);
    }

    pub fn set_stroke_style(&self, rgba: [u8; 4]) {
        self.stroke_style.set(rgba);
    }
}

impl Context2d for SoftwareContext2d {
    type ImageSource = ImageBuffer;

    fn canvas_size(&self) -> (u32, u32) {
        let img = self.pixels.borrow();
        (img.width(), img.height())
    }

    fn font(&self) -> String {
        self.font.borrow().clone()
    }

    fn get_image_data(&self, region: Region) -> Result<ImageBuffer> {
        if region.width <= 0 || region.height <= 0 {
            return Err(SpoofError::InvalidImage(format!(
                "getImageData source width/height is 0 ({}x{})",
                region.width, region.height
            )));
        }
        Ok(self
            .pixels
            .borrow()
            .crop(region.x, region.y, region.width as u32, region.height as u32))
    }

    fn put_image_data(&self, img: &ImageBuffer, x: i32, y: i32) -> Result<()> {
        self.pixels.borrow_mut().blit(img, x, y);
        Ok(())
    }

    /// Reports the advance width only, like older engines.
    fn measure_text(&self, text: &str) -> Result<TextMetrics> {
        let px = font_px(&self.font.borrow());
        Ok(TextMetrics {
            width: Some(GLYPH_ADVANCE * px * text.chars().count() as f64),
            ..Default::default()
        })
    }

    fn fill_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        let color = self.fill_style.get();
        let mut img = self.pixels.borrow_mut();
        for (x0, y0, x1, y1) in glyph_boxes(&self.font.borrow(), text, x, y, max_width) {
            fill_area(&mut img, x0, y0, x1, y1, color);
        }
        Ok(())
    }

    fn stroke_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        let color = self.stroke_style.get();
        let mut img = self.pixels.borrow_mut();
        for (x0, y0, x1, y1) in glyph_boxes(&self.font.borrow(), text, x, y, max_width) {
            let rect = RectArgs { x: x0, y: y0, width: x1 - x0, height: y1 - y0 };
            stroke_area(&mut img, rect, color);
        }
        Ok(())
    }

    fn fill_rect(&self, rect: RectArgs) -> Result<()> {
        let color = self.fill_style.get();
        fill_area(
            &mut self.pixels.borrow_mut(),
            rect.x,
            rect.y,
            rect.x + rect.width,
            rect.y + rect.height,
            color,
        );
        Ok(())
    }

    fn stroke_rect(&self, rect: RectArgs) -> Result<()> {
        stroke_area(&mut self.pixels.borrow_mut(), rect, self.stroke_style.get());
        Ok(())
    }

    fn clear_rect(&self, rect: RectArgs) -> Result<()> {
        let mut img = self.pixels.borrow_mut();
        let (w, h) = (f64::from(img.width()), f64::from(img.height()));
        let x0 = rect.x.min(rect.x + rect.width).round().clamp(0.0, w) as u32;
        let x1 = rect.x.max(rect.x + rect.width).round().clamp(0.0, w) as u32;
        let y0 = rect.y.min(rect.y + rect.height).round().clamp(0.0, h) as u32;
        let y1 = rect.y.max(rect.y + rect.height).round().clamp(0.0, h) as u32;
        for y in y0..y1 {
            for x in x0..x1 {
                img.set_pixel(x, y, [0, 0, 0, 0]);
            }
        }
        Ok(())
    }

    /// Nearest-neighbour sampling at destination pixel centres.
    fn draw_image(&self, src: &ImageBuffer, args: DrawImageArgs) -> Result<()> {
        let (iw, ih) = (f64::from(src.width()), f64::from(src.height()));
        let (sx, sy, sw, sh, dx, dy, dw, dh) = match args {
            DrawImageArgs::At { dx, dy } => (0.0, 0.0, iw, ih, dx, dy, iw, ih),
            DrawImageArgs::Scaled { dx, dy, dw, dh } => (0.0, 0.0, iw, ih, dx, dy, dw, dh),
            DrawImageArgs::Cropped { sx, sy, sw, sh, dx, dy, dw, dh } => (sx, sy, sw, sh, dx, dy, dw, dh),
        };
        if !(dw > 0.0 && dh > 0.0 && sw > 0.0 && sh > 0.0) {
            return Ok(());
        }
        let mut img = self.pixels.borrow_mut();
        let (cw, ch) = (f64::from(img.width()), f64::from(img.height()));
        let x_end = (dx + dw).min(cw).max(0.0).ceil() as u32;
        let y_end = (dy + dh).min(ch).max(0.0).ceil() as u32;
        for py in (dy.max(0.0).floor() as u32)..y_end {
            let cy = f64::from(py) + 0.5;
            if cy < dy || cy >= dy + dh {
                continue;
            }
            let v = (sy + (cy - dy) / dh * sh).floor();
            for px in (dx.max(0.0).floor() as u32)..x_end {
                let cx = f64::from(px) + 0.5;
                if cx < dx || cx >= dx + dw {
                    continue;
                }
                let u = (sx + (cx - dx) / dw * sw).floor();
                if u < 0.0 || v < 0.0 || u >= iw || v >= ih {
                    continue;
                }
                let s = src.pixel(u as u32, v as u32);
                let d = img.pixel(px, py);
                img.set_pixel(px, py, blend_over(d, s, 1.0));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// What `getContext` hands out.
#[derive(Clone)]
pub enum SoftwareContext {
    TwoD(Dyn2d),
    WebGl(Rc<SoftwareGl>),
}

impl SoftwareContext {
    pub fn as_2d(&self) -> Option<&Dyn2d> {
        match self {
            SoftwareContext::TwoD(ctx) => Some(ctx),
            SoftwareContext::WebGl(_) => None,
        }
    }

    pub fn as_webgl(&self) -> Option<&Rc<SoftwareGl>> {
        match self {
            SoftwareContext::WebGl(gl) => Some(gl),
            SoftwareContext::TwoD(_) => None,
        }
    }
}

struct CanvasInner {
    flags: GuardFlags,
    pixels: Pixels,
    state: Rc<CanvasState>,
    native_2d: RefCell<Option<Rc<SoftwareContext2d>>>,
    native_gl: RefCell<Option<Rc<SoftwareGl>>>,
    encodes: Cell<u32>,
}

/// A canvas element backed by an in-memory RGBA buffer.
#[derive(Clone)]
pub struct SoftwareCanvas(Rc<CanvasInner>);

impl SoftwareCanvas {
    /// Transparent black canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_image(ImageBuffer::filled(width, height, [0, 0, 0, 0]))
    }

    pub fn from_image(img: ImageBuffer) -> Self {
        SoftwareCanvas(Rc::new(CanvasInner {
            flags: GuardFlags::new(),
            pixels: Rc::new(RefCell::new(img)),
            state: Rc::new(CanvasState::new()),
            native_2d: RefCell::new(None),
            native_gl: RefCell::new(None),
            encodes: Cell::new(0),
        }))
    }

    /// Copy of the backing store.
    pub fn pixels(&self) -> ImageBuffer {
        self.0.pixels.borrow().clone()
    }

    /// How many times the native encoder ran.
    pub fn native_encodes(&self) -> u32 {
        self.0.encodes.get()
    }

    /// The unwrapped 2D context, for drawing test fixtures.
    pub fn native_2d(&self) -> Rc<SoftwareContext2d> {
        let mut slot = self.0.native_2d.borrow_mut();
        let ctx = slot.get_or_insert_with(|| Rc::new(SoftwareContext2d::new(Rc::clone(&self.0.pixels))));
        Rc::clone(ctx)
    }

    fn native_gl(&self) -> Rc<SoftwareGl> {
        let mut slot = self.0.native_gl.borrow_mut();
        let gl = slot.get_or_insert_with(|| Rc::new(SoftwareGl::new(self.pixels())));
        Rc::clone(gl)
    }

    fn native_context(&self, kind: &ContextKind) -> Option<SoftwareContext> {
        match kind {
            ContextKind::TwoD => {
                let ctx: Dyn2d = self.native_2d();
                Some(SoftwareContext::TwoD(ctx))
            }
            ContextKind::WebGl | ContextKind::WebGl2 => Some(SoftwareContext::WebGl(self.native_gl())),
            _ => None,
        }
    }
}

impl Receiver for SoftwareCanvas {
    fn flag_is_set(&self, flag: &str) -> bool {
        self.0.flags.contains(flag)
    }

    fn set_flag(&self, flag: &str, on: bool) {
        self.0.flags.set(flag, on)
    }
}

impl CanvasElement for SoftwareCanvas {
    type Context = SoftwareContext;

    fn width(&self) -> u32 {
        self.0.pixels.borrow().width()
    }

    fn height(&self) -> u32 {
        self.0.pixels.borrow().height()
    }

    fn read_pixels(&self) -> Result<ImageBuffer> {
        Ok(self.pixels())
    }

    /// Only PNG is implemented; other types fall back to it, as browsers do
    /// for types they cannot encode.
    fn encode_pixels(&self, img: &ImageBuffer, _mime: &str, _quality: Option<f64>) -> Result<Blob> {
        self.0.encodes.set(self.0.encodes.get() + 1);
        Ok(Blob::new(DEFAULT_MIME, png::encode_rgba(img)))
    }

    fn state(&self) -> Rc<CanvasState> {
        Rc::clone(&self.0.state)
    }
}

fn native_encode(c: &SoftwareCanvas, args: &EncodeArgs) -> Result<Blob> {
    c.encode_pixels(&c.read_pixels()?, &args.mime, args.quality)
}

pub fn canvas_prototype() -> CanvasPrototype<SoftwareCanvas> {
    CanvasPrototype {
        to_data_url: Some(NativeFn::new("toDataURL", |c: &SoftwareCanvas, args: EncodeArgs| {
            Ok(native_encode(c, &args)?.to_data_url())
        })),
        to_blob: Some(NativeFn::new("toBlob", |c: &SoftwareCanvas, args: ToBlobArgs| {
            let blob = native_encode(c, &args.encode)?;
            Ok(match args.callback {
                Some(cb) => {
                    cb(Some(blob));
                    AsyncReturn::Dispatched
                }
                None => AsyncReturn::Pending(async move { Ok::<Blob, SpoofError>(blob) }.boxed_local()),
            })
        })),
        convert_to_blob: Some(NativeFn::new("convertToBlob", |c: &SoftwareCanvas, args: EncodeArgs| {
            let blob = native_encode(c, &args)?;
            Ok(AsyncReturn::Pending(async move { Ok::<Blob, SpoofError>(blob) }.boxed_local()))
        })),
        get_context: Some(NativeFn::new("getContext", |c: &SoftwareCanvas, kind: ContextKind| {
            Ok(c.native_context(&kind))
        })),
    }
}

// ---------------------------------------------------------------------------
// WebGL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SoftwareGlValue {
    Null,
    Str(String),
    Num(f64),
    Extension(String),
}

impl GlValue for SoftwareGlValue {
    fn null() -> Self {
        SoftwareGlValue::Null
    }

    fn string(s: &str) -> Self {
        SoftwareGlValue::Str(s.to_string())
    }

    fn number(v: f64) -> Self {
        SoftwareGlValue::Num(v)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            SoftwareGlValue::Num(v) => Some(*v),
            _ => None,
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, SoftwareGlValue::Null)
    }
}

/// Extensions the software GL claims, a few of them off any whitelist.
pub const SOFTWARE_GL_EXTENSIONS: &[&str] = &[
    "ANGLE_instanced_arrays",
    "EXT_blend_minmax",
    "EXT_disjoint_timer_query",
    "KHR_parallel_shader_compile",
    "OES_texture_float",
    "WEBGL_debug_renderer_info",
    "WEBGL_multi_draw",
];

/// A WebGL context with a fixed framebuffer and a shader/uniform store.
pub struct SoftwareGl {
    flags: GuardFlags,
    framebuffer: RefCell<ImageBuffer>,
    shaders: RefCell<HashMap<u32, (ShaderKind, String)>>,
    uniforms: RefCell<HashMap<u32, f64>>,
    next_handle: Cell<u32>,
}

impl SoftwareGl {
    pub fn new(framebuffer: ImageBuffer) -> Self {
        Self {
            flags: GuardFlags::new(),
            framebuffer: RefCell::new(framebuffer),
            shaders: RefCell::new(HashMap::new()),
            uniforms: RefCell::new(HashMap::new()),
            next_handle: Cell::new(1),
        }
    }

    fn handle(&self) -> u32 {
        let h = self.next_handle.get();
        self.next_handle.set(h + 1);
        h
    }

    pub fn create_shader(&self, kind: ShaderKind) -> u32 {
        let h = self.handle();
        self.shaders.borrow_mut().insert(h, (kind, String::new()));
        h
    }

    /// Source as the driver received it.
    pub fn shader_source_text(&self, shader: u32) -> Option<String> {
        self.shaders.borrow().get(&shader).map(|(_, s)| s.clone())
    }

    /// A uniform location holding `value`.
    pub fn uniform(&self, value: f64) -> u32 {
        let h = self.handle();
        self.uniforms.borrow_mut().insert(h, value);
        h
    }

    pub fn set_framebuffer(&self, img: ImageBuffer) {
        *self.framebuffer.borrow_mut() = img;
    }
}

impl Receiver for SoftwareGl {
    fn flag_is_set(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    fn set_flag(&self, flag: &str, on: bool) {
        self.flags.set(flag, on)
    }
}

impl GlReceiver for SoftwareGl {
    type Value = SoftwareGlValue;
    type Handle = u32;

    fn shader_kind(&self, shader: &u32) -> Option<ShaderKind> {
        self.shaders.borrow().get(shader).map(|(k, _)| *k)
    }
}

pub fn webgl_prototype() -> WebGlPrototype<SoftwareGl> {
    type V = SoftwareGlValue;
    WebGlPrototype {
        get_parameter: Some(NativeFn::new("getParameter", |_: &SoftwareGl, pname: u32| {
            Ok(match pname {
                VENDOR | RENDERER => V::Str("Mozilla".into()),
                UNMASKED_VENDOR_WEBGL => V::Str("NVIDIA Corporation".into()),
                UNMASKED_RENDERER_WEBGL => V::Str("NVIDIA GeForce RTX 3080/PCIe/SSE2".into()),
                MAX_TEXTURE_SIZE => V::Num(16384.0),
                _ => V::Null,
            })
        })),
        get_supported_extensions: Some(NativeFn::new("getSupportedExtensions", |_: &SoftwareGl, _: ()| {
            Ok(Some(SOFTWARE_GL_EXTENSIONS.iter().map(|s| s.to_string()).collect()))
        })),
        get_extension: Some(NativeFn::new("getExtension", |_: &SoftwareGl, name: String| {
            Ok(if SOFTWARE_GL_EXTENSIONS.contains(&name.as_str()) {
                V::Extension(name)
            } else {
                V::Null
            })
        })),
        read_pixels: Some(NativeFn::new("readPixels", |gl: &SoftwareGl, args: ReadPixelsArgs| {
            let Some(buf) = args.pixels else {
                return Err(SpoofError::host("readPixels: no destination buffer"));
            };
            if args.width <= 0 || args.height <= 0 {
                return Ok(());
            }
            let block = gl
                .framebuffer
                .borrow()
                .crop(args.x, args.y, args.width as u32, args.height as u32);
            let mut dst = buf.borrow_mut();
            let n = dst.len().min(block.data().len());
            dst[..n].copy_from_slice(&block.data()[..n]);
            Ok(())
        })),
        get_shader_precision_format: Some(NativeFn::new(
            "getShaderPrecisionFormat",
            |_: &SoftwareGl, (_, precision): (u32, u32)| {
                Ok(match precision {
                    0x8DF0..=HIGH_FLOAT => Some(PrecisionFormat { range_min: 127, range_max: 127, precision: 23 }),
                    0x8DF3..=HIGH_INT => Some(PrecisionFormat { range_min: 31, range_max: 30, precision: 0 }),
                    _ => None,
                })
            },
        )),
        shader_source: Some(NativeFn::new("shaderSource", |gl: &SoftwareGl, args: ShaderSourceArgs<u32>| {
            match gl.shaders.borrow_mut().get_mut(&args.shader) {
                Some(entry) => {
                    entry.1 = args.source;
                    Ok(())
                }
                None => Err(SpoofError::host("shaderSource: unknown shader")),
            }
        })),
        get_uniform: Some(NativeFn::new("getUniform", |gl: &SoftwareGl, (_, location): (u32, u32)| {
            Ok(gl
                .uniforms
                .borrow()
                .get(&location)
                .map_or(V::Null, |v| V::Num(*v)))
        })),
    }
}

// ---------------------------------------------------------------------------
// WebGPU
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SoftwareGpuDevice {
    pub features: Vec<String>,
    pub limits: Vec<(String, f64)>,
    pub label: String,
}

impl GpuDevice for SoftwareGpuDevice {
    fn features(&self) -> Vec<String> {
        self.features.clone()
    }

    fn limits(&self) -> Vec<(String, f64)> {
        self.limits.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SoftwareGpuAdapter {
    pub features: Vec<String>,
    pub limits: Vec<(String, f64)>,
    pub info: NativeAdapterInfo,
}

impl Default for SoftwareGpuAdapter {
    fn default() -> Self {
        let features = [
            "texture-compression-bc",
            "shader-f16",
            "timestamp-query",
            "subgroups",
            "chromium-experimental-timestamp-query-inside-passes",
        ];
        let limits = [
            ("maxTextureDimension2D", 16384.0),
            ("maxBindGroups", 4.0),
            ("maxComputeInvocationsPerWorkgroup", 1024.0),
            ("maxSubgroupSize", 128.0),
            ("maxImmediateSize", 64.0),
        ];
        Self {
            features: features.iter().map(|s| s.to_string()).collect(),
            limits: limits.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            info: NativeAdapterInfo {
                vendor: Some("nvidia".into()),
                architecture: Some("ampere".into()),
                device: Some("0x2206".into()),
                description: Some("NVIDIA GeForce RTX 3080".into()),
                adapter_type: Some("discrete GPU".into()),
                driver: Some("31.0.15.5222".into()),
                backend: Some("D3D12".into()),
                subgroup_min_size: Some(32),
                subgroup_max_size: Some(32),
                ..Default::default()
            },
        }
    }
}

impl GpuAdapter for SoftwareGpuAdapter {
    type Device = SoftwareGpuDevice;

    fn features(&self) -> Vec<String> {
        self.features.clone()
    }

    fn limits(&self) -> Vec<(String, f64)> {
        self.limits.clone()
    }

    fn info(&self) -> NativeAdapterInfo {
        self.info.clone()
    }

    /// Fails, as `requestDevice` rejects, when a required feature is not
    /// supported.
    fn request_device(&self, desc: DeviceDescriptor) -> LocalBoxFuture<'static, Result<SoftwareGpuDevice>> {
        if let Some(missing) = desc.required_features.iter().find(|f| !self.features.contains(f)) {
            let err = SpoofError::host(format!("requestDevice: unsupported feature {missing}"));
            return async move { Err::<SoftwareGpuDevice, SpoofError>(err) }.boxed_local();
        }
        let device = SoftwareGpuDevice {
            features: desc.required_features,
            limits: self.limits.clone(),
            label: desc.label.unwrap_or_default(),
        };
        async move { Ok::<SoftwareGpuDevice, SpoofError>(device) }.boxed_local()
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// An analyser producing a fixed synthetic signal.
#[derive(Default)]
pub struct SoftwareAnalyser {
    flags: GuardFlags,
    pub params: Option<AnalyserParams>,
}

impl SoftwareAnalyser {
    pub fn new(params: Option<AnalyserParams>) -> Self {
        Self {
            flags: GuardFlags::new(),
            params,
        }
    }

    fn bounds(&self) -> (f64, f64) {
        self.params
            .map_or((-100.0, -30.0), |p| (p.min_decibels, p.max_decibels))
    }
}

impl Receiver for SoftwareAnalyser {
    fn flag_is_set(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    fn set_flag(&self, flag: &str, on: bool) {
        self.flags.set(flag, on)
    }
}

impl AnalyserNodeLike for SoftwareAnalyser {
    fn params(&self) -> Option<AnalyserParams> {
        self.params
    }
}

pub fn analyser_prototype() -> AnalyserPrototype<SoftwareAnalyser> {
    AnalyserPrototype {
        get_float_frequency_data: Some(NativeFn::new(
            "getFloatFrequencyData",
            |node: &SoftwareAnalyser, buf: SharedBuf<f32>| {
                let (lo, hi) = node.bounds();
                for (i, v) in buf.borrow_mut().iter_mut().enumerate() {
                    let shape = 0.15 + 0.7 * (i as f64 * 0.37).sin().abs();
                    *v = (lo + (hi - lo) * shape) as f32;
                }
                Ok(())
            },
        )),
        get_byte_frequency_data: Some(NativeFn::new(
            "getByteFrequencyData",
            |_: &SoftwareAnalyser, buf: SharedBuf<u8>| {
                for (i, v) in buf.borrow_mut().iter_mut().enumerate() {
                    *v = (20 + (i * 37) % 200) as u8;
                }
                Ok(())
            },
        )),
        get_float_time_domain_data: Some(NativeFn::new(
            "getFloatTimeDomainData",
            |_: &SoftwareAnalyser, buf: SharedBuf<f32>| {
                for (i, v) in buf.borrow_mut().iter_mut().enumerate() {
                    *v = (0.8 * (2.0 * PI * i as f64 / 32.0).sin()) as f32;
                }
                Ok(())
            },
        )),
        get_byte_time_domain_data: Some(NativeFn::new(
            "getByteTimeDomainData",
            |_: &SoftwareAnalyser, buf: SharedBuf<u8>| {
                for (i, v) in buf.borrow_mut().iter_mut().enumerate() {
                    *v = (128.0 + 100.0 * (2.0 * PI * i as f64 / 32.0).sin()).round() as u8;
                }
                Ok(())
            },
        )),
    }
}

struct AudioBufferInner {
    flags: GuardFlags,
    channels: RefCell<Vec<Vec<f32>>>,
}

#[derive(Clone)]
pub struct SoftwareAudioBuffer(Rc<AudioBufferInner>);

impl SoftwareAudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>) -> Self {
        SoftwareAudioBuffer(Rc::new(AudioBufferInner {
            flags: GuardFlags::new(),
            channels: RefCell::new(channels),
        }))
    }
}

impl Receiver for SoftwareAudioBuffer {
    fn flag_is_set(&self, flag: &str) -> bool {
        self.0.flags.contains(flag)
    }

    fn set_flag(&self, flag: &str, on: bool) {
        self.0.flags.set(flag, on)
    }
}

impl RenderedBuffer for SoftwareAudioBuffer {
    fn number_of_channels(&self) -> usize {
        self.0.channels.borrow().len()
    }

    fn channel_data(&self, channel: usize) -> Result<Vec<f32>> {
        self.0
            .channels
            .borrow()
            .get(channel)
            .cloned()
            .ok_or_else(|| SpoofError::host(format!("getChannelData: no channel {channel}")))
    }

    fn set_channel_data(&self, channel: usize, data: &[f32]) -> Result<()> {
        let mut channels = self.0.channels.borrow_mut();
        let slot = channels
            .get_mut(channel)
            .ok_or_else(|| SpoofError::host(format!("copyToChannel: no channel {channel}")))?;
        *slot = data.to_vec();
        Ok(())
    }
}

/// An offline context that renders a 440 Hz tone.
#[derive(Clone)]
pub struct SoftwareOfflineContext {
    flags: Rc<GuardFlags>,
    pub channels: usize,
    pub length: usize,
    pub sample_rate: f64,
}

impl SoftwareOfflineContext {
    pub fn new(channels: usize, length: usize, sample_rate: f64) -> Self {
        Self {
            flags: Rc::new(GuardFlags::new()),
            channels,
            length,
            sample_rate,
        }
    }

    fn render(&self) -> SoftwareAudioBuffer {
        let tone: Vec<f32> = (0..self.length)
            .map(|i| (0.5 * (2.0 * PI * 440.0 * i as f64 / self.sample_rate).sin()) as f32)
            .collect();
        SoftwareAudioBuffer::new(vec![tone; self.channels])
    }
}

impl Receiver for SoftwareOfflineContext {
    fn flag_is_set(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    fn set_flag(&self, flag: &str, on: bool) {
        self.flags.set(flag, on)
    }
}

pub fn offline_prototype() -> OfflinePrototype<SoftwareOfflineContext, SoftwareAudioBuffer> {
    OfflinePrototype {
        start_rendering: Some(NativeFn::new("startRendering", |ctx: &SoftwareOfflineContext, _: ()| {
            let rendered = ctx.render();
            Ok(AsyncReturn::Pending(
                async move { Ok::<SoftwareAudioBuffer, SpoofError>(rendered) }.boxed_local(),
            ))
        })),
    }
}

// ---------------------------------------------------------------------------
// Realm
// ---------------------------------------------------------------------------

/// One realm's worth of patchable prototypes.
pub struct SoftwareRealm {
    canvas: RefCell<CanvasPrototype<SoftwareCanvas>>,
    webgl: RefCell<WebGlPrototype<SoftwareGl>>,
    analyser: RefCell<AnalyserPrototype<SoftwareAnalyser>>,
    offline: RefCell<OfflinePrototype<SoftwareOfflineContext, SoftwareAudioBuffer>>,
    gpu: RefCell<Option<WebGpuHooks>>,
}

impl Default for SoftwareRealm {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRealm {
    /// Unpatched prototypes.
    pub fn new() -> Self {
        Self {
            canvas: RefCell::new(canvas_prototype()),
            webgl: RefCell::new(webgl_prototype()),
            analyser: RefCell::new(analyser_prototype()),
            offline: RefCell::new(offline_prototype()),
            gpu: RefCell::new(None),
        }
    }

    /// Install the patch groups `rt`'s configuration enables. Returns the
    /// groups installed by this call.
    pub fn install(&self, rt: &SpoofRuntime) -> Vec<String> {
        let toggles = rt.config().modules.clone();
        let mut installed = Vec::new();

        if toggles.canvas && !rt.is_applied("canvas") {
            let hooks: CanvasHooks<SoftwareCanvas> = rt.registry();
            let ctx_hooks: Canvas2dHooks<Dyn2d> = rt.registry();
            let dpr = rt.noise().dpr();
            hooks.wrap_contexts_with(move |_, _, ctx| match ctx {
                SoftwareContext::TwoD(native) => {
                    let spoofed: Dyn2d = Rc::new(SpoofedContext2d::new(native, ctx_hooks.clone(), dpr));
                    SoftwareContext::TwoD(spoofed)
                }
                other => other,
            });
            if apply_canvas_patches(&mut self.canvas.borrow_mut(), &hooks) > 0 {
                installed.push("canvas");
            }
        }

        if toggles.webgl && !rt.is_applied("webgl") {
            let hooks: WebGlHooks<SoftwareGl> = rt.registry();
            if apply_webgl_patches(&mut self.webgl.borrow_mut(), &hooks) > 0 {
                installed.push("webgl");
            }
        }

        if toggles.audio && !rt.is_applied("audio") {
            let analyser: AnalyserHooks<SoftwareAnalyser> = rt.registry();
            let offline: OfflineHooks<SoftwareOfflineContext, SoftwareAudioBuffer> = rt.registry();
            let n = apply_analyser_patches(&mut self.analyser.borrow_mut(), &analyser)
                + apply_offline_patches(&mut self.offline.borrow_mut(), &offline);
            if n > 0 {
                installed.push("audio");
            }
        }

        if toggles.webgpu && !rt.is_applied("webgpu") {
            *self.gpu.borrow_mut() = Some(rt.registry::<WebGpuHooks>());
            installed.push("webgpu");
        }

        for module in &installed {
            rt.mark_applied(module);
        }
        log::info!("[realm] installed: {:?}", installed);
        installed.into_iter().map(String::from).collect()
    }

    pub fn canvas_prototype(&self) -> Ref<'_, CanvasPrototype<SoftwareCanvas>> {
        self.canvas.borrow()
    }

    pub fn webgl(&self) -> Ref<'_, WebGlPrototype<SoftwareGl>> {
        self.webgl.borrow()
    }

    pub fn analyser(&self) -> Ref<'_, AnalyserPrototype<SoftwareAnalyser>> {
        self.analyser.borrow()
    }

    pub fn to_data_url(&self, canvas: &SoftwareCanvas, args: EncodeArgs) -> Result<String> {
        let f = self.canvas.borrow().to_data_url.clone();
        f.ok_or_else(|| SpoofError::Unsupported("toDataURL".into()))?.call(canvas, args)
    }

    pub fn to_blob(&self, canvas: &SoftwareCanvas, args: ToBlobArgs) -> Result<AsyncReturn<Blob>> {
        let f = self.canvas.borrow().to_blob.clone();
        f.ok_or_else(|| SpoofError::Unsupported("toBlob".into()))?.call(canvas, args)
    }

    /// `convertToBlob`, awaited.
    pub async fn convert_to_blob(&self, canvas: &SoftwareCanvas, args: EncodeArgs) -> Result<Blob> {
        let f = self.canvas.borrow().convert_to_blob.clone();
        match f.ok_or_else(|| SpoofError::Unsupported("convertToBlob".into()))?.call(canvas, args)? {
            AsyncReturn::Pending(fut) => fut.await,
            AsyncReturn::Dispatched => Err(SpoofError::Internal("convertToBlob has no callback form".into())),
        }
    }

    pub fn get_context(&self, canvas: &SoftwareCanvas, kind: &str) -> Result<Option<SoftwareContext>> {
        let f = self.canvas.borrow().get_context.clone();
        f.ok_or_else(|| SpoofError::Unsupported("getContext".into()))?
            .call(canvas, ContextKind::parse(kind))
    }

    /// `startRendering`, awaited.
    pub async fn start_rendering(&self, ctx: &SoftwareOfflineContext) -> Result<SoftwareAudioBuffer> {
        let f = self.offline.borrow().start_rendering.clone();
        match f.ok_or_else(|| SpoofError::Unsupported("startRendering".into()))?.call(ctx, ())? {
            AsyncReturn::Pending(fut) => fut.await,
            AsyncReturn::Dispatched => Err(SpoofError::Internal("startRendering has no callback form".into())),
        }
    }

    /// The adapter `navigator.gpu.requestAdapter()` would resolve to.
    pub fn request_adapter(&self, native: SoftwareGpuAdapter) -> Result<MaskedAdapter<SoftwareGpuAdapter>> {
        let hooks = self.gpu.borrow().clone();
        let hooks = hooks.ok_or_else(|| SpoofError::Unsupported("WebGPU patches are not installed".into()))?;
        Ok(hooks.mask_adapter(native))
    }

    /// What `navigator.gpu.getPreferredCanvasFormat()` returns when the
    /// host prefers `native`.
    pub fn preferred_canvas_format(&self, native: &str) -> Result<String> {
        let hooks = self.gpu.borrow().clone();
        let hooks = hooks.ok_or_else(|| SpoofError::Unsupported("WebGPU patches are not installed".into()))?;
        Ok(hooks.preferred_canvas_format(native))
    }
}
