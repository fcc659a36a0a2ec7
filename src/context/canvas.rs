//! Canvas element surface: encoding and context acquisition.
//!
//! All three encode entry points (`toDataURL`, the pending branch of
//! `toBlob`, `convertToBlob`) go through one [`EncodePipeline`], so the
//! same pixels always encode to the same bytes whichever method a page
//! uses.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::config::LogicalSize;
use crate::context::{PatchEnv, SurfaceHooks};
use crate::error::{Result, SpoofError};
use crate::noise::{
    content_digest, content_signature, encode_key, png, Blob, EncodeCache, ImageBuffer, NoiseService, OP_ENCODE,
};
use crate::patch::{
    chain, chain_async, patch_method, AsyncReturn, ChainHooks, HookList, HookOutcome, InterceptHook, NativeFn, Receiver,
    ResultHook,
};

pub const DEFAULT_MIME: &str = "image/png";

/// A canvas as the spoofing layer needs to see it. Implementations are
/// cheap handles; clones refer to the same canvas.
pub trait CanvasElement: Receiver + Clone + 'static {
    /// Whatever `getContext` hands out.
    type Context: Clone + 'static;

    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Current backing-store pixels, unmodified.
    fn read_pixels(&self) -> Result<ImageBuffer>;

    /// Encode `img` as the host encoder would encode this canvas.
    fn encode_pixels(&self, img: &ImageBuffer, mime: &str, quality: Option<f64>) -> Result<Blob>;

    /// Per-canvas caches.
    fn state(&self) -> Rc<CanvasState>;
}

/// The `contextType` argument of `getContext`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKind {
    TwoD,
    WebGl,
    WebGl2,
    BitmapRenderer,
    WebGpu,
    Other(String),
}

impl ContextKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "2d" => ContextKind::TwoD,
            "webgl" | "experimental-webgl" => ContextKind::WebGl,
            "webgl2" => ContextKind::WebGl2,
            "bitmaprenderer" => ContextKind::BitmapRenderer,
            "webgpu" => ContextKind::WebGpu,
            other => ContextKind::Other(other.to_string()),
        }
    }

    pub fn is_webgl(&self) -> bool {
        matches!(self, ContextKind::WebGl | ContextKind::WebGl2)
    }

    pub fn name(&self) -> &str {
        match self {
            ContextKind::TwoD => "2d",
            ContextKind::WebGl => "webgl",
            ContextKind::WebGl2 => "webgl2",
            ContextKind::BitmapRenderer => "bitmaprenderer",
            ContextKind::WebGpu => "webgpu",
            ContextKind::Other(s) => s,
        }
    }
}

/// Caches attached to one canvas.
#[derive(Default)]
pub struct CanvasState {
    encodes: RefCell<EncodeCache>,
    contexts: RefCell<HashMap<ContextKind, Rc<dyn Any>>>,
}

impl fmt::Debug for CanvasState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanvasState")
            .field("encodes", &self.encodes.borrow().len())
            .field("contexts", &self.contexts.borrow().len())
            .finish()
    }
}

impl CanvasState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode_hits(&self) -> u64 {
        self.encodes.borrow().hits()
    }

    pub fn cached_encodes(&self) -> usize {
        self.encodes.borrow().len()
    }

    /// The context already handed out for `kind`, or the one `make` builds.
    pub fn memo_context<T: Clone + 'static>(&self, kind: &ContextKind, make: impl FnOnce() -> T) -> T {
        if let Some(hit) = self
            .contexts
            .borrow()
            .get(kind)
            .and_then(|ctx| ctx.downcast_ref::<T>())
        {
            return hit.clone();
        }
        let ctx = make();
        self.contexts.borrow_mut().insert(kind.clone(), Rc::new(ctx.clone()));
        ctx
    }
}

/// `type` and `quality` of an encode call.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeArgs {
    pub mime: String,
    pub quality: Option<f64>,
}

impl EncodeArgs {
    /// Missing type means PNG; quality outside [0, 1] is ignored, as hosts do.
    pub fn new(mime: Option<&str>, quality: Option<f64>) -> Self {
        let mime = mime
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME.to_string());
        let quality = quality.filter(|q| q.is_finite() && (0.0..=1.0).contains(q));
        Self { mime, quality }
    }

    pub fn png() -> Self {
        Self::new(None, None)
    }
}

impl Default for EncodeArgs {
    fn default() -> Self {
        Self::png()
    }
}

pub type BlobCallback = Rc<dyn Fn(Option<Blob>)>;

/// `toBlob(callback?, type?, quality?)`.
#[derive(Clone, Default)]
pub struct ToBlobArgs {
    pub encode: EncodeArgs,
    pub callback: Option<BlobCallback>,
}

impl fmt::Debug for ToBlobArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToBlobArgs")
            .field("encode", &self.encode)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// The canvas methods the layer patches. `None` where the host lacks one.
pub struct CanvasPrototype<E: CanvasElement> {
    pub to_data_url: Option<NativeFn<E, EncodeArgs, String>>,
    pub to_blob: Option<NativeFn<E, ToBlobArgs, AsyncReturn<Blob>>>,
    pub convert_to_blob: Option<NativeFn<E, EncodeArgs, AsyncReturn<Blob>>>,
    pub get_context: Option<NativeFn<E, ContextKind, Option<E::Context>>>,
}

impl<E: CanvasElement> Clone for CanvasPrototype<E> {
    fn clone(&self) -> Self {
        Self {
            to_data_url: self.to_data_url.clone(),
            to_blob: self.to_blob.clone(),
            convert_to_blob: self.convert_to_blob.clone(),
            get_context: self.get_context.clone(),
        }
    }
}

impl<E: CanvasElement> Default for CanvasPrototype<E> {
    fn default() -> Self {
        Self {
            to_data_url: None,
            to_blob: None,
            convert_to_blob: None,
            get_context: None,
        }
    }
}

/// Noise-then-encode with a per-canvas content cache.
#[derive(Debug, Clone)]
pub struct EncodePipeline {
    noise: Rc<NoiseService>,
    logical_size: Option<LogicalSize>,
}

impl EncodePipeline {
    pub fn new(env: &PatchEnv) -> Self {
        Self {
            noise: Rc::clone(&env.noise),
            logical_size: env.config.logical_size,
        }
    }

    /// Encode the canvas's current pixels with the encode-op jitter applied.
    ///
    /// Identical pixels, type and quality give the cached bytes. The
    /// canvas itself is never written to.
    pub fn encode<E: CanvasElement>(&self, canvas: &E, args: &EncodeArgs) -> Result<Blob> {
        let snapshot = canvas.read_pixels()?;
        if snapshot.is_empty() {
            return Err(SpoofError::Unsupported("encode of an empty canvas".into()));
        }
        let key = format!(
            "{}@{}",
            encode_key(content_signature(&snapshot), &args.mime, args.quality),
            self.noise.epoch()
        );
        let digest = content_digest(&snapshot);
        let state = canvas.state();
        if let Some(hit) = state.encodes.borrow_mut().get(&key, digest) {
            return Ok(hit);
        }

        let noisy = self.noise.resample(&snapshot, OP_ENCODE)?;
        let mut blob = canvas.encode_pixels(&noisy, &args.mime, args.quality)?;
        self.apply_logical_size(&mut blob, canvas.width(), canvas.height());
        state.encodes.borrow_mut().insert(key, digest, blob.clone());
        Ok(blob)
    }

    fn apply_logical_size(&self, blob: &mut Blob, width: u32, height: u32) {
        let Some(size) = self.logical_size else {
            return;
        };
        if blob.mime != DEFAULT_MIME || (size.width == width && size.height == height) {
            return;
        }
        if let Err(err) = png::patch_ihdr(&mut blob.bytes, size.width, size.height) {
            log::debug!("[canvas] IHDR patch skipped: {}", err);
        }
    }
}

pub struct CanvasHooks<E: CanvasElement> {
    /// Intercept hooks, so an encode produced here replaces the native one
    /// instead of following it.
    pub to_data_url: HookList<InterceptHook<E, EncodeArgs, String>>,
    pub to_blob: HookList<ResultHook<E, ToBlobArgs, Blob>>,
    pub convert_to_blob: HookList<ResultHook<E, EncodeArgs, Blob>>,
    pub get_context: ChainHooks<E, ContextKind, Option<E::Context>>,
}

impl<E: CanvasElement> Clone for CanvasHooks<E> {
    fn clone(&self) -> Self {
        Self {
            to_data_url: self.to_data_url.clone(),
            to_blob: self.to_blob.clone(),
            convert_to_blob: self.convert_to_blob.clone(),
            get_context: self.get_context.clone(),
        }
    }
}

impl<E: CanvasElement> CanvasHooks<E> {
    pub fn new() -> Self {
        Self {
            to_data_url: HookList::new("HTMLCanvasElement.toDataURL"),
            to_blob: HookList::new("HTMLCanvasElement.toBlob"),
            convert_to_blob: HookList::new("OffscreenCanvas.convertToBlob"),
            get_context: ChainHooks::new("HTMLCanvasElement.getContext"),
        }
    }

    /// Pass every new context of a canvas through `wrap`, once. Later
    /// calls for the same kind get the same wrapped context back.
    pub fn wrap_contexts_with(&self, wrap: impl Fn(&E, &ContextKind, E::Context) -> E::Context + 'static) {
        self.get_context.post.add(move |canvas, out, kind| {
            let Some(native) = out else {
                return Ok(None);
            };
            let state = canvas.state();
            let ctx = state.memo_context(kind, || wrap(canvas, kind, native.clone()));
            Ok(Some(Some(ctx)))
        });
    }
}

impl<E: CanvasElement> Default for CanvasHooks<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CanvasElement> SurfaceHooks for CanvasHooks<E> {
    fn with_defaults(env: &PatchEnv) -> Self {
        let hooks = Self::new();
        let pipeline = EncodePipeline::new(env);

        let p = pipeline.clone();
        hooks
            .to_data_url
            .add(move |canvas, _, args| Ok(HookOutcome::Return(p.encode(canvas, args)?.to_data_url())));

        let p = pipeline.clone();
        hooks
            .to_blob
            .add(move |canvas, _, args| Ok(Some(p.encode(canvas, &args.encode)?)));

        hooks
            .convert_to_blob
            .add(move |canvas, _, args| Ok(Some(pipeline.encode(canvas, args)?)));
        hooks
    }

    fn hook_count(&self) -> usize {
        self.to_data_url.len()
            + self.to_blob.len()
            + self.convert_to_blob.len()
            + self.get_context.pre.len()
            + self.get_context.post.len()
    }
}

/// Install `hooks` on the canvas prototype. Returns how many methods were
/// wrapped.
pub fn apply_canvas_patches<E: CanvasElement>(proto: &mut CanvasPrototype<E>, hooks: &CanvasHooks<E>) -> usize {
    let outcomes = [
        patch_method(&mut proto.to_data_url, &hooks.to_data_url),
        chain_async(&mut proto.to_blob, &hooks.to_blob),
        chain_async(&mut proto.convert_to_blob, &hooks.convert_to_blob),
        chain(&mut proto.get_context, &hooks.get_context),
    ];
    let applied = outcomes.iter().filter(|o| o.is_applied()).count();
    log::info!("[canvas] canvas element patches: applied {} of {}", applied, outcomes.len());
    applied
}
