//! WebGL surface.
//!
//! Every method here is installed with [`patch_method`]: hooks see the
//! original and either pass, substitute arguments, or return a result of
//! their own (calling the original first when they post-process).

use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{Precision, PrecisionMode, PrecisionPolicy};
use crate::context::{PatchEnv, SharedBuf, SurfaceHooks};
use crate::noise::STREAM_WEBGL;
use crate::patch::{patch_method, HookList, HookOutcome, InterceptHook, NativeFn, Receiver};
use crate::rng::Stream;

pub const VENDOR: u32 = 0x1F00;
pub const RENDERER: u32 = 0x1F01;
pub const UNMASKED_VENDOR_WEBGL: u32 = 0x9245;
pub const UNMASKED_RENDERER_WEBGL: u32 = 0x9246;
pub const FRAGMENT_SHADER: u32 = 0x8B30;
pub const VERTEX_SHADER: u32 = 0x8B31;
pub const DEBUG_RENDERER_INFO: &str = "WEBGL_debug_renderer_info";

/// A `getParameter`-style return value.
pub trait GlValue: Clone + 'static {
    fn null() -> Self;
    fn string(s: &str) -> Self;
    fn number(v: f64) -> Self;
    fn as_number(&self) -> Option<f64>;
    fn is_null(&self) -> bool;
}

/// A WebGL rendering context.
pub trait GlReceiver: Receiver + 'static {
    type Value: GlValue;
    /// Shader, program and uniform location handles.
    type Handle: Clone + 'static;

    fn shader_kind(&self, shader: &Self::Handle) -> Option<ShaderKind>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    pub fn from_gl(kind: u32) -> Option<Self> {
        match kind {
            VERTEX_SHADER => Some(ShaderKind::Vertex),
            FRAGMENT_SHADER => Some(ShaderKind::Fragment),
            _ => None,
        }
    }
}

/// `WebGLShaderPrecisionFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionFormat {
    pub range_min: i32,
    pub range_max: i32,
    pub precision: i32,
}

#[derive(Debug, Clone)]
pub struct ReadPixelsArgs {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub format: u32,
    pub kind: u32,
    pub pixels: Option<SharedBuf<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderSourceArgs<H> {
    pub shader: H,
    pub source: String,
}

type Slot<G, A, O> = Option<NativeFn<G, A, O>>;
type Intercept<G, A, O> = HookList<InterceptHook<G, A, O>>;

pub struct WebGlPrototype<G: GlReceiver> {
    pub get_parameter: Slot<G, u32, G::Value>,
    pub get_supported_extensions: Slot<G, (), Option<Vec<String>>>,
    pub get_extension: Slot<G, String, G::Value>,
    pub read_pixels: Slot<G, ReadPixelsArgs, ()>,
    pub get_shader_precision_format: Slot<G, (u32, u32), Option<PrecisionFormat>>,
    pub shader_source: Slot<G, ShaderSourceArgs<G::Handle>, ()>,
    pub get_uniform: Slot<G, (G::Handle, G::Handle), G::Value>,
}

impl<G: GlReceiver> Default for WebGlPrototype<G> {
    fn default() -> Self {
        Self {
            get_parameter: None,
            get_supported_extensions: None,
            get_extension: None,
            read_pixels: None,
            get_shader_precision_format: None,
            shader_source: None,
            get_uniform: None,
        }
    }
}

pub struct WebGlHooks<G: GlReceiver> {
    pub get_parameter: Intercept<G, u32, G::Value>,
    pub get_supported_extensions: Intercept<G, (), Option<Vec<String>>>,
    pub get_extension: Intercept<G, String, G::Value>,
    pub read_pixels: Intercept<G, ReadPixelsArgs, ()>,
    pub get_shader_precision_format: Intercept<G, (u32, u32), Option<PrecisionFormat>>,
    pub shader_source: Intercept<G, ShaderSourceArgs<G::Handle>, ()>,
    pub get_uniform: Intercept<G, (G::Handle, G::Handle), G::Value>,
}

impl<G: GlReceiver> Clone for WebGlHooks<G> {
    fn clone(&self) -> Self {
        Self {
            get_parameter: self.get_parameter.clone(),
            get_supported_extensions: self.get_supported_extensions.clone(),
            get_extension: self.get_extension.clone(),
            read_pixels: self.read_pixels.clone(),
            get_shader_precision_format: self.get_shader_precision_format.clone(),
            shader_source: self.shader_source.clone(),
            get_uniform: self.get_uniform.clone(),
        }
    }
}

impl<G: GlReceiver> WebGlHooks<G> {
    pub fn new() -> Self {
        Self {
            get_parameter: HookList::new("WebGLRenderingContext.getParameter"),
            get_supported_extensions: HookList::new("WebGLRenderingContext.getSupportedExtensions"),
            get_extension: HookList::new("WebGLRenderingContext.getExtension"),
            read_pixels: HookList::new("WebGLRenderingContext.readPixels"),
            get_shader_precision_format: HookList::new("WebGLRenderingContext.getShaderPrecisionFormat"),
            shader_source: HookList::new("WebGLRenderingContext.shaderSource"),
            get_uniform: HookList::new("WebGLRenderingContext.getUniform"),
        }
    }
}

impl<G: GlReceiver> Default for WebGlHooks<G> {
    fn default() -> Self {
        Self::new()
    }
}

static PRECISION_FLOAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bprecision\s+highp\s+float\b").unwrap());
static PRECISION_INT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bprecision\s+highp\s+int\b").unwrap());
static BARE_HIGHP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bhighp\b").unwrap());

/// Rewrite `highp` precision declarations to `target`. `Smart` mode also
/// rewrites any remaining bare `highp` qualifier.
pub fn downgrade_precision(source: &str, target: Precision, mode: PrecisionMode) -> String {
    let t = target.as_str();
    let out = PRECISION_FLOAT.replace_all(source, format!("precision {t} float").as_str());
    let out = PRECISION_INT.replace_all(&out, format!("precision {t} int").as_str());
    match mode {
        PrecisionMode::FloatOnly => out.into_owned(),
        PrecisionMode::Smart => BARE_HIGHP.replace_all(&out, t).into_owned(),
    }
}

/// The source to install for a shader of `kind`, or `None` to keep it.
/// Fragment shaders are left alone while the policy asks for `highp`.
pub fn apply_precision_policy(source: &str, kind: ShaderKind, policy: &PrecisionPolicy) -> Option<String> {
    match kind {
        ShaderKind::Vertex => Some(downgrade_precision(source, policy.vertex, policy.mode)),
        ShaderKind::Fragment if policy.fragment != Precision::Highp => {
            Some(downgrade_precision(source, policy.fragment, policy.mode))
        }
        ShaderKind::Fragment => None,
    }
}

/// Integral offset in [-1, 1] added to R, G and B of each read pixel.
pub fn perturb_read_pixels(buf: &mut [u8], width: i32, height: i32, stream: &Stream) {
    let count = (width.max(0) as usize)
        .saturating_mul(height.max(0) as usize)
        .min(buf.len() / 4);
    for px in buf.chunks_exact_mut(4).take(count) {
        let v = ((stream.next() - 0.5) * 3.0).trunc();
        for c in px.iter_mut().take(3) {
            *c = (f64::from(*c) + v).clamp(0.0, 255.0) as u8;
        }
    }
}

/// JS `Math.round`.
fn js_round(v: f64) -> f64 {
    (v + 0.5).floor()
}

pub fn jitter_precision_format(pf: PrecisionFormat, stream: &Stream) -> PrecisionFormat {
    let v = stream.next() - 0.5;
    PrecisionFormat {
        range_min: js_round(f64::from(pf.range_min) + v) as i32,
        range_max: js_round(f64::from(pf.range_max) + v) as i32,
        precision: js_round(f64::from(pf.precision) + v) as i32,
    }
}

impl<G: GlReceiver> SurfaceHooks for WebGlHooks<G> {
    fn with_defaults(env: &PatchEnv) -> Self {
        let hooks = Self::new();
        let device = &env.config.device;
        let stream = env.noise.stream(STREAM_WEBGL);

        let masked = [
            (VENDOR, device.webgl_vendor.clone()),
            (RENDERER, device.webgl_renderer.clone()),
            (UNMASKED_VENDOR_WEBGL, device.webgl_unmasked_vendor.clone()),
            (UNMASKED_RENDERER_WEBGL, device.webgl_unmasked_renderer.clone()),
        ];
        hooks.get_parameter.add(move |_, _, pname| {
            Ok(match masked.iter().find(|(p, _)| p == pname) {
                Some((_, value)) => HookOutcome::Return(G::Value::string(value)),
                None => HookOutcome::Continue,
            })
        });

        let params = env.config.whitelists.webgl_parameters.clone();
        hooks.get_parameter.add(move |_, _, pname| {
            if params.is_empty() || params.contains(pname) {
                Ok(HookOutcome::Continue)
            } else {
                Ok(HookOutcome::Return(G::Value::null()))
            }
        });

        let extensions = Rc::new(env.config.whitelists.webgl_extensions.clone());
        let wl = Rc::clone(&extensions);
        hooks.get_supported_extensions.add(move |gl, orig, _| {
            let listed = match orig.call(gl, ()) {
                Ok(Some(list)) => Some(list.into_iter().filter(|e| wl.contains(e)).collect()),
                Ok(None) => None,
                Err(err) => {
                    log::debug!("[webgl] getSupportedExtensions failed: {}", err);
                    Some(Vec::new())
                }
            };
            Ok(HookOutcome::Return(listed))
        });

        hooks.get_extension.add(move |_, _, name| {
            if extensions.contains(name) {
                Ok(HookOutcome::Continue)
            } else {
                Ok(HookOutcome::Return(G::Value::null()))
            }
        });

        let s = stream.clone();
        hooks.read_pixels.add(move |gl, orig, args| {
            orig.call(gl, args.clone())?;
            if let Some(buf) = &args.pixels {
                perturb_read_pixels(&mut buf.borrow_mut(), args.width, args.height, &s);
            }
            Ok(HookOutcome::Return(()))
        });

        let s = stream.clone();
        hooks.get_shader_precision_format.add(move |gl, orig, args| {
            let res = orig.call(gl, *args)?;
            Ok(HookOutcome::Return(res.map(|pf| jitter_precision_format(pf, &s))))
        });

        let policy = env.config.precision.clone();
        hooks.shader_source.add(move |gl, _, args| {
            let rewritten = gl
                .shader_kind(&args.shader)
                .and_then(|kind| apply_precision_policy(&args.source, kind, &policy));
            Ok(match rewritten {
                Some(source) => HookOutcome::ReplaceArgs(ShaderSourceArgs { shader: args.shader.clone(), source }),
                None => HookOutcome::Continue,
            })
        });

        hooks.get_uniform.add(move |gl, orig, args| {
            let res = orig.call(gl, args.clone())?;
            Ok(HookOutcome::Return(match res.as_number() {
                Some(n) => G::Value::number(n + (stream.next() - 0.5) * 1e-4),
                None => res,
            }))
        });
        hooks
    }

    fn hook_count(&self) -> usize {
        self.get_parameter.len()
            + self.get_supported_extensions.len()
            + self.get_extension.len()
            + self.read_pixels.len()
            + self.get_shader_precision_format.len()
            + self.shader_source.len()
            + self.get_uniform.len()
    }
}

/// Install `hooks` on a WebGL prototype. Returns how many methods were
/// wrapped.
pub fn apply_webgl_patches<G: GlReceiver>(proto: &mut WebGlPrototype<G>, hooks: &WebGlHooks<G>) -> usize {
    let outcomes = [
        patch_method(&mut proto.get_parameter, &hooks.get_parameter),
        patch_method(&mut proto.get_supported_extensions, &hooks.get_supported_extensions),
        patch_method(&mut proto.get_extension, &hooks.get_extension),
        patch_method(&mut proto.read_pixels, &hooks.read_pixels),
        patch_method(&mut proto.get_shader_precision_format, &hooks.get_shader_precision_format),
        patch_method(&mut proto.shader_source, &hooks.shader_source),
        patch_method(&mut proto.get_uniform, &hooks.get_uniform),
    ];
    let applied = outcomes.iter().filter(|o| o.is_applied()).count();
    log::info!("[webgl] prototype patches: applied {} of {}", applied, outcomes.len());
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpoofConfig;
    use crate::context::shared_buf;
    use crate::patch::GuardFlags;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    enum V {
        Null,
        S(String),
        N(f64),
    }

    impl GlValue for V {
        fn null() -> Self {
            V::Null
        }
        fn string(s: &str) -> Self {
            V::S(s.to_string())
        }
        fn number(v: f64) -> Self {
            V::N(v)
        }
        fn as_number(&self) -> Option<f64> {
            match self {
                V::N(v) => Some(*v),
                _ => None,
            }
        }
        fn is_null(&self) -> bool {
            *self == V::Null
        }
    }

    #[derive(Default)]
    struct Gl {
        flags: GuardFlags,
        sources: RefCell<Vec<String>>,
    }

    impl Receiver for Gl {
        fn flag_is_set(&self, flag: &str) -> bool {
            self.flags.contains(flag)
        }
        fn set_flag(&self, flag: &str, on: bool) {
            self.flags.set(flag, on)
        }
    }

    impl GlReceiver for Gl {
        type Value = V;
        type Handle = u32;

        fn shader_kind(&self, shader: &u32) -> Option<ShaderKind> {
            ShaderKind::from_gl(*shader)
        }
    }

    fn native() -> WebGlPrototype<Gl> {
        WebGlPrototype {
            get_parameter: Some(NativeFn::new("getParameter", |_: &Gl, p: u32| {
                Ok(match p {
                    VENDOR => V::S("Mesa".into()),
                    UNMASKED_RENDERER_WEBGL => V::S("llvmpipe".into()),
                    _ => V::N(f64::from(p)),
                })
            })),
            get_supported_extensions: Some(NativeFn::new("getSupportedExtensions", |_: &Gl, _: ()| {
                Ok(Some(vec!["OES_texture_float".to_string(), "WEBGL_secret_ext".to_string()]))
            })),
            get_extension: Some(NativeFn::new("getExtension", |_: &Gl, n: String| Ok(V::S(n)))),
            read_pixels: Some(NativeFn::new("readPixels", |_: &Gl, a: ReadPixelsArgs| {
                if let Some(buf) = a.pixels {
                    buf.borrow_mut().fill(128);
                }
                Ok(())
            })),
            get_shader_precision_format: Some(NativeFn::new("getShaderPrecisionFormat", |_: &Gl, _: (u32, u32)| {
                Ok(Some(PrecisionFormat { range_min: 127, range_max: 127, precision: 23 }))
            })),
            shader_source: Some(NativeFn::new("shaderSource", |gl: &Gl, a: ShaderSourceArgs<u32>| {
                gl.sources.borrow_mut().push(a.source);
                Ok(())
            })),
            get_uniform: Some(NativeFn::new("getUniform", |_: &Gl, _: (u32, u32)| Ok(V::N(0.5)))),
        }
    }

    fn patched(cfg: SpoofConfig) -> WebGlPrototype<Gl> {
        let env = PatchEnv::new(cfg).unwrap();
        let mut proto = native();
        assert_eq!(apply_webgl_patches(&mut proto, &WebGlHooks::with_defaults(&env)), 7);
        proto
    }

    fn call<A, O>(slot: &Slot<Gl, A, O>, gl: &Gl, args: A) -> O {
        slot.as_ref().unwrap().call(gl, args).unwrap()
    }

    #[test]
    fn test_vendor_strings_masked() {
        let mut cfg = SpoofConfig::with_seed("abc123");
        cfg.device.webgl_vendor = "WebKit".into();
        cfg.device.webgl_unmasked_renderer = "ANGLE (Intel)".into();
        let proto = patched(cfg);
        let gl = Gl::default();
        assert_eq!(call(&proto.get_parameter, &gl, VENDOR), V::S("WebKit".into()));
        assert_eq!(call(&proto.get_parameter, &gl, UNMASKED_RENDERER_WEBGL), V::S("ANGLE (Intel)".into()));
        assert_eq!(call(&proto.get_parameter, &gl, 0x0D33), V::N(f64::from(0x0D33)));
    }

    #[test]
    fn test_parameter_whitelist() {
        let mut cfg = SpoofConfig::with_seed("abc123");
        cfg.whitelists.webgl_parameters = vec![0x0D33];
        let proto = patched(cfg);
        let gl = Gl::default();
        assert_eq!(call(&proto.get_parameter, &gl, 0x0D33), V::N(f64::from(0x0D33)));
        assert!(call(&proto.get_parameter, &gl, 0x8869).is_null());
        // Masked strings win over the whitelist.
        assert!(!call(&proto.get_parameter, &gl, VENDOR).is_null());
    }

    #[test]
    fn test_extensions_contained() {
        let proto = patched(SpoofConfig::with_seed("abc123"));
        let gl = Gl::default();
        let list = call(&proto.get_supported_extensions, &gl, ()).unwrap();
        assert_eq!(list, vec!["OES_texture_float".to_string()]);
        assert!(call(&proto.get_extension, &gl, "WEBGL_secret_ext".to_string()).is_null());
        assert_eq!(
            call(&proto.get_extension, &gl, "OES_texture_float".to_string()),
            V::S("OES_texture_float".into())
        );
    }

    #[test]
    fn test_read_pixels_noise_bounded() {
        let proto = patched(SpoofConfig::with_seed("abc123"));
        let gl = Gl::default();
        let buf = shared_buf(vec![0u8; 16 * 16 * 4]);
        let args = ReadPixelsArgs { x: 0, y: 0, width: 16, height: 16, format: 0x1908, kind: 0x1401, pixels: Some(Rc::clone(&buf)) };
        call(&proto.read_pixels, &gl, args);
        let data = buf.borrow();
        assert!(data.chunks(4).all(|p| p[..3].iter().all(|c| (127..=129).contains(c)) && p[3] == 128));
        assert!(data.chunks(4).all(|p| p[0] == p[1] && p[1] == p[2]));
        assert!(data.iter().any(|c| *c != 128));
    }

    #[test]
    fn test_precision_format_jitter() {
        let proto = patched(SpoofConfig::with_seed("abc123"));
        let gl = Gl::default();
        let pf = call(&proto.get_shader_precision_format, &gl, (FRAGMENT_SHADER, 0x8DF2)).unwrap();
        assert!((126..=128).contains(&pf.range_min));
        assert!((22..=24).contains(&pf.precision));
    }

    #[test]
    fn test_shader_precision_policy() {
        let proto = patched(SpoofConfig::with_seed("abc123"));
        let gl = Gl::default();
        let src = "precision highp float;\nuniform highp vec4 c;";
        call(&proto.shader_source, &gl, ShaderSourceArgs { shader: VERTEX_SHADER, source: src.into() });
        call(&proto.shader_source, &gl, ShaderSourceArgs { shader: FRAGMENT_SHADER, source: src.into() });
        let seen = gl.sources.borrow();
        assert_eq!(seen[0], "precision mediump float;\nuniform mediump vec4 c;");
        assert_eq!(seen[1], src);
    }

    #[test]
    fn test_float_only_mode() {
        let out = downgrade_precision(
            "precision highp int; highp float x; int highpish;",
            Precision::Lowp,
            PrecisionMode::FloatOnly,
        );
        assert_eq!(out, "precision lowp int; highp float x; int highpish;");
        let smart = downgrade_precision("highp float x; int highpish;", Precision::Lowp, PrecisionMode::Smart);
        assert_eq!(smart, "lowp float x; int highpish;");
    }

    #[test]
    fn test_uniform_noise_is_tiny() {
        let proto = patched(SpoofConfig::with_seed("abc123"));
        let gl = Gl::default();
        match call(&proto.get_uniform, &gl, (1, 2)) {
            V::N(v) => assert!((v - 0.5).abs() <= 5e-5 && v != 0.5),
            other => panic!("unexpected {other:?}"),
        }
    }
}
