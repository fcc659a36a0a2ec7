//! Canvas element and 2D context bindings.
//!
//! `HTMLCanvasElement` and `OffscreenCanvas` prototypes get the encode
//! methods and `getContext` patched. A 2D context is handed out as a Proxy
//! over the native context whose special-cased methods run through
//! [`SpoofedContext2d`]; everything else is forwarded.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Promise, Reflect, Uint8Array, WeakMap};
use wasm_bindgen::prelude::*;
use wasm_bindgen::{Clamped, JsCast};
use futures::FutureExt;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

use super::js_host::{arg_f64, arg_opt_f64, arg_string, flag_is_set, install_method, original, set_flag};
use super::proxy_helpers::{forward_get, get_global, get_method, get_prototype, invoke, proxy_function_with_apply, proxy_object_with_get};
use crate::context::canvas::{apply_canvas_patches, DEFAULT_MIME};
use crate::context::{
    Canvas2dHooks, CanvasElement, CanvasHooks, CanvasPrototype, CanvasState, Context2d, ContextKind, EncodeArgs,
    SpoofedContext2d, TextMetrics, ToBlobArgs,
};
use crate::error::{Result, SpoofError};
use crate::noise::{png, Blob, DrawImageArgs, ImageBuffer, RectArgs, Region};
use crate::patch::{AsyncReturn, NativeFn, Receiver};
use crate::runtime::SpoofRuntime;

/// Canvas classes whose prototypes are patched.
const CANVAS_CLASSES: &[&str] = &["HTMLCanvasElement", "OffscreenCanvas"];

thread_local! {
    /// Unpatched `getContext` per canvas class, for scratch canvases.
    static NATIVE_GET_CONTEXT: RefCell<HashMap<&'static str, Function>> = RefCell::new(HashMap::new());
    /// Unpatched `toDataURL`, for non-PNG encodes.
    static NATIVE_TO_DATA_URL: RefCell<Option<Function>> = const { RefCell::new(None) };
    static CANVAS_IDS: WeakMap = WeakMap::new();
    static CANVAS_STATES: RefCell<HashMap<u32, Rc<CanvasState>>> = RefCell::new(HashMap::new());
    static NEXT_CANVAS_ID: Cell<u32> = const { Cell::new(1) };
}

/// An `HTMLCanvasElement` or `OffscreenCanvas`, with the arguments of the
/// `getContext` call in flight, if any.
#[derive(Debug, Clone)]
pub struct JsCanvas {
    element: JsValue,
    context_args: Option<Array>,
}

impl JsCanvas {
    pub fn new(element: JsValue) -> Self {
        Self { element, context_args: None }
    }
}

impl Receiver for JsCanvas {
    fn flag_is_set(&self, flag: &str) -> bool {
        flag_is_set(&self.element, flag)
    }

    fn set_flag(&self, flag: &str, on: bool) {
        set_flag(&self.element, flag, on)
    }
}

fn dimension(obj: &JsValue, prop: &str) -> u32 {
    Reflect::get(obj, &JsValue::from_str(prop))
        .ok()
        .and_then(|v| v.as_f64())
        .map_or(0, |v| v.max(0.0) as u32)
}

/// A 2D context nobody has wrapped, on a fresh canvas of the given size.
fn scratch_context(width: u32, height: u32) -> Result<(JsValue, JsValue)> {
    let offscreen = get_global("OffscreenCanvas")?;
    let (canvas, class) = if offscreen.is_function() {
        let ctor: &Function = offscreen.unchecked_ref();
        let args = Array::of2(&width.into(), &height.into());
        (Reflect::construct(ctor, &args)?, "OffscreenCanvas")
    } else {
        let document = get_global("document")?;
        let create = get_method(&document, "createElement")
            .ok_or_else(|| SpoofError::Unsupported("no canvas constructor in this realm".into()))?;
        let canvas = invoke(&create, &document, &["canvas".into()])?;
        Reflect::set(&canvas, &"width".into(), &width.into())?;
        Reflect::set(&canvas, &"height".into(), &height.into())?;
        (canvas, "HTMLCanvasElement")
    };
    let get_context = NATIVE_GET_CONTEXT
        .with(|m| m.borrow().get(class).cloned())
        .or_else(|| get_method(&canvas, "getContext"))
        .ok_or_else(|| SpoofError::Unsupported("getContext".into()))?;
    let ctx = invoke(&get_context, &canvas, &["2d".into()])?;
    if ctx.is_null() {
        return Err(SpoofError::host("scratch canvas has no 2d context"));
    }
    Ok((canvas, ctx))
}

fn image_from_data(image_data: &JsValue) -> Result<ImageBuffer> {
    let data = Reflect::get(image_data, &"data".into())?;
    let bytes = Uint8Array::new(&data).to_vec();
    ImageBuffer::new(dimension(image_data, "width"), dimension(image_data, "height"), bytes)
}

fn image_data_from(img: &ImageBuffer) -> Result<JsValue> {
    let data = web_sys::ImageData::new_with_u8_clamped_array_and_sh(Clamped(img.data()), img.width(), img.height())?;
    Ok(data.into())
}

impl CanvasElement for JsCanvas {
    type Context = JsValue;

    fn width(&self) -> u32 {
        dimension(&self.element, "width")
    }

    fn height(&self) -> u32 {
        dimension(&self.element, "height")
    }

    /// Copies the canvas through a scratch 2D context, whatever context
    /// the canvas itself has.
    fn read_pixels(&self) -> Result<ImageBuffer> {
        let (w, h) = (self.width(), self.height());
        if w == 0 || h == 0 {
            return ImageBuffer::new(0, 0, Vec::new());
        }
        let (_, ctx) = scratch_context(w, h)?;
        let draw = get_method(&ctx, "drawImage").ok_or_else(|| SpoofError::Unsupported("drawImage".into()))?;
        invoke(&draw, &ctx, &[self.element.clone(), 0.into(), 0.into()])?;
        let read = get_method(&ctx, "getImageData").ok_or_else(|| SpoofError::Unsupported("getImageData".into()))?;
        let data = invoke(&read, &ctx, &[0.into(), 0.into(), w.into(), h.into()])
            .map_err(|e| SpoofError::Tainted(format!("{:?}", e)))?;
        image_from_data(&data)
    }

    /// PNG is encoded here. Other types go through the unpatched
    /// `toDataURL` of a scratch element when the realm has a document.
    fn encode_pixels(&self, img: &ImageBuffer, mime: &str, quality: Option<f64>) -> Result<Blob> {
        if mime != DEFAULT_MIME {
            match encode_with_host(img, mime, quality) {
                Ok(blob) => return Ok(blob),
                Err(err) => log::debug!("[canvas] {mime} encode unavailable, using PNG: {err}"),
            }
        }
        Ok(Blob::new(DEFAULT_MIME, png::encode_rgba(img)))
    }

    fn state(&self) -> Rc<CanvasState> {
        let id = CANVAS_IDS.with(|ids| {
            let key: &Object = self.element.unchecked_ref();
            if let Some(id) = ids.get(key).as_f64() {
                return id as u32;
            }
            let id = NEXT_CANVAS_ID.with(|n| {
                let id = n.get();
                n.set(id + 1);
                id
            });
            ids.set(key, &id.into());
            id
        });
        CANVAS_STATES.with(|states| Rc::clone(states.borrow_mut().entry(id).or_default()))
    }
}

fn encode_with_host(img: &ImageBuffer, mime: &str, quality: Option<f64>) -> Result<Blob> {
    let to_data_url = NATIVE_TO_DATA_URL
        .with(|f| f.borrow().clone())
        .ok_or_else(|| SpoofError::Unsupported("toDataURL".into()))?;
    let document = get_global("document")?;
    let create =
        get_method(&document, "createElement").ok_or_else(|| SpoofError::Unsupported("no document".into()))?;
    let canvas = invoke(&create, &document, &["canvas".into()])?;
    Reflect::set(&canvas, &"width".into(), &img.width().into())?;
    Reflect::set(&canvas, &"height".into(), &img.height().into())?;
    let get_context = NATIVE_GET_CONTEXT
        .with(|m| m.borrow().get("HTMLCanvasElement").cloned())
        .ok_or_else(|| SpoofError::Unsupported("getContext".into()))?;
    let ctx = invoke(&get_context, &canvas, &["2d".into()])?;
    let put = get_method(&ctx, "putImageData").ok_or_else(|| SpoofError::Unsupported("putImageData".into()))?;
    invoke(&put, &ctx, &[image_data_from(img)?, 0.into(), 0.into()])?;
    let quality = quality.map_or(JsValue::UNDEFINED, JsValue::from_f64);
    let url = invoke(&to_data_url, &canvas, &[mime.into(), quality])?
        .as_string()
        .ok_or_else(|| SpoofError::host("toDataURL returned a non-string"))?;
    let (mime, bytes) = png::parse_data_url(&url)?;
    Ok(Blob::new(mime, bytes))
}

fn js_blob(blob: &Blob) -> Result<JsValue> {
    let parts = Array::of1(&Uint8Array::from(blob.bytes.as_slice()));
    let opts = web_sys::BlobPropertyBag::new();
    opts.set_type(&blob.mime);
    Ok(web_sys::Blob::new_with_u8_array_sequence_and_options(&parts, &opts)?.into())
}

async fn blob_from_js(value: JsValue) -> Result<Blob> {
    let mime = Reflect::get(&value, &"type".into())?.as_string().unwrap_or_default();
    let read = get_method(&value, "arrayBuffer").ok_or_else(|| SpoofError::host("not a Blob"))?;
    let buffer = JsFuture::from(Promise::from(invoke(&read, &value, &[])?)).await?;
    Ok(Blob::new(mime, Uint8Array::new(&buffer).to_vec()))
}

fn encode_args(args: &Array, type_idx: u32) -> EncodeArgs {
    let mime = args.get(type_idx).as_string();
    EncodeArgs::new(mime.as_deref(), arg_opt_f64(args, type_idx + 1))
}

fn canvas_prototype(proto: &JsValue) -> CanvasPrototype<JsCanvas> {
    CanvasPrototype {
        to_data_url: original(proto, "toDataURL").map(|f| {
            NativeFn::new("toDataURL", move |c: &JsCanvas, args: EncodeArgs| {
                let quality = args.quality.map_or(JsValue::UNDEFINED, JsValue::from_f64);
                invoke(&f, &c.element, &[args.mime.into(), quality])?
                    .as_string()
                    .ok_or_else(|| SpoofError::host("toDataURL returned a non-string"))
            })
        }),
        // Called without a callback: the native callback is bridged into
        // a future so the result can be post-processed.
        to_blob: original(proto, "toBlob").map(|f| {
            NativeFn::new("toBlob", move |c: &JsCanvas, args: ToBlobArgs| {
                let quality = args.encode.quality.map_or(JsValue::UNDEFINED, JsValue::from_f64);
                if let Some(cb) = args.callback {
                    let f = f.clone();
                    let sink = Closure::once_into_js(move |value: JsValue| {
                        wasm_bindgen_futures::spawn_local(async move {
                            cb(blob_from_js(value).await.ok());
                        });
                    });
                    invoke(&f, &c.element, &[sink, args.encode.mime.into(), quality])?;
                    return Ok(AsyncReturn::Dispatched);
                }
                let f = f.clone();
                let canvas = c.element.clone();
                let mime: JsValue = args.encode.mime.into();
                let promise = Promise::new(&mut |resolve, reject| {
                    if let Err(err) = invoke(&f, &canvas, &[resolve.into(), mime.clone(), quality.clone()]) {
                        let _ = reject.call1(&JsValue::UNDEFINED, &err);
                    }
                });
                Ok(AsyncReturn::Pending(
                    async move { blob_from_js(JsFuture::from(promise).await?).await }.boxed_local(),
                ))
            })
        }),
        convert_to_blob: original(proto, "convertToBlob").map(|f| {
            NativeFn::new("convertToBlob", move |c: &JsCanvas, args: EncodeArgs| {
                let opts = Object::new();
                Reflect::set(&opts, &"type".into(), &args.mime.into())?;
                if let Some(q) = args.quality {
                    Reflect::set(&opts, &"quality".into(), &q.into())?;
                }
                let promise = Promise::from(invoke(&f, &c.element, &[opts.into()])?);
                Ok(AsyncReturn::Pending(
                    async move { blob_from_js(JsFuture::from(promise).await?).await }.boxed_local(),
                ))
            })
        }),
        get_context: original(proto, "getContext").map(|f| {
            NativeFn::new("getContext", move |c: &JsCanvas, kind: ContextKind| {
                let args = c
                    .context_args
                    .clone()
                    .unwrap_or_else(|| Array::of1(&kind.name().into()));
                let ctx = Reflect::apply(&f, &c.element, &args)?;
                Ok((!ctx.is_null() && !ctx.is_undefined()).then_some(ctx))
            })
        }),
    }
}

// ---------------------------------------------------------------------------
// 2D context
// ---------------------------------------------------------------------------

/// A native `CanvasRenderingContext2D`.
pub struct JsContext2d {
    ctx: JsValue,
}

impl JsContext2d {
    fn call(&self, method: &str, args: &[JsValue]) -> Result<JsValue> {
        let f = get_method(&self.ctx, method).ok_or_else(|| SpoofError::Unsupported(method.to_string()))?;
        Ok(invoke(&f, &self.ctx, args)?)
    }

    fn text_args(text: &str, x: f64, y: f64, max_width: Option<f64>) -> Vec<JsValue> {
        let mut args = vec![text.into(), x.into(), y.into()];
        if let Some(mw) = max_width {
            args.push(mw.into());
        }
        args
    }

    fn rect_args(r: RectArgs) -> [JsValue; 4] {
        [r.x.into(), r.y.into(), r.width.into(), r.height.into()]
    }
}

impl Context2d for JsContext2d {
    type ImageSource = JsValue;

    fn canvas_size(&self) -> (u32, u32) {
        let canvas = Reflect::get(&self.ctx, &"canvas".into()).unwrap_or(JsValue::UNDEFINED);
        (dimension(&canvas, "width"), dimension(&canvas, "height"))
    }

    fn font(&self) -> String {
        super::proxy_helpers::get_string(&self.ctx, "font").unwrap_or_default()
    }

    fn get_image_data(&self, region: Region) -> Result<ImageBuffer> {
        let data = self.call(
            "getImageData",
            &[region.x.into(), region.y.into(), region.width.into(), region.height.into()],
        )?;
        image_from_data(&data)
    }

    fn put_image_data(&self, img: &ImageBuffer, x: i32, y: i32) -> Result<()> {
        self.call("putImageData", &[image_data_from(img)?, x.into(), y.into()])?;
        Ok(())
    }

    fn measure_text(&self, text: &str) -> Result<TextMetrics> {
        let m = self.call("measureText", &[text.into()])?;
        let field = |name: &str| super::proxy_helpers::get_f64(&m, name);
        Ok(TextMetrics {
            width: field("width"),
            actual_bounding_box_left: field("actualBoundingBoxLeft"),
            actual_bounding_box_right: field("actualBoundingBoxRight"),
            actual_bounding_box_ascent: field("actualBoundingBoxAscent"),
            actual_bounding_box_descent: field("actualBoundingBoxDescent"),
        })
    }

    fn fill_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        self.call("fillText", &Self::text_args(text, x, y, max_width))?;
        Ok(())
    }

    fn stroke_text(&self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> Result<()> {
        self.call("strokeText", &Self::text_args(text, x, y, max_width))?;
        Ok(())
    }

    fn fill_rect(&self, rect: RectArgs) -> Result<()> {
        self.call("fillRect", &Self::rect_args(rect))?;
        Ok(())
    }

    fn stroke_rect(&self, rect: RectArgs) -> Result<()> {
        self.call("strokeRect", &Self::rect_args(rect))?;
        Ok(())
    }

    fn clear_rect(&self, rect: RectArgs) -> Result<()> {
        self.call("clearRect", &Self::rect_args(rect))?;
        Ok(())
    }

    fn draw_image(&self, src: &JsValue, args: DrawImageArgs) -> Result<()> {
        let mut argv = vec![src.clone()];
        match args {
            DrawImageArgs::At { dx, dy } => argv.extend([dx, dy].map(JsValue::from_f64)),
            DrawImageArgs::Scaled { dx, dy, dw, dh } => argv.extend([dx, dy, dw, dh].map(JsValue::from_f64)),
            DrawImageArgs::Cropped { sx, sy, sw, sh, dx, dy, dw, dh } => {
                argv.extend([sx, sy, sw, sh, dx, dy, dw, dh].map(JsValue::from_f64))
            }
        }
        self.call("drawImage", &argv)?;
        Ok(())
    }
}

type Spoofed = Rc<SpoofedContext2d<JsContext2d>>;

fn rect_from(args: &Array) -> Result<RectArgs> {
    Ok(RectArgs {
        x: arg_f64(args, 0)?,
        y: arg_f64(args, 1)?,
        width: arg_f64(args, 2)?,
        height: arg_f64(args, 3)?,
    })
}

fn draw_args_from(args: &Array) -> Result<DrawImageArgs> {
    let n = |i| arg_f64(args, i);
    Ok(match args.length() {
        3 => DrawImageArgs::At { dx: n(1)?, dy: n(2)? },
        5 => DrawImageArgs::Scaled { dx: n(1)?, dy: n(2)?, dw: n(3)?, dh: n(4)? },
        9 => DrawImageArgs::Cropped {
            sx: n(1)?,
            sy: n(2)?,
            sw: n(3)?,
            sh: n(4)?,
            dx: n(5)?,
            dy: n(6)?,
            dw: n(7)?,
            dh: n(8)?,
        },
        other => return Err(SpoofError::host(format!("drawImage with {other} arguments"))),
    })
}

fn metrics_object(native: JsValue, m: TextMetrics) -> Result<JsValue> {
    let trap = Closure::wrap(Box::new(move |target: JsValue, prop: JsValue, _recv: JsValue| -> JsValue {
        let value = match prop.as_string().as_deref() {
            Some("width") => m.width,
            Some("actualBoundingBoxLeft") => m.actual_bounding_box_left,
            Some("actualBoundingBoxRight") => m.actual_bounding_box_right,
            Some("actualBoundingBoxAscent") => m.actual_bounding_box_ascent,
            Some("actualBoundingBoxDescent") => m.actual_bounding_box_descent,
            _ => return Reflect::get(&target, &prop).unwrap_or(JsValue::UNDEFINED),
        };
        value.map_or_else(|| Reflect::get(&target, &prop).unwrap_or(JsValue::UNDEFINED), JsValue::from_f64)
    }) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>);
    Ok(proxy_object_with_get(&native, trap)?)
}

/// Register the wrapper for one special-cased context method. Any failure
/// on the Rust side replays the call on the native method.
fn context_method(
    methods: &js_sys::Map,
    ctx: &JsValue,
    spoofed: &Spoofed,
    method: &str,
    run: impl Fn(&SpoofedContext2d<JsContext2d>, &Array) -> Result<JsValue> + 'static,
) -> Result<()> {
    let Some(native) = get_method(ctx, method) else {
        return Ok(());
    };
    let target = ctx.clone();
    let spoofed = Rc::clone(spoofed);
    let label = method.to_string();
    let trap = Closure::wrap(Box::new(
        move |f: JsValue, _this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
            let args: Array = args.unchecked_into();
            run(&spoofed, &args).or_else(|err| {
                log::debug!("[canvas] {label}: native fallback ({err})");
                Reflect::apply(f.unchecked_ref::<Function>(), &target, &args)
            })
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> std::result::Result<JsValue, JsValue>>);
    methods.set(&method.into(), &proxy_function_with_apply(&native, trap)?);
    Ok(())
}

/// The Proxy handed to the page in place of a native 2D context.
pub fn wrap_context(ctx: JsValue, hooks: Canvas2dHooks<JsContext2d>, dpr: f64) -> Result<JsValue> {
    let spoofed: Spoofed = Rc::new(SpoofedContext2d::new(JsContext2d { ctx: ctx.clone() }, hooks, dpr));
    let methods = js_sys::Map::new();
    let (m, c, s) = (&methods, &ctx, &spoofed);

    context_method(m, c, s, "getImageData", |s, a| {
        let region = Region::new(
            arg_f64(a, 0)? as i32,
            arg_f64(a, 1)? as i32,
            arg_f64(a, 2)? as i32,
            arg_f64(a, 3)? as i32,
        );
        image_data_from(&s.get_image_data(region)?)
    })?;
    context_method(m, c, s, "measureText", |s, a| {
        let text = arg_string(a, 0)?;
        let native = s.native().call("measureText", &[text.as_str().into()])?;
        metrics_object(native, s.measure_text(&text)?)
    })?;
    context_method(m, c, s, "fillText", |s, a| {
        s.fill_text(&arg_string(a, 0)?, arg_f64(a, 1)?, arg_f64(a, 2)?, arg_opt_f64(a, 3))?;
        Ok(JsValue::UNDEFINED)
    })?;
    context_method(m, c, s, "strokeText", |s, a| {
        s.stroke_text(&arg_string(a, 0)?, arg_f64(a, 1)?, arg_f64(a, 2)?, arg_opt_f64(a, 3))?;
        Ok(JsValue::UNDEFINED)
    })?;
    context_method(m, c, s, "fillRect", |s, a| {
        s.fill_rect(rect_from(a)?)?;
        Ok(JsValue::UNDEFINED)
    })?;
    context_method(m, c, s, "strokeRect", |s, a| {
        s.stroke_rect(rect_from(a)?)?;
        Ok(JsValue::UNDEFINED)
    })?;
    context_method(m, c, s, "clearRect", |s, a| {
        s.clear_rect(rect_from(a)?)?;
        Ok(JsValue::UNDEFINED)
    })?;
    context_method(m, c, s, "drawImage", |s, a| {
        s.draw_image(&a.get(0), draw_args_from(a)?)?;
        Ok(JsValue::UNDEFINED)
    })?;

    let bound = js_sys::Map::new();
    let get_trap = Closure::wrap(Box::new(move |target: JsValue, prop: JsValue, _recv: JsValue| -> JsValue {
        let special = methods.get(&prop);
        if !special.is_undefined() {
            return special;
        }
        forward_get(&target, &prop, &bound)
    }) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>);
    Ok(proxy_object_with_get(&ctx, get_trap)?)
}

// ---------------------------------------------------------------------------
// Install
// ---------------------------------------------------------------------------

fn install_prototype(class: &'static str, proto: &JsValue, hooks: &CanvasHooks<JsCanvas>) -> Result<usize> {
    if let Some(f) = original(proto, "getContext") {
        NATIVE_GET_CONTEXT.with(|m| m.borrow_mut().insert(class, f));
    }
    if class == "HTMLCanvasElement" {
        if let Some(f) = original(proto, "toDataURL") {
            NATIVE_TO_DATA_URL.with(|slot| *slot.borrow_mut() = Some(f));
        }
    }

    let mut slots = canvas_prototype(proto);
    if apply_canvas_patches(&mut slots, hooks) == 0 {
        return Ok(0);
    }

    let mut installed = 0;
    let to_canvas = |this: &JsValue| JsCanvas::new(this.clone());

    if install_method(
        proto,
        "toDataURL",
        slots.to_data_url.clone(),
        move |this, args| Ok((to_canvas(this), encode_args(args, 0))),
        |url: String, _| Ok(url.into()),
    )? {
        installed += 1;
    }

    if install_method(
        proto,
        "toBlob",
        slots.to_blob.clone(),
        move |this, args| {
            let callback = args.get(0);
            if !callback.is_function() {
                return Err(SpoofError::host("toBlob without a callback"));
            }
            Ok((to_canvas(this), ToBlobArgs { encode: encode_args(args, 1), callback: None }))
        },
        |out: AsyncReturn<Blob>, args| {
            let callback: Function = args.get(0).unchecked_into();
            if let AsyncReturn::Pending(pending) = out {
                wasm_bindgen_futures::spawn_local(async move {
                    let value = match pending.await.and_then(|b| js_blob(&b)) {
                        Ok(v) => v,
                        Err(err) => {
                            log::debug!("[canvas] toBlob failed: {err}");
                            JsValue::NULL
                        }
                    };
                    let _ = callback.call1(&JsValue::UNDEFINED, &value);
                });
            }
            Ok(JsValue::UNDEFINED)
        },
    )? {
        installed += 1;
    }

    if install_method(
        proto,
        "convertToBlob",
        slots.convert_to_blob.clone(),
        move |this, args| {
            let opts = args.get(0);
            let mime = super::proxy_helpers::get_string(&opts, "type");
            let quality = super::proxy_helpers::get_f64(&opts, "quality");
            Ok((to_canvas(this), EncodeArgs::new(mime.as_deref(), quality)))
        },
        |out: AsyncReturn<Blob>, _| {
            Ok(match out {
                AsyncReturn::Pending(pending) => future_to_promise(async move {
                    let blob = pending.await?;
                    Ok(js_blob(&blob)?)
                })
                .into(),
                AsyncReturn::Dispatched => JsValue::UNDEFINED,
            })
        },
    )? {
        installed += 1;
    }

    if install_method(
        proto,
        "getContext",
        slots.get_context.clone(),
        move |this, args| {
            let kind = ContextKind::parse(&arg_string(args, 0)?);
            let canvas = JsCanvas {
                element: this.clone(),
                context_args: Some(args.clone()),
            };
            Ok((canvas, kind))
        },
        |ctx: Option<JsValue>, _| Ok(ctx.unwrap_or(JsValue::NULL)),
    )? {
        installed += 1;
    }
    Ok(installed)
}

/// Patch both canvas classes. Returns the number of methods replaced.
pub fn install(rt: &SpoofRuntime) -> Result<usize> {
    let hooks: CanvasHooks<JsCanvas> = rt.registry();
    let ctx_hooks: Canvas2dHooks<JsContext2d> = rt.registry();
    let dpr = rt.noise().dpr();
    hooks.wrap_contexts_with(move |_, kind, ctx| {
        if *kind != ContextKind::TwoD {
            return ctx;
        }
        match wrap_context(ctx.clone(), ctx_hooks.clone(), dpr) {
            Ok(proxy) => proxy,
            Err(err) => {
                log::debug!("[canvas] 2d context left unwrapped: {err}");
                ctx
            }
        }
    });

    let mut total = 0;
    for class in CANVAS_CLASSES {
        let Some(proto) = get_prototype(class) else {
            continue;
        };
        total += install_prototype(class, &proto, &hooks)?;
    }
    Ok(total)
}
