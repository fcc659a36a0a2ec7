//! WebGL prototype bindings for `WebGLRenderingContext` and
//! `WebGL2RenderingContext`.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Object, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::js_host::{arg_i32, arg_string, arg_u32, install_method, js_receiver, native_fn, original};
use super::proxy_helpers::{get_f64, get_method, get_prototype, invoke};
use crate::context::webgl::{apply_webgl_patches, PrecisionFormat, ReadPixelsArgs, ShaderKind, ShaderSourceArgs};
use crate::context::{shared_buf, GlReceiver, SharedBuf, WebGlHooks, WebGlPrototype};
use crate::error::{Result, SpoofError};
use crate::patch::NativeFn;
use crate::runtime::SpoofRuntime;

const GL_CLASSES: &[&str] = &["WebGLRenderingContext", "WebGL2RenderingContext"];

const SHADER_TYPE: u32 = 0x8B4F;

js_receiver!(
    /// A native WebGL context.
    JsGl
);

impl GlReceiver for JsGl {
    type Value = JsValue;
    type Handle = JsValue;

    fn shader_kind(&self, shader: &JsValue) -> Option<ShaderKind> {
        let f = get_method(&self.0, "getShaderParameter")?;
        let kind = invoke(&f, &self.0, &[shader.clone(), SHADER_TYPE.into()]).ok()?;
        ShaderKind::from_gl(kind.as_f64()? as u32)
    }
}

fn this_gl(gl: &JsGl) -> JsValue {
    gl.0.clone()
}

fn same(v: JsValue) -> Result<JsValue> {
    Ok(v)
}

fn nothing(_: JsValue) -> Result<()> {
    Ok(())
}

fn string_list(v: JsValue) -> Result<Option<Vec<String>>> {
    if v.is_null() || v.is_undefined() {
        return Ok(None);
    }
    let arr: Array = v.dyn_into().map_err(|_| SpoofError::host("extension list is not an array"))?;
    Ok(Some(arr.iter().filter_map(|s| s.as_string()).collect()))
}

fn precision_format(v: JsValue) -> Result<Option<PrecisionFormat>> {
    if v.is_null() || v.is_undefined() {
        return Ok(None);
    }
    let field = |name| get_f64(&v, name).map(|n| n as i32).unwrap_or(0);
    Ok(Some(PrecisionFormat {
        range_min: field("rangeMin"),
        range_max: field("rangeMax"),
        precision: field("precision"),
    }))
}

fn gl_prototype(proto: &JsValue) -> WebGlPrototype<JsGl> {
    WebGlPrototype {
        get_parameter: original(proto, "getParameter").map(|f| {
            native_fn("getParameter", f, this_gl, |p: u32| vec![p.into()], same)
        }),
        get_supported_extensions: original(proto, "getSupportedExtensions")
            .map(|f| native_fn("getSupportedExtensions", f, this_gl, |_: ()| Vec::new(), string_list)),
        get_extension: original(proto, "getExtension").map(|f| {
            native_fn("getExtension", f, this_gl, |name: String| vec![name.into()], same)
        }),
        // Reads into a scratch array of the caller's length; the result is
        // copied back to the caller's array after the hooks ran.
        read_pixels: original(proto, "readPixels").map(|f| {
            NativeFn::new("readPixels", move |gl: &JsGl, args: ReadPixelsArgs| {
                let Some(buf) = args.pixels else {
                    return Err(SpoofError::host("readPixels: no destination"));
                };
                let scratch = Uint8Array::new_with_length(buf.borrow().len() as u32);
                invoke(
                    &f,
                    &gl.0,
                    &[
                        args.x.into(),
                        args.y.into(),
                        args.width.into(),
                        args.height.into(),
                        args.format.into(),
                        args.kind.into(),
                        scratch.clone().into(),
                    ],
                )?;
                scratch.copy_to(&mut buf.borrow_mut());
                Ok(())
            })
        }),
        get_shader_precision_format: original(proto, "getShaderPrecisionFormat").map(|f| {
            native_fn(
                "getShaderPrecisionFormat",
                f,
                this_gl,
                |(shader, precision): (u32, u32)| vec![shader.into(), precision.into()],
                precision_format,
            )
        }),
        shader_source: original(proto, "shaderSource").map(|f| {
            native_fn(
                "shaderSource",
                f,
                this_gl,
                |a: ShaderSourceArgs<JsValue>| vec![a.shader, a.source.into()],
                nothing,
            )
        }),
        get_uniform: original(proto, "getUniform").map(|f| {
            native_fn("getUniform", f, this_gl, |(program, loc): (JsValue, JsValue)| vec![program, loc], same)
        }),
    }
}

fn recv(this: &JsValue) -> JsGl {
    JsGl(this.clone())
}

fn install_prototype(proto: &JsValue, hooks: &WebGlHooks<JsGl>) -> Result<usize> {
    let mut slots = gl_prototype(proto);
    if apply_webgl_patches(&mut slots, hooks) == 0 {
        return Ok(0);
    }
    // readPixels results travel from decode to encode through this cell.
    let pending: Rc<RefCell<Option<SharedBuf<u8>>>> = Rc::new(RefCell::new(None));
    let written = Rc::clone(&pending);
    let installed = [
        install_method(
            proto,
            "getParameter",
            slots.get_parameter.take(),
            |this, a| Ok((recv(this), arg_u32(a, 0)?)),
            |v, _| Ok(v),
        )?,
        install_method(
            proto,
            "getSupportedExtensions",
            slots.get_supported_extensions.take(),
            |this, _| Ok((recv(this), ())),
            |list: Option<Vec<String>>, _| {
                Ok(list.map_or(JsValue::NULL, |l| l.iter().map(|s| JsValue::from_str(s)).collect::<Array>().into()))
            },
        )?,
        install_method(
            proto,
            "getExtension",
            slots.get_extension.take(),
            |this, a| Ok((recv(this), arg_string(a, 0)?)),
            |v, _| Ok(v),
        )?,
        install_method(
            proto,
            "readPixels",
            slots.read_pixels.take(),
            move |this, a| {
                let dest = a.get(6);
                let Some(view) = dest.dyn_ref::<Uint8Array>() else {
                    return Err(SpoofError::Unsupported("readPixels into a non-Uint8Array".into()));
                };
                let args = ReadPixelsArgs {
                    x: arg_i32(a, 0)?,
                    y: arg_i32(a, 1)?,
                    width: arg_i32(a, 2)?,
                    height: arg_i32(a, 3)?,
                    format: arg_u32(a, 4)?,
                    kind: arg_u32(a, 5)?,
                    pixels: Some(shared_buf(view.to_vec())),
                };
                *pending.borrow_mut() = args.pixels.clone();
                Ok((recv(this), args))
            },
            move |(), a| {
                if let Some(buf) = written.borrow_mut().take() {
                    let buf = buf.borrow();
                    let dest: Uint8Array = a.get(6).unchecked_into();
                    if dest.length() as usize == buf.len() {
                        dest.copy_from(&buf);
                    }
                }
                Ok(JsValue::UNDEFINED)
            },
        )?,
        install_method(
            proto,
            "getShaderPrecisionFormat",
            slots.get_shader_precision_format.take(),
            |this, a| Ok((recv(this), (arg_u32(a, 0)?, arg_u32(a, 1)?))),
            |pf: Option<PrecisionFormat>, _| {
                let Some(pf) = pf else {
                    return Ok(JsValue::NULL);
                };
                let obj = Object::new();
                Reflect::set(&obj, &"rangeMin".into(), &pf.range_min.into())?;
                Reflect::set(&obj, &"rangeMax".into(), &pf.range_max.into())?;
                Reflect::set(&obj, &"precision".into(), &pf.precision.into())?;
                Ok(Object::freeze(&obj).into())
            },
        )?,
        install_method(
            proto,
            "shaderSource",
            slots.shader_source.take(),
            |this, a| {
                let args = ShaderSourceArgs {
                    shader: a.get(0),
                    source: arg_string(a, 1)?,
                };
                Ok((recv(this), args))
            },
            |(), _| Ok(JsValue::UNDEFINED),
        )?,
        install_method(
            proto,
            "getUniform",
            slots.get_uniform.take(),
            |this, a| Ok((recv(this), (a.get(0), a.get(1)))),
            |v, _| Ok(v),
        )?,
    ];
    Ok(installed.iter().filter(|i| **i).count())
}

/// Patch every WebGL context class present. Returns the number of methods
/// replaced.
pub fn install(rt: &SpoofRuntime) -> Result<usize> {
    let hooks: WebGlHooks<JsGl> = rt.registry();
    let mut total = 0;
    for class in GL_CLASSES {
        if let Some(proto) = get_prototype(class) {
            total += install_prototype(&proto, &hooks)?;
        }
    }
    Ok(total)
}
