//! JS objects as patch receivers, and the glue that puts a patched slot
//! behind a prototype method.

use std::cell::RefCell;
use std::collections::HashMap;

use js_sys::{Array, Function, Object, Reflect, WeakSet};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use super::proxy_helpers::{call_function, proxy_function_with_apply};
use crate::context::GlValue;
use crate::error::{Result, SpoofError};
use crate::patch::NativeFn;

thread_local! {
    static FLAGS: RefCell<HashMap<String, WeakSet>> = RefCell::new(HashMap::new());
}

/// Per-object flags, kept out of the object itself so pages cannot see them.
pub fn flag_is_set(obj: &JsValue, flag: &str) -> bool {
    if !obj.is_object() {
        return false;
    }
    let obj: &Object = obj.unchecked_ref();
    FLAGS.with(|f| f.borrow().get(flag).is_some_and(|set| set.has(obj)))
}

pub fn set_flag(obj: &JsValue, flag: &str, on: bool) {
    if !obj.is_object() {
        return;
    }
    let obj: &Object = obj.unchecked_ref();
    FLAGS.with(|f| {
        let mut sets = f.borrow_mut();
        let set = sets.entry(flag.to_string()).or_insert_with(WeakSet::new);
        if on {
            set.add(obj);
        } else {
            set.delete(obj);
        }
    });
}

/// A newtype over a host object that can receive patched calls.
macro_rules! js_receiver {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name(pub wasm_bindgen::JsValue);

        impl $crate::patch::Receiver for $name {
            fn flag_is_set(&self, flag: &str) -> bool {
                $crate::bindings::js_host::flag_is_set(&self.0, flag)
            }

            fn set_flag(&self, flag: &str, on: bool) {
                $crate::bindings::js_host::set_flag(&self.0, flag, on)
            }
        }
    };
}

pub(crate) use js_receiver;

impl GlValue for JsValue {
    fn null() -> Self {
        JsValue::NULL
    }

    fn string(s: &str) -> Self {
        JsValue::from_str(s)
    }

    fn number(v: f64) -> Self {
        JsValue::from_f64(v)
    }

    fn as_number(&self) -> Option<f64> {
        self.as_f64()
    }

    fn is_null(&self) -> bool {
        JsValue::is_null(self)
    }
}

/// The callable currently on `proto[method]`.
pub fn original(proto: &JsValue, method: &str) -> Option<Function> {
    super::proxy_helpers::get_method(proto, method)
}

/// A [`NativeFn`] calling `func` on the receiver's object.
pub fn native_fn<R, A, O>(
    name: &str,
    func: Function,
    this: impl Fn(&R) -> JsValue + 'static,
    args: impl Fn(A) -> Vec<JsValue> + 'static,
    out: impl Fn(JsValue) -> Result<O> + 'static,
) -> NativeFn<R, A, O> {
    NativeFn::new(name, move |recv: &R, a: A| {
        let argv: Array = args(a).iter().collect();
        let value = Reflect::apply(&func, &this(recv), &argv)?;
        out(value)
    })
}

/// Put `slot` behind `proto[method]` as an `apply` trap on the original.
///
/// `decode` turns a JS call into the slot's receiver and arguments; when it
/// fails the original runs with the untouched arguments. `encode` turns the
/// slot's result back into a JS value and may write into the caller's
/// arguments. Returns false when the slot holds no wrapper.
pub fn install_method<R, A, O>(
    proto: &JsValue,
    method: &str,
    slot: Option<NativeFn<R, A, O>>,
    decode: impl Fn(&JsValue, &Array) -> Result<(R, A)> + 'static,
    encode: impl Fn(O, &Array) -> Result<JsValue> + 'static,
) -> Result<bool>
where
    R: 'static,
    A: 'static,
    O: 'static,
{
    let Some(patched) = slot.filter(NativeFn::is_wrapped) else {
        return Ok(false);
    };
    let Some(target) = original(proto, method) else {
        log::warn!("[bindings] {method}: not present, skipped");
        return Ok(false);
    };
    let label = method.to_string();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
            let args: Array = args.unchecked_into();
            let (recv, a) = match decode(&this, &args) {
                Ok(decoded) => decoded,
                Err(err) => {
                    log::debug!("[bindings] {label}: passing through ({err})");
                    return call_function(&target, &this, &args);
                }
            };
            let out = patched.call(&recv, a)?;
            Ok(encode(out, &args)?)
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> std::result::Result<JsValue, JsValue>>);
    let proxy = proxy_function_with_apply(&target, trap)?;
    Reflect::set(proto, &JsValue::from_str(method), &proxy)?;
    Ok(true)
}

pub fn arg_f64(args: &Array, idx: u32) -> Result<f64> {
    args.get(idx)
        .as_f64()
        .ok_or_else(|| SpoofError::host(format!("argument {idx} is not a number")))
}

pub fn arg_u32(args: &Array, idx: u32) -> Result<u32> {
    Ok(arg_f64(args, idx)? as u32)
}

pub fn arg_i32(args: &Array, idx: u32) -> Result<i32> {
    Ok(arg_f64(args, idx)? as i32)
}

pub fn arg_string(args: &Array, idx: u32) -> Result<String> {
    args.get(idx)
        .as_string()
        .ok_or_else(|| SpoofError::host(format!("argument {idx} is not a string")))
}

/// An optional trailing number: absent and `undefined` are `None`.
pub fn arg_opt_f64(args: &Array, idx: u32) -> Option<f64> {
    if idx < args.length() {
        args.get(idx).as_f64()
    } else {
        None
    }
}
