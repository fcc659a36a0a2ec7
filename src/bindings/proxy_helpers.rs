//! Proxy and Reflect wrappers used to put Rust wrappers in front of host
//! methods.
//!
//! Every trap installed here is a wasm closure, so `toString()` on a
//! patched method reports `[native code]` without any help.

use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

pub type ApplyTrap = Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>;
pub type GetTrap = Closure<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>;

/// A global constructor's prototype (`"HTMLCanvasElement"` gives
/// `HTMLCanvasElement.prototype`). `None` when the constructor does not
/// exist in this realm.
pub fn get_prototype(constructor_name: &str) -> Option<JsValue> {
    let ctor = get_global(constructor_name).ok()?;
    if ctor.is_undefined() || ctor.is_null() {
        return None;
    }
    Reflect::get(&ctor, &JsValue::from_str("prototype"))
        .ok()
        .filter(|p| p.is_object())
}

pub fn get_global(prop: &str) -> Result<JsValue, JsValue> {
    Reflect::get(&js_sys::global(), &JsValue::from_str(prop))
}

/// A method on `obj`, if it is callable.
pub fn get_method(obj: &JsValue, name: &str) -> Option<Function> {
    Reflect::get(obj, &JsValue::from_str(name))
        .ok()
        .and_then(|f| f.dyn_into::<Function>().ok())
}

fn proxy_ctor() -> Result<Function, JsValue> {
    get_global("Proxy")?
        .dyn_into()
        .map_err(|_| JsValue::from_str("Proxy not found"))
}

/// Create a Proxy around a target function with an `apply` trap.
/// The trap receives (target, thisArg, argumentsList).
pub fn proxy_function_with_apply(target: &JsValue, apply_trap: ApplyTrap) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &JsValue::from_str("apply"), apply_trap.as_ref())?;
    apply_trap.forget();
    Reflect::construct(&proxy_ctor()?, &Array::of2(target, &handler))
}

/// Create a Proxy around an object with a `get` trap. Writes go straight
/// to the target so accessor setters see the real object as `this`.
pub fn proxy_object_with_get(target: &JsValue, get_trap: GetTrap) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &JsValue::from_str("get"), get_trap.as_ref())?;
    get_trap.forget();

    let set_trap = Closure::wrap(Box::new(|target: JsValue, prop: JsValue, value: JsValue| -> bool {
        Reflect::set(&target, &prop, &value).unwrap_or(false)
    }) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> bool>);
    Reflect::set(&handler, &JsValue::from_str("set"), set_trap.as_ref())?;
    set_trap.forget();

    Reflect::construct(&proxy_ctor()?, &Array::of2(target, &handler))
}

/// Call a JS function with an arguments array via Reflect.apply.
pub fn call_function(func: &JsValue, this_arg: &JsValue, args: &JsValue) -> Result<JsValue, JsValue> {
    let func: &Function = func.unchecked_ref();
    Reflect::apply(func, this_arg, args.unchecked_ref())
}

/// Call `func` with `args` on `this_arg`.
pub fn invoke(func: &Function, this_arg: &JsValue, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let args: Array = args.iter().collect();
    Reflect::apply(func, this_arg, &args)
}

/// Read `prop` from `target`; functions come back bound to `target` and
/// memoised in `bound`, so repeated reads give the same function.
pub fn forward_get(target: &JsValue, prop: &JsValue, bound: &js_sys::Map) -> JsValue {
    let value = Reflect::get(target, prop).unwrap_or(JsValue::UNDEFINED);
    let Some(func) = value.dyn_ref::<Function>() else {
        return value;
    };
    let cached = bound.get(prop);
    if !cached.is_undefined() {
        return cached;
    }
    let b: JsValue = func.bind(target).into();
    bound.set(prop, &b);
    b
}

pub fn get_f64(obj: &JsValue, prop: &str) -> Option<f64> {
    Reflect::get(obj, &JsValue::from_str(prop)).ok().and_then(|v| v.as_f64())
}

pub fn get_string(obj: &JsValue, prop: &str) -> Option<String> {
    Reflect::get(obj, &JsValue::from_str(prop)).ok().and_then(|v| v.as_string())
}
