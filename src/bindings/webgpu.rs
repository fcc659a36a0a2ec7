//! `GPU.prototype.requestAdapter` binding. Adapters and devices come back
//! as proxies over the native objects with masked features, limits and
//! info.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use js_sys::{Array, Map, Object, Promise, Reflect, Set};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

use super::proxy_helpers::{
    call_function, forward_get, get_method, get_prototype, get_string, invoke, proxy_function_with_apply,
    proxy_object_with_get,
};
use crate::context::webgpu::{DeviceDescriptor, GpuDevice, MaskedDevice, NativeAdapterInfo, WebGpuHooks};
use crate::context::{GpuAdapter, MaskedAdapter, MaskedFeatures, MaskedLimits};
use crate::error::{Result, SpoofError};
use crate::runtime::SpoofRuntime;

/// A native `GPUAdapter`. `descriptor` holds the page's last
/// `requestDevice` argument so fields we do not model reach the host.
#[derive(Debug, Clone)]
pub struct JsGpuAdapter {
    adapter: JsValue,
    descriptor: Rc<RefCell<JsValue>>,
}

impl JsGpuAdapter {
    pub fn new(adapter: JsValue) -> Self {
        Self {
            adapter,
            descriptor: Rc::new(RefCell::new(JsValue::UNDEFINED)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsGpuDevice(pub JsValue);

fn read_features(obj: &JsValue) -> Vec<String> {
    match Reflect::get(obj, &"features".into()) {
        Ok(set) if set.is_object() => Array::from(&set).iter().filter_map(|f| f.as_string()).collect(),
        _ => Vec::new(),
    }
}

/// `GPUSupportedLimits` keeps its values behind prototype getters, so the
/// prototype's names are read along with the object's own.
fn read_limits(obj: &JsValue) -> Vec<(String, f64)> {
    let Ok(limits) = Reflect::get(obj, &"limits".into()) else {
        return Vec::new();
    };
    if !limits.is_object() {
        return Vec::new();
    }
    let mut names: Vec<String> = Vec::new();
    let proto: JsValue = Object::get_prototype_of(&limits).into();
    for src in [&limits, &proto] {
        if !src.is_object() {
            continue;
        }
        for key in Object::get_own_property_names(src.unchecked_ref::<Object>()).iter() {
            if let Some(k) = key.as_string() {
                if !names.contains(&k) {
                    names.push(k);
                }
            }
        }
    }
    names
        .into_iter()
        .filter_map(|n| {
            let v = Reflect::get(&limits, &JsValue::from_str(&n)).ok()?.as_f64()?;
            Some((n, v))
        })
        .collect()
}

fn json_field(obj: &JsValue, prop: &str) -> Option<serde_json::Value> {
    let v = Reflect::get(obj, &JsValue::from_str(prop)).ok()?;
    if v.is_undefined() || v.is_null() {
        return None;
    }
    serde_wasm_bindgen::from_value(v).ok()
}

impl GpuDevice for JsGpuDevice {
    fn features(&self) -> Vec<String> {
        read_features(&self.0)
    }

    fn limits(&self) -> Vec<(String, f64)> {
        read_limits(&self.0)
    }
}

impl GpuAdapter for JsGpuAdapter {
    type Device = JsGpuDevice;

    fn features(&self) -> Vec<String> {
        read_features(&self.adapter)
    }

    fn limits(&self) -> Vec<(String, f64)> {
        read_limits(&self.adapter)
    }

    fn info(&self) -> NativeAdapterInfo {
        let info = Reflect::get(&self.adapter, &"info".into()).unwrap_or(JsValue::UNDEFINED);
        if !info.is_object() {
            return NativeAdapterInfo::default();
        }
        let size = |prop: &str| Reflect::get(&info, &JsValue::from_str(prop)).ok()?.as_f64().map(|n| n as u32);
        NativeAdapterInfo {
            vendor: get_string(&info, "vendor"),
            architecture: get_string(&info, "architecture"),
            device: get_string(&info, "device"),
            description: get_string(&info, "description"),
            adapter_type: get_string(&info, "type"),
            driver: get_string(&info, "driver"),
            backend: get_string(&info, "backend"),
            memory_heaps: json_field(&info, "memoryHeaps"),
            d3d_shader_model: json_field(&info, "d3dShaderModel"),
            vk_driver_version: json_field(&info, "vkDriverVersion"),
            subgroup_matrix_configs: json_field(&info, "subgroupMatrixConfigs"),
            subgroup_max_size: size("subgroupMaxSize"),
            subgroup_min_size: size("subgroupMinSize"),
        }
    }

    fn request_device(&self, desc: DeviceDescriptor) -> LocalBoxFuture<'static, Result<JsGpuDevice>> {
        let call = (|| -> Result<Promise> {
            let js_desc = Object::new();
            let base = self.descriptor.borrow().clone();
            if base.is_object() {
                Object::assign(&js_desc, base.unchecked_ref());
            }
            let features: Array = desc.required_features.iter().map(|f| JsValue::from_str(f)).collect();
            Reflect::set(&js_desc, &"requiredFeatures".into(), &features)?;
            if let Some(label) = &desc.label {
                Reflect::set(&js_desc, &"label".into(), &JsValue::from_str(label))?;
            }
            let f = get_method(&self.adapter, "requestDevice")
                .ok_or_else(|| SpoofError::Unsupported("GPUAdapter.requestDevice".into()))?;
            invoke(&f, &self.adapter, &[js_desc.into()])?
                .dyn_into::<Promise>()
                .map_err(|_| SpoofError::host("requestDevice did not return a promise"))
        })();
        async move {
            let device = JsFuture::from(call?).await?;
            Ok::<_, SpoofError>(JsGpuDevice(device))
        }
        .boxed_local()
    }
}

fn features_set(features: &MaskedFeatures) -> JsValue {
    let set = Set::new(&JsValue::UNDEFINED);
    for f in features.values() {
        set.add(&JsValue::from_str(f));
    }
    set.into()
}

fn limits_object(limits: &MaskedLimits) -> JsValue {
    let obj = Object::new();
    for key in limits.keys() {
        if let Some(v) = limits.get(key) {
            // Frozen plain object; a failed set only drops the key.
            let _ = Reflect::set(&obj, &JsValue::from_str(key), &JsValue::from_f64(v));
        }
    }
    Object::freeze(&obj).into()
}

/// `memo[prop]`, built by `make` on the first read.
fn memoised(memo: &Map, prop: &JsValue, make: impl FnOnce() -> JsValue) -> JsValue {
    let cached = memo.get(prop);
    if !cached.is_undefined() {
        return cached;
    }
    let value = make();
    memo.set(prop, &value);
    value
}

fn device_proxy(device: MaskedDevice<JsGpuDevice>) -> Result<JsValue> {
    let target = device.native().0.clone();
    let memo = Map::new();
    let bound = Map::new();
    let trap = Closure::wrap(Box::new(move |target: JsValue, prop: JsValue, _receiver: JsValue| -> JsValue {
        let Some(name) = prop.as_string() else {
            return forward_get(&target, &prop, &bound);
        };
        match name.as_str() {
            "features" => {
                let features = device.features();
                memoised(&memo, &prop, || features_set(features))
            }
            "limits" => {
                let limits = device.limits();
                memoised(&memo, &prop, || limits_object(limits))
            }
            _ => {
                device.property(&name);
                forward_get(&target, &prop, &bound)
            }
        }
    }) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>);
    Ok(proxy_object_with_get(&target, trap)?)
}

fn request_device_fn(adapter: Rc<MaskedAdapter<JsGpuAdapter>>) -> JsValue {
    Closure::wrap(Box::new(move |desc: JsValue| -> Promise {
        let parsed: DeviceDescriptor = if desc.is_object() {
            serde_wasm_bindgen::from_value(desc.clone()).unwrap_or_default()
        } else {
            DeviceDescriptor::default()
        };
        adapter.native().descriptor.replace(desc);
        let pending = adapter.request_device(parsed);
        future_to_promise(async move {
            let device = pending.await?;
            Ok(device_proxy(device)?)
        })
    }) as Box<dyn FnMut(JsValue) -> Promise>)
    .into_js_value()
}

fn adapter_proxy(native: JsValue, hooks: &WebGpuHooks) -> Result<JsValue> {
    let adapter = Rc::new(hooks.mask_adapter(JsGpuAdapter::new(native.clone())));
    let memo = Map::new();
    let bound = Map::new();
    let trap = Closure::wrap(Box::new(move |target: JsValue, prop: JsValue, _receiver: JsValue| -> JsValue {
        let Some(name) = prop.as_string() else {
            return forward_get(&target, &prop, &bound);
        };
        match name.as_str() {
            "features" => {
                let features = adapter.features();
                memoised(&memo, &prop, || features_set(features))
            }
            "limits" => {
                let limits = adapter.limits();
                memoised(&memo, &prop, || limits_object(limits))
            }
            "info" => {
                let info = adapter.info();
                memoised(&memo, &prop, || {
                    serde_wasm_bindgen::to_value(info)
                        .map(|v| Object::freeze(v.unchecked_ref::<Object>()).into())
                        .unwrap_or(JsValue::UNDEFINED)
                })
            }
            "isFallbackAdapter" => JsValue::from_bool(adapter.is_fallback_adapter()),
            "requestDevice" => {
                adapter.property(&name);
                let adapter = Rc::clone(&adapter);
                memoised(&memo, &prop, || request_device_fn(adapter))
            }
            _ => {
                adapter.property(&name);
                forward_get(&target, &prop, &bound)
            }
        }
    }) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> JsValue>);
    Ok(proxy_object_with_get(&native, trap)?)
}

fn patch_preferred_canvas_format(proto: &JsValue, hooks: &WebGpuHooks) -> Result<usize> {
    let Some(target) = get_method(proto, "getPreferredCanvasFormat") else {
        return Ok(0);
    };
    let hooks = hooks.clone();
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
            let native = call_function(&target, &this, &args)?;
            Ok(match native.as_string() {
                Some(format) => JsValue::from_str(&hooks.preferred_canvas_format(&format)),
                None => native,
            })
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> std::result::Result<JsValue, JsValue>>);
    let proxy = proxy_function_with_apply(&target, trap)?;
    Reflect::set(proto, &"getPreferredCanvasFormat".into(), &proxy)?;
    Ok(1)
}

/// Patch `GPU.prototype.requestAdapter` and `getPreferredCanvasFormat`.
/// Returns the number of methods replaced.
pub fn install(rt: &SpoofRuntime) -> Result<usize> {
    let Some(proto) = get_prototype("GPU") else {
        return Ok(0);
    };
    let hooks: WebGpuHooks = rt.registry();
    let patched = patch_preferred_canvas_format(&proto, &hooks)?;
    let Some(target) = get_method(&proto, "requestAdapter") else {
        return Ok(patched);
    };
    let trap = Closure::wrap(Box::new(
        move |target: JsValue, this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
            let promise: Promise = call_function(&target, &this, &args)?
                .dyn_into()
                .map_err(|_| JsValue::from_str("requestAdapter did not return a promise"))?;
            let hooks = hooks.clone();
            Ok(future_to_promise(async move {
                let adapter = JsFuture::from(promise).await?;
                if !adapter.is_object() {
                    return Ok(adapter);
                }
                match adapter_proxy(adapter.clone(), &hooks) {
                    Ok(proxy) => Ok(proxy),
                    Err(err) => {
                        log::warn!("[webgpu] adapter left unmasked: {err}");
                        Ok(adapter)
                    }
                }
            })
            .into())
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> std::result::Result<JsValue, JsValue>>);
    let proxy = proxy_function_with_apply(&target, trap)?;
    Reflect::set(&proto, &"requestAdapter".into(), &proxy)?;
    Ok(patched + 1)
}
