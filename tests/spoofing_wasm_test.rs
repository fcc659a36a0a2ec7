//! Browser integration tests for the installed patches.
//!
//! Run with: wasm-pack test --headless --chrome
//! (or --firefox)

#![cfg(target_arch = "wasm32")]

use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::*;

use envmask_wasm::bindings::{apply_environment, env_snapshot, publish_env_snapshot, spoof_status};
use envmask_wasm::SpoofConfig;

wasm_bindgen_test_configure!(run_in_browser);

fn setup() -> JsValue {
    let config = serde_wasm_bindgen::to_value(&SpoofConfig::with_seed("abc123")).unwrap();
    apply_environment(config).unwrap()
}

fn get(obj: &JsValue, prop: &str) -> JsValue {
    Reflect::get(obj, &JsValue::from_str(prop)).unwrap()
}

fn call(obj: &JsValue, method: &str, args: &[JsValue]) -> JsValue {
    let f: Function = get(obj, method).dyn_into().unwrap();
    let args: Array = args.iter().collect();
    Reflect::apply(&f, obj, &args).unwrap()
}

fn canvas(width: u32, height: u32) -> JsValue {
    let document = get(&js_sys::global(), "document");
    let canvas = call(&document, "createElement", &["canvas".into()]);
    Reflect::set(&canvas, &"width".into(), &width.into()).unwrap();
    Reflect::set(&canvas, &"height".into(), &height.into()).unwrap();
    canvas
}

fn prototype(class: &str) -> JsValue {
    get(&get(&js_sys::global(), class), "prototype")
}

fn strings(v: &JsValue) -> Vec<String> {
    Array::from(v).iter().filter_map(|s| s.as_string()).collect()
}

// ===== Bootstrap =====

#[wasm_bindgen_test]
fn apply_reports_installed_modules() {
    let status = setup();
    assert_eq!(get(&status, "initialized"), JsValue::TRUE);
    let applied = strings(&get(&status, "applied"));
    assert!(applied.iter().any(|m| m == "canvas"), "applied: {:?}", applied);
    assert_eq!(get(&spoof_status().unwrap(), "initialized"), JsValue::TRUE);
}

#[wasm_bindgen_test]
fn apply_rejects_missing_seed() {
    let config = serde_wasm_bindgen::to_value(&SpoofConfig::default()).unwrap();
    assert!(apply_environment(config).is_err());
}

#[wasm_bindgen_test]
fn second_apply_keeps_wrappers() {
    setup();
    let proto = prototype("HTMLCanvasElement");
    let before = get(&proto, "toDataURL");
    setup();
    assert!(Object::is(&before, &get(&proto, "toDataURL")));
}

// ===== Canvas =====

#[wasm_bindgen_test]
fn patched_methods_look_native() {
    setup();
    let to_data_url: Function = get(&prototype("HTMLCanvasElement"), "toDataURL").dyn_into().unwrap();
    let source: String = to_data_url.to_string().into();
    assert!(source.contains("[native code]"), "{}", source);
    assert_eq!(to_data_url.name(), "toDataURL");
}

#[wasm_bindgen_test]
fn solid_canvas_encodes_identically() {
    setup();
    let canvas = canvas(10, 10);
    let ctx = call(&canvas, "getContext", &["2d".into()]);
    Reflect::set(&ctx, &"fillStyle".into(), &"#ff0000".into()).unwrap();
    call(&ctx, "fillRect", &[0.into(), 0.into(), 10.into(), 10.into()]);

    let a = call(&canvas, "toDataURL", &[]);
    let b = call(&canvas, "toDataURL", &[]);
    assert_eq!(a.as_string().unwrap(), b.as_string().unwrap());
    assert!(a.as_string().unwrap().starts_with("data:image/png;base64,"));
}

#[wasm_bindgen_test]
fn context_is_stable_and_branded() {
    setup();
    let canvas = canvas(16, 16);
    let a = call(&canvas, "getContext", &["2d".into()]);
    let b = call(&canvas, "getContext", &["2d".into()]);
    assert!(Object::is(&a, &b));
    assert!(a.is_instance_of::<web_sys::CanvasRenderingContext2d>());
    assert!(Object::is(&get(&a, "canvas"), &canvas));
}

#[wasm_bindgen_test]
fn measure_text_fields_are_finite() {
    setup();
    let canvas = canvas(64, 16);
    let ctx = call(&canvas, "getContext", &["2d".into()]);
    let metrics = call(&ctx, "measureText", &["Hello".into()]);
    for field in ["width", "actualBoundingBoxAscent", "actualBoundingBoxDescent"] {
        let v = get(&metrics, field).as_f64().unwrap();
        assert!(v.is_finite(), "{field} = {v}");
    }
}

#[wasm_bindgen_test]
async fn to_blob_callback_still_fires() {
    setup();
    let canvas = canvas(8, 8);
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let cb = Closure::once_into_js(move |blob: JsValue| {
            resolve.call1(&JsValue::NULL, &blob).unwrap();
        });
        call(&canvas, "toBlob", &[cb]);
    });
    let blob = JsFuture::from(promise).await.unwrap();
    assert_eq!(get(&blob, "type").as_string().unwrap(), "image/png");
}

// ===== WebGL =====

#[wasm_bindgen_test]
fn webgl_extensions_are_whitelisted() {
    setup();
    let canvas = canvas(4, 4);
    let gl = call(&canvas, "getContext", &["webgl".into()]);
    if gl.is_null() {
        return;
    }
    let allowed = SpoofConfig::default().whitelists.webgl_extensions;
    for ext in strings(&call(&gl, "getSupportedExtensions", &[])) {
        assert!(allowed.contains(&ext), "{} is not whitelisted", ext);
    }
    assert!(call(&gl, "getExtension", &["EXT_disjoint_timer_query".into()]).is_null());
}

// ===== Sync =====

#[wasm_bindgen_test]
fn snapshot_is_published() {
    setup();
    publish_env_snapshot().unwrap();
    let snapshot = env_snapshot().unwrap();
    assert_eq!(get(&snapshot, "seed").as_string().unwrap(), "abc123");
}
