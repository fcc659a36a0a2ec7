//! Whole-pipeline checks: a configured runtime installed into a software
//! realm, exercised the way page script would.

use std::cell::Cell;
use std::rc::Rc;

use futures::executor::block_on;

use crate::config::SpoofConfig;
use crate::context::webgl::{UNMASKED_RENDERER_WEBGL, UNMASKED_VENDOR_WEBGL};
use crate::context::{shared_buf, CanvasHooks, Context2d, EncodeArgs, SurfaceHooks, ToBlobArgs};
use crate::host::{SoftwareAnalyser, SoftwareCanvas, SoftwareGl, SoftwareGlValue, SoftwareGpuAdapter, SoftwareOfflineContext, SoftwareRealm};
use crate::noise::{png, ImageBuffer};
use crate::patch::AsyncReturn;
use crate::rng::derive_stream;
use crate::runtime::SpoofRuntime;
use crate::sync::{BroadcastBus, EnvHub, EnvSnapshot, SnapshotMirror};

fn runtime(seed: &str) -> SpoofRuntime {
    SpoofRuntime::new(SpoofConfig::with_seed(seed)).unwrap()
}

fn installed(seed: &str) -> (SpoofRuntime, SoftwareRealm) {
    let rt = runtime(seed);
    let realm = SoftwareRealm::new();
    realm.install(&rt);
    (rt, realm)
}

fn diagonal(size: u32) -> ImageBuffer {
    let mut img = ImageBuffer::filled(size, size, [0, 0, 0, 255]);
    for y in 0..size {
        for x in 0..size {
            if x > y {
                img.set_pixel(x, y, [255, 0, 0, 255]);
            }
        }
    }
    img
}

fn pending<T>(ret: AsyncReturn<T>) -> T {
    match ret {
        AsyncReturn::Pending(fut) => block_on(fut).unwrap(),
        AsyncReturn::Dispatched => panic!("expected the promise branch"),
    }
}

#[test]
fn test_streams_reproduce_and_stay_independent() {
    let draw = |name: &str| -> Vec<f64> {
        let s = derive_stream("abc123", name).unwrap();
        (0..16).map(|_| s.next()).collect()
    };
    assert_eq!(draw("x"), draw("x"));
    assert_ne!(draw("a"), draw("b"));

    // The runtime's streams start where a fresh derivation does.
    let rt = runtime("abc123");
    let fresh = derive_stream("abc123", "webgl").unwrap();
    assert_eq!(rt.noise().stream("webgl").next(), fresh.next());
}

#[test]
fn test_solid_canvas_encodes_identically() {
    let (_rt, realm) = installed("abc123");
    let canvas = SoftwareCanvas::from_image(ImageBuffer::filled(10, 10, [255, 0, 0, 255]));

    let first = realm.to_data_url(&canvas, EncodeArgs::png()).unwrap();
    let second = realm.to_data_url(&canvas, EncodeArgs::png()).unwrap();
    assert_eq!(first, second);
    assert_eq!(canvas.native_encodes(), 1);

    // A flat image is left alone by the resampler.
    let raw = png::to_data_url("image/png", &png::encode_rgba(&canvas.pixels()));
    assert_eq!(first, raw);
}

#[test]
fn test_edge_canvas_is_noised_but_keeps_dimensions() {
    let (_rt, realm) = installed("abc123");
    let canvas = SoftwareCanvas::from_image(diagonal(10));

    let url = realm.to_data_url(&canvas, EncodeArgs::png()).unwrap();
    let raw = png::to_data_url("image/png", &png::encode_rgba(&diagonal(10)));
    assert_ne!(url, raw);

    let (mime, bytes) = png::parse_data_url(&url).unwrap();
    assert_eq!(mime, "image/png");
    assert_eq!(png::dimensions(&bytes).unwrap(), (10, 10));

    // Encoding never writes back into the canvas.
    assert_eq!(canvas.pixels(), diagonal(10));
}

#[test]
fn test_encode_paths_agree() {
    let (_rt, realm) = installed("abc123");
    let canvas = SoftwareCanvas::from_image(diagonal(12));

    let url = realm.to_data_url(&canvas, EncodeArgs::png()).unwrap();
    let blob = pending(realm.to_blob(&canvas, ToBlobArgs::default()).unwrap());
    let converted = block_on(realm.convert_to_blob(&canvas, EncodeArgs::png())).unwrap();

    assert_eq!(blob.to_data_url(), url);
    assert_eq!(converted, blob);
}

#[test]
fn test_same_content_on_two_canvases_matches() {
    let (_rt, realm) = installed("abc123");
    let a = SoftwareCanvas::from_image(diagonal(10));
    let b = SoftwareCanvas::from_image(diagonal(10));
    assert_eq!(
        realm.to_data_url(&a, EncodeArgs::png()).unwrap(),
        realm.to_data_url(&b, EncodeArgs::png()).unwrap()
    );
}

#[test]
fn test_seed_changes_encoded_output() {
    let (_a, realm_a) = installed("abc123");
    let (_b, realm_b) = installed("another-seed");
    let canvas_a = SoftwareCanvas::from_image(diagonal(16));
    let canvas_b = SoftwareCanvas::from_image(diagonal(16));
    assert_ne!(
        realm_a.to_data_url(&canvas_a, EncodeArgs::png()).unwrap(),
        realm_b.to_data_url(&canvas_b, EncodeArgs::png()).unwrap()
    );
}

#[test]
fn test_context_is_proxied_once() {
    let (_rt, realm) = installed("abc123");
    let canvas = SoftwareCanvas::new(32, 16);

    let a = realm.get_context(&canvas, "2d").unwrap().unwrap();
    let b = realm.get_context(&canvas, "2d").unwrap().unwrap();
    assert!(Rc::ptr_eq(a.as_2d().unwrap(), b.as_2d().unwrap()));

    // The proxy fills in the metrics the native context leaves out.
    let native = canvas.native_2d().measure_text("Hello").unwrap();
    let spoofed = a.as_2d().unwrap().measure_text("Hello").unwrap();
    assert!(!native.is_complete());
    assert!(spoofed.is_complete());
    assert_eq!(spoofed, a.as_2d().unwrap().measure_text("Hello").unwrap());

    assert!(realm.get_context(&canvas, "bitmaprenderer").unwrap().is_none());
}

#[test]
fn test_webgl_surface_is_masked() {
    let (rt, realm) = installed("abc123");
    let gl = SoftwareGl::new(ImageBuffer::filled(4, 4, [9, 9, 9, 255]));
    let proto = realm.webgl();

    let exts = proto.get_supported_extensions.as_ref().unwrap().call(&gl, ()).unwrap().unwrap();
    let whitelist = &rt.config().whitelists.webgl_extensions;
    assert!(!exts.is_empty());
    assert!(exts.iter().all(|e| whitelist.contains(e)));
    assert!(!exts.iter().any(|e| e == "EXT_disjoint_timer_query"));

    let get_ext = proto.get_extension.as_ref().unwrap();
    assert_eq!(get_ext.call(&gl, "EXT_disjoint_timer_query".into()).unwrap(), SoftwareGlValue::Null);

    let get_param = proto.get_parameter.as_ref().unwrap();
    let device = &rt.config().device;
    assert_eq!(
        get_param.call(&gl, UNMASKED_VENDOR_WEBGL).unwrap(),
        SoftwareGlValue::Str(device.webgl_unmasked_vendor.clone())
    );
    assert_eq!(
        get_param.call(&gl, UNMASKED_RENDERER_WEBGL).unwrap(),
        SoftwareGlValue::Str(device.webgl_unmasked_renderer.clone())
    );
}

#[test]
fn test_webgpu_features_are_whitelist_intersection() {
    let mut config = SpoofConfig::with_seed("abc123");
    config.whitelists.webgpu_features = vec!["texture-compression-bc".into()];
    let rt = SpoofRuntime::new(config).unwrap();
    let realm = SoftwareRealm::new();
    realm.install(&rt);

    let native = SoftwareGpuAdapter {
        features: vec!["texture-compression-bc".into(), "shader-f16".into()],
        ..SoftwareGpuAdapter::default()
    };
    let adapter = realm.request_adapter(native).unwrap();
    let features: Vec<&str> = adapter.features().values().collect();
    assert_eq!(features, vec!["texture-compression-bc"]);

    let whitelist = &rt.config().whitelists.webgpu_limits;
    assert!(adapter.limits().keys().all(|k| whitelist.iter().any(|w| w == k)));
    // Not in the native limits, so never reported.
    assert!(!adapter.limits().has("maxTextureDimension3D"));
}

#[test]
fn test_webgpu_adapter_info_and_canvas_format() {
    let mut config = SpoofConfig::with_seed("abc123");
    config.whitelists.webgpu_formats = vec!["rgba8unorm".into(), "r8unorm".into()];
    let rt = SpoofRuntime::new(config).unwrap();
    let realm = SoftwareRealm::new();
    realm.install(&rt);

    let adapter = realm.request_adapter(SoftwareGpuAdapter::default()).unwrap();
    adapter.info();
    let gpu: crate::context::webgpu::WebGpuHooks = rt.registry();
    assert!(gpu.log.is_empty());

    assert_eq!(realm.preferred_canvas_format("bgra8unorm").unwrap(), "rgba8unorm");
    assert_eq!(realm.preferred_canvas_format("rgba8unorm").unwrap(), "rgba8unorm");
    assert!(SoftwareRealm::new().preferred_canvas_format("bgra8unorm").is_err());
}

#[test]
fn test_analyser_reads_keep_pair_sums_and_bounds() {
    let (rt, realm) = installed("abc123");
    let node = SoftwareAnalyser::new(Some(rt.noise().analyser_defaults()));
    let native = crate::host::software::analyser_prototype();

    let raw = shared_buf(vec![0.0f32; 64]);
    native.get_float_frequency_data.as_ref().unwrap().call(&node, Rc::clone(&raw)).unwrap();
    let spoofed = shared_buf(vec![0.0f32; 64]);
    realm
        .analyser()
        .get_float_frequency_data
        .as_ref()
        .unwrap()
        .call(&node, Rc::clone(&spoofed))
        .unwrap();

    let (raw, spoofed) = (raw.borrow(), spoofed.borrow());
    assert_ne!(*raw, *spoofed);
    let params = rt.noise().analyser_defaults();
    let n = raw.len();
    for i in 0..n / 2 {
        let before = raw[i] + raw[n - 1 - i];
        let after = spoofed[i] + spoofed[n - 1 - i];
        assert!((before - after).abs() < 1e-3, "pair {i}: {before} vs {after}");
    }
    for v in spoofed.iter() {
        assert!(f64::from(*v) >= params.min_decibels && f64::from(*v) <= params.max_decibels);
    }
}

#[test]
fn test_offline_render_is_noised_within_range() {
    let (_rt, realm) = installed("abc123");
    let ctx = SoftwareOfflineContext::new(2, 4096, 44100.0);
    let rendered = block_on(realm.start_rendering(&ctx)).unwrap();

    let native = pending(
        crate::host::software::offline_prototype()
            .start_rendering
            .unwrap()
            .call(&ctx, ())
            .unwrap(),
    );
    use crate::context::RenderedBuffer;
    let a = rendered.channel_data(0).unwrap();
    let b = native.channel_data(0).unwrap();
    assert_eq!(a.len(), b.len());
    assert_ne!(a, b);
    assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
    assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 0.01));
}

#[test]
fn test_second_install_is_a_noop() {
    let (rt, realm) = installed("abc123");
    assert!(realm.install(&rt).is_empty());

    // A second runtime finds every slot already wrapped.
    let other = runtime("other-seed");
    let again = realm.install(&other);
    assert!(!again.iter().any(|m| m == "canvas" || m == "webgl" || m == "audio"));

    let hooks: CanvasHooks<SoftwareCanvas> = rt.registry();
    let before = hooks.hook_count();
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    hooks.get_context.post.add(move |_, _, _| {
        seen.set(seen.get() + 1);
        Ok(None)
    });
    assert_eq!(hooks.hook_count(), before + 1);

    let canvas = SoftwareCanvas::from_image(diagonal(8));
    realm.get_context(&canvas, "webgl").unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_worker_mirrors_main_realm_snapshot() {
    let rt = runtime("abc123");
    let bus = BroadcastBus::new();
    let main = EnvHub::new(bus.join());
    let worker = EnvHub::new(bus.join());

    let mirror = SnapshotMirror::new(EnvSnapshot::default());
    mirror.attach(&worker);

    main.publish(EnvSnapshot::from_config(rt.config())).unwrap();
    assert!(!mirror.has_synced());
    assert_eq!(mirror.current().seed, "");

    assert_eq!(bus.deliver(), 1);
    let seen = mirror.current();
    assert_eq!(seen.seed, "abc123");
    assert_eq!(seen.languages, rt.config().device.languages);
    assert_eq!(seen.dpr, Some(rt.noise().dpr()));
    assert_eq!(worker.snapshot(), main.snapshot());
}

#[test]
fn test_worker_encodes_like_main_realm_after_sync() {
    let (main_rt, main_realm) = installed("main-realm-seed");
    let (worker_rt, worker_realm) = installed("worker-realm-seed");
    let worker_rt = Rc::new(worker_rt);
    let bus = BroadcastBus::new();
    let main = EnvHub::new(bus.join());
    let worker = EnvHub::new(bus.join());

    let mirror = SnapshotMirror::new(worker_rt.snapshot());
    let adopter = Rc::clone(&worker_rt);
    mirror.attach_with(&worker, move |snap| adopter.adopt_snapshot(snap).unwrap());

    let main_canvas = SoftwareCanvas::from_image(diagonal(32));
    let worker_canvas = SoftwareCanvas::from_image(diagonal(32));
    let expected = main_realm.to_data_url(&main_canvas, EncodeArgs::png()).unwrap();
    let before = worker_realm.to_data_url(&worker_canvas, EncodeArgs::png()).unwrap();
    assert_ne!(before, expected);

    let mut snap = main_rt.snapshot();
    snap.hardware_concurrency = Some(6);
    main.publish(snap).unwrap();
    assert_eq!(bus.deliver(), 1);

    assert_eq!(&*worker_rt.noise().seed(), "main-realm-seed");
    assert_eq!(worker_rt.profile().hardware_concurrency, 6);
    assert_eq!(worker_rt.profile().languages, mirror.current().languages);
    // The cached pre-sync encode is not reused.
    let after = worker_realm.to_data_url(&worker_canvas, EncodeArgs::png()).unwrap();
    assert_eq!(after, expected);
    assert_eq!(worker_canvas.native_encodes(), 2);
}
