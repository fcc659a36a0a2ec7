//! WebGPU adapter and device masking.
//!
//! A masked adapter exposes only the whitelisted features and limits the
//! native adapter actually has, an adapter info rebuilt from the device
//! profile, and a `requestDevice` whose device is masked the same way.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::config::{DeviceProfile, SpoofConfig};
use crate::context::{PatchEnv, SurfaceHooks};
use crate::error::{Result, SpoofError};
use crate::patch::{ArgHook, HookList};

/// Features enabled on a requested device whenever the adapter has them.
pub const AUTO_ENABLE_FEATURES: &[&str] = &[
    "texture-compression-bc",
    "texture-compression-etc2",
    "texture-compression-astc",
];

pub const ADAPTER_DESCRIPTION: &str = "empty";

/// Formats `GPU.getPreferredCanvasFormat` can return.
pub const CANVAS_FORMATS: &[&str] = &["bgra8unorm", "rgba8unorm"];

/// `GPUSupportedFeatures` restricted to `whitelist ∩ native`.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedFeatures {
    allowed: Vec<String>,
}

impl MaskedFeatures {
    /// Keeps native iteration order.
    pub fn new<I, S>(native: I, whitelist: &HashSet<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut allowed: Vec<String> = Vec::new();
        for f in native.into_iter().map(Into::into) {
            if whitelist.contains(&f) && !allowed.contains(&f) {
                allowed.push(f);
            }
        }
        Self { allowed }
    }

    pub fn has(&self, name: &str) -> bool {
        self.allowed.iter().any(|f| f == name)
    }

    pub fn size(&self) -> usize {
        self.allowed.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values().map(|v| (v, v))
    }

    pub fn for_each(&self, mut f: impl FnMut(&str)) {
        self.values().for_each(|v| f(v));
    }
}

/// `GPUSupportedLimits` restricted to whitelisted names the native object
/// reports.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedLimits {
    entries: Vec<(String, f64)>,
}

impl MaskedLimits {
    pub fn new<I, S>(native: I, whitelist: &HashSet<String>) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let entries = native
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .filter(|(k, _)| whitelist.contains(k))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `GPUAdapterInfo` as the host reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NativeAdapterInfo {
    pub vendor: Option<String>,
    pub architecture: Option<String>,
    pub device: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub adapter_type: Option<String>,
    pub driver: Option<String>,
    pub backend: Option<String>,
    pub memory_heaps: Option<serde_json::Value>,
    pub d3d_shader_model: Option<serde_json::Value>,
    pub vk_driver_version: Option<serde_json::Value>,
    pub subgroup_matrix_configs: Option<serde_json::Value>,
    pub subgroup_max_size: Option<u32>,
    pub subgroup_min_size: Option<u32>,
}

/// The adapter info pages get to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterInfo {
    pub vendor: Option<String>,
    pub architecture: Option<String>,
    pub device: Option<String>,
    pub description: String,
    #[serde(rename = "type")]
    pub adapter_type: Option<String>,
    pub is_fallback_adapter: bool,
    pub driver: Option<String>,
    pub backend: Option<String>,
    pub memory_heaps: Option<serde_json::Value>,
    pub d3d_shader_model: Option<serde_json::Value>,
    pub vk_driver_version: Option<serde_json::Value>,
    pub subgroup_matrix_configs: Option<serde_json::Value>,
    pub subgroup_max_size: Option<u32>,
    pub subgroup_min_size: Option<u32>,
}

fn prefer(profile: &str, native: &Option<String>) -> Option<String> {
    if profile.is_empty() {
        native.clone().filter(|v| !v.is_empty())
    } else {
        Some(profile.to_string())
    }
}

impl AdapterInfo {
    /// Profile identity over native values; driver details pass through.
    pub fn build(native: &NativeAdapterInfo, profile: &DeviceProfile) -> Self {
        Self {
            vendor: prefer(&profile.gpu_vendor, &native.vendor),
            architecture: prefer(&profile.gpu_architecture, &native.architecture),
            device: prefer(&profile.gpu_device, &native.device),
            description: ADAPTER_DESCRIPTION.to_string(),
            adapter_type: prefer(&profile.gpu_type, &native.adapter_type),
            is_fallback_adapter: false,
            driver: native.driver.clone(),
            backend: native.backend.clone(),
            memory_heaps: native.memory_heaps.clone(),
            d3d_shader_model: native.d3d_shader_model.clone(),
            vk_driver_version: native.vk_driver_version.clone(),
            subgroup_matrix_configs: native.subgroup_matrix_configs.clone(),
            subgroup_max_size: native.subgroup_max_size,
            subgroup_min_size: native.subgroup_min_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chrome,
    Edge,
    Safari,
    Other,
}

impl BrowserKind {
    pub fn detect(user_agent: &str) -> Self {
        if user_agent.contains("Safari") && !user_agent.contains("Chrome") {
            BrowserKind::Safari
        } else if user_agent.contains("Edg/") {
            BrowserKind::Edge
        } else if user_agent.contains("Chrome") {
            BrowserKind::Chrome
        } else {
            BrowserKind::Other
        }
    }

    /// Adapter properties this browser is expected to expose.
    pub fn adapter_properties(self) -> &'static [&'static str] {
        match self {
            BrowserKind::Chrome => &[
                "vendor", "description", "architecture", "device", "label", "name", "adapterType",
                "driverVersion", "isFallbackAdapter", "info", "limits", "features", "requestDevice",
            ],
            BrowserKind::Edge => &[
                "vendor", "description", "architecture", "device", "label", "adapterType",
                "driverVersion", "isFallbackAdapter", "info", "limits", "features", "requestDevice",
            ],
            BrowserKind::Safari => &[
                "vendor", "description", "device", "label", "adapterType", "isFallbackAdapter", "info",
                "limits", "features", "requestDevice",
            ],
            BrowserKind::Other => &[
                "vendor", "description", "device", "label", "info", "limits", "features", "requestDevice",
            ],
        }
    }

    pub fn device_properties(self) -> &'static [&'static str] {
        match self {
            BrowserKind::Chrome | BrowserKind::Edge => &["limits", "features", "label", "lost", "createTexture"],
            BrowserKind::Safari => &["limits", "features", "label", "createTexture"],
            BrowserKind::Other => &["limits", "features", "createTexture", "then"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTarget {
    Adapter,
    Device,
}

impl GpuTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            GpuTarget::Adapter => "adapter",
            GpuTarget::Device => "device",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub seq: u64,
    pub target: GpuTarget,
    pub prop: String,
}

/// Reads of properties outside the browser's expected surface.
#[derive(Debug, Default)]
pub struct AccessLog {
    entries: RefCell<Vec<AccessEntry>>,
    seq: Cell<u64>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, target: GpuTarget, prop: &str) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        log::warn!("[webgpu][{}] non-whitelisted property accessed: {}", target.as_str(), prop);
        self.entries.borrow_mut().push(AccessEntry { seq, target, prop: prop.to_string() });
    }

    pub fn entries(&self) -> Vec<AccessEntry> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// The feature list for `requestDevice`: what the page asked for plus any
/// auto-enabled feature the adapter supports.
pub fn prepare_device_request(requested: &[String], adapter: &MaskedFeatures) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for f in requested {
        if !out.contains(f) {
            out.push(f.clone());
        }
    }
    for f in AUTO_ENABLE_FEATURES {
        if adapter.has(f) && !out.iter().any(|o| o == f) {
            out.push((*f).to_string());
        }
    }
    out
}

/// Static masking tables, built once per realm.
#[derive(Debug, Clone)]
pub struct GpuMasks {
    pub features: HashSet<String>,
    pub limits: HashSet<String>,
    pub formats: Vec<String>,
    pub profile: DeviceProfile,
    pub browser: BrowserKind,
}

impl GpuMasks {
    pub fn from_config(config: &SpoofConfig) -> Self {
        Self {
            features: config.whitelists.webgpu_features.iter().cloned().collect(),
            limits: config.whitelists.webgpu_limits.iter().cloned().collect(),
            formats: config.whitelists.webgpu_formats.clone(),
            profile: config.device.clone(),
            browser: BrowserKind::detect(&config.device.user_agent),
        }
    }

    pub fn format_allowed(&self, format: &str) -> bool {
        self.formats.iter().any(|f| f == format)
    }

    /// The canvas format to report for a host preferring `native`. A
    /// format outside the whitelist is replaced by the first whitelisted
    /// swap-chain format; with neither whitelisted, `native` is kept.
    pub fn canvas_format<'a>(&'a self, native: &'a str) -> &'a str {
        if self.format_allowed(native) {
            return native;
        }
        CANVAS_FORMATS
            .iter()
            .copied()
            .find(|f| self.format_allowed(f))
            .unwrap_or(native)
    }
}

/// `requestDevice` descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub label: Option<String>,
    pub required_features: Vec<String>,
}

pub trait GpuDevice: 'static {
    fn features(&self) -> Vec<String>;
    fn limits(&self) -> Vec<(String, f64)>;
}

/// A native `GPUAdapter`.
pub trait GpuAdapter: 'static {
    type Device: GpuDevice;

    fn features(&self) -> Vec<String>;
    fn limits(&self) -> Vec<(String, f64)>;
    fn info(&self) -> NativeAdapterInfo;
    fn request_device(&self, desc: DeviceDescriptor) -> LocalBoxFuture<'static, Result<Self::Device>>;
}

/// Observers of adapter and device property reads.
#[derive(Clone)]
pub struct WebGpuHooks {
    pub property_read: HookList<ArgHook<GpuTarget, String>>,
    pub masks: Rc<GpuMasks>,
    pub log: Rc<AccessLog>,
}

impl WebGpuHooks {
    pub fn new(masks: GpuMasks) -> Self {
        Self {
            property_read: HookList::new("GPUAdapter.[[Get]]"),
            masks: Rc::new(masks),
            log: Rc::new(AccessLog::new()),
        }
    }

    /// Announce a property read to the hooks.
    pub fn touch(&self, target: GpuTarget, prop: &str) {
        if prop == "then" {
            return;
        }
        self.property_read.run(&target, prop.to_string());
    }

    /// `GPU.getPreferredCanvasFormat`, given what the host returned.
    pub fn preferred_canvas_format(&self, native: &str) -> String {
        let format = self.masks.canvas_format(native);
        if format != native {
            log::debug!("[webgpu] preferred canvas format {} reported as {}", native, format);
        }
        format.to_string()
    }

    /// Wrap a native adapter.
    pub fn mask_adapter<A: GpuAdapter>(&self, adapter: A) -> MaskedAdapter<A> {
        MaskedAdapter::new(adapter, self.clone())
    }
}

impl SurfaceHooks for WebGpuHooks {
    fn with_defaults(env: &PatchEnv) -> Self {
        let hooks = Self::new(GpuMasks::from_config(&env.config));
        let masks = Rc::clone(&hooks.masks);
        let log = Rc::clone(&hooks.log);
        hooks.property_read.add(move |target, prop| {
            let allowed = match target {
                GpuTarget::Adapter => masks.browser.adapter_properties(),
                GpuTarget::Device => masks.browser.device_properties(),
            };
            if !allowed.contains(&prop.as_str()) {
                log.record(*target, prop);
            }
            Ok(None)
        });
        hooks
    }

    fn hook_count(&self) -> usize {
        self.property_read.len()
    }
}

impl std::fmt::Debug for WebGpuHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebGpuHooks")
            .field("property_read", &self.property_read)
            .field("browser", &self.masks.browser)
            .finish()
    }
}

pub struct MaskedAdapter<A: GpuAdapter> {
    inner: Rc<A>,
    hooks: WebGpuHooks,
    features: MaskedFeatures,
    limits: MaskedLimits,
    info: AdapterInfo,
}

impl<A: GpuAdapter> MaskedAdapter<A> {
    pub fn new(inner: A, hooks: WebGpuHooks) -> Self {
        let features = MaskedFeatures::new(inner.features(), &hooks.masks.features);
        let limits = MaskedLimits::new(inner.limits(), &hooks.masks.limits);
        let info = AdapterInfo::build(&inner.info(), &hooks.masks.profile);
        Self {
            inner: Rc::new(inner),
            hooks,
            features,
            limits,
            info,
        }
    }

    pub fn native(&self) -> &A {
        &self.inner
    }

    pub fn features(&self) -> &MaskedFeatures {
        self.hooks.touch(GpuTarget::Adapter, "features");
        &self.features
    }

    pub fn limits(&self) -> &MaskedLimits {
        self.hooks.touch(GpuTarget::Adapter, "limits");
        &self.limits
    }

    pub fn info(&self) -> &AdapterInfo {
        self.hooks.touch(GpuTarget::Adapter, "info");
        &self.info
    }

    pub fn label(&self) -> &str {
        self.hooks.touch(GpuTarget::Adapter, "label");
        ADAPTER_DESCRIPTION
    }

    pub fn is_fallback_adapter(&self) -> bool {
        self.hooks.touch(GpuTarget::Adapter, "isFallbackAdapter");
        false
    }

    /// Record a read of any other property.
    pub fn property(&self, name: &str) {
        self.hooks.touch(GpuTarget::Adapter, name);
    }

    /// Request a device with the auto-enabled features added, and mask it.
    pub fn request_device(&self, desc: DeviceDescriptor) -> LocalBoxFuture<'static, Result<MaskedDevice<A::Device>>> {
        self.hooks.touch(GpuTarget::Adapter, "requestDevice");
        let desc = DeviceDescriptor {
            required_features: prepare_device_request(&desc.required_features, &self.features),
            ..desc
        };
        let pending = self.inner.request_device(desc);
        let hooks = self.hooks.clone();
        async move {
            let device = pending.await?;
            Ok::<_, SpoofError>(MaskedDevice::new(device, hooks))
        }
        .boxed_local()
    }
}

pub struct MaskedDevice<D: GpuDevice> {
    inner: D,
    hooks: WebGpuHooks,
    features: MaskedFeatures,
    limits: MaskedLimits,
}

impl<D: GpuDevice> MaskedDevice<D> {
    pub fn new(inner: D, hooks: WebGpuHooks) -> Self {
        let features = MaskedFeatures::new(inner.features(), &hooks.masks.features);
        let limits = MaskedLimits::new(inner.limits(), &hooks.masks.limits);
        Self { inner, hooks, features, limits }
    }

    pub fn native(&self) -> &D {
        &self.inner
    }

    pub fn features(&self) -> &MaskedFeatures {
        self.hooks.touch(GpuTarget::Device, "features");
        &self.features
    }

    pub fn limits(&self) -> &MaskedLimits {
        self.hooks.touch(GpuTarget::Device, "limits");
        &self.limits
    }

    pub fn label(&self) -> &str {
        self.hooks.touch(GpuTarget::Device, "label");
        ADAPTER_DESCRIPTION
    }

    pub fn property(&self, name: &str) {
        self.hooks.touch(GpuTarget::Device, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_features_are_intersection() {
        let masked = MaskedFeatures::new(
            ["texture-compression-bc", "shader-f16", "made-up"],
            &set(&["texture-compression-bc", "timestamp-query"]),
        );
        assert_eq!(masked.values().collect::<Vec<_>>(), vec!["texture-compression-bc"]);
        assert!(masked.has("texture-compression-bc"));
        assert!(!masked.has("timestamp-query"));
        assert!(!masked.has("shader-f16"));
        assert_eq!(masked.size(), 1);
        assert_eq!(masked.entries().next(), Some(("texture-compression-bc", "texture-compression-bc")));
    }

    #[test]
    fn test_limits_are_intersection() {
        let limits = MaskedLimits::new(
            [("maxBindGroups", 4.0), ("maxSecretThing", 1.0)],
            &set(&["maxBindGroups", "maxTextureDimension2D"]),
        );
        assert_eq!(limits.get("maxBindGroups"), Some(4.0));
        assert_eq!(limits.get("maxSecretThing"), None);
        assert_eq!(limits.get("maxTextureDimension2D"), None);
        assert_eq!(limits.keys().collect::<Vec<_>>(), vec!["maxBindGroups"]);
    }

    #[test]
    fn test_adapter_info_rebuild() {
        let native = NativeAdapterInfo {
            vendor: Some("nvidia".into()),
            architecture: Some("ampere".into()),
            driver: Some("535.1".into()),
            ..Default::default()
        };
        let mut profile = DeviceProfile::default();
        profile.gpu_vendor = "intel".into();
        profile.gpu_architecture = String::new();
        let info = AdapterInfo::build(&native, &profile);
        assert_eq!(info.vendor.as_deref(), Some("intel"));
        assert_eq!(info.architecture.as_deref(), Some("ampere"));
        assert_eq!(info.description, "empty");
        assert!(!info.is_fallback_adapter);
        assert_eq!(info.driver.as_deref(), Some("535.1"));
    }

    #[test]
    fn test_browser_detection() {
        let chrome = "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
        let edge = "Mozilla/5.0 AppleWebKit/537.36 Chrome/126.0 Safari/537.36 Edg/126.0";
        let safari = "Mozilla/5.0 (Macintosh) AppleWebKit/605.1.15 Version/17.4 Safari/605.1.15";
        assert_eq!(BrowserKind::detect(chrome), BrowserKind::Chrome);
        assert_eq!(BrowserKind::detect(edge), BrowserKind::Edge);
        assert_eq!(BrowserKind::detect(safari), BrowserKind::Safari);
        assert_eq!(BrowserKind::detect("curl/8"), BrowserKind::Other);
    }

    #[test]
    fn test_auto_enabled_features_need_adapter_support() {
        let adapter = MaskedFeatures::new(
            ["texture-compression-bc", "texture-compression-astc"],
            &set(&["texture-compression-bc", "texture-compression-etc2"]),
        );
        let req = prepare_device_request(&["shader-f16".to_string()], &adapter);
        assert_eq!(req, vec!["shader-f16".to_string(), "texture-compression-bc".to_string()]);
    }

    struct Dev(Vec<String>);

    impl GpuDevice for Dev {
        fn features(&self) -> Vec<String> {
            self.0.clone()
        }
        fn limits(&self) -> Vec<(String, f64)> {
            vec![("maxBindGroups".into(), 4.0)]
        }
    }

    struct Adapter;

    impl GpuAdapter for Adapter {
        type Device = Dev;

        fn features(&self) -> Vec<String> {
            vec!["texture-compression-bc".into(), "shader-f16".into()]
        }
        fn limits(&self) -> Vec<(String, f64)> {
            vec![("maxBindGroups".into(), 4.0)]
        }
        fn info(&self) -> NativeAdapterInfo {
            NativeAdapterInfo::default()
        }
        fn request_device(&self, desc: DeviceDescriptor) -> LocalBoxFuture<'static, Result<Dev>> {
            async move { Ok::<Dev, SpoofError>(Dev(desc.required_features)) }.boxed_local()
        }
    }

    #[test]
    fn test_masked_device_and_access_log() {
        let mut cfg = SpoofConfig::with_seed("abc123");
        cfg.whitelists.webgpu_features = vec!["texture-compression-bc".into()];
        let env = PatchEnv::new(cfg).unwrap();
        let hooks = WebGpuHooks::with_defaults(&env);
        let adapter = hooks.mask_adapter(Adapter);

        let device = block_on(adapter.request_device(DeviceDescriptor {
            required_features: vec!["shader-f16".into()],
            ..Default::default()
        }))
        .unwrap();
        // The native device got what was asked for plus the auto-enabled one.
        assert_eq!(device.native().0, vec!["shader-f16".to_string(), "texture-compression-bc".to_string()]);
        assert_eq!(device.features().values().collect::<Vec<_>>(), vec!["texture-compression-bc"]);

        assert!(hooks.log.is_empty());
        adapter.property("requestAdapterInfo");
        adapter.property("then");
        device.property("destroy");
        let entries = hooks.log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target, GpuTarget::Adapter);
        assert_eq!(entries[1].prop, "destroy");
    }

    #[test]
    fn test_info_read_is_expected_everywhere() {
        let uas = [
            "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36",
            "Mozilla/5.0 AppleWebKit/537.36 Chrome/126.0 Safari/537.36 Edg/126.0",
            "Mozilla/5.0 (Macintosh) AppleWebKit/605.1.15 Version/17.4 Safari/605.1.15",
            "curl/8",
        ];
        for ua in uas {
            let mut cfg = SpoofConfig::with_seed("abc123");
            cfg.device.user_agent = ua.into();
            let hooks = WebGpuHooks::with_defaults(&PatchEnv::new(cfg).unwrap());
            let adapter = hooks.mask_adapter(Adapter);
            adapter.info();
            adapter.features();
            adapter.limits();
            assert!(hooks.log.is_empty(), "{ua}: {:?}", hooks.log.entries());
        }
    }

    #[test]
    fn test_canvas_format_follows_whitelist() {
        let mut cfg = SpoofConfig::with_seed("abc123");
        let hooks = WebGpuHooks::with_defaults(&PatchEnv::new(cfg.clone()).unwrap());
        assert_eq!(hooks.preferred_canvas_format("bgra8unorm"), "bgra8unorm");
        assert_eq!(hooks.preferred_canvas_format("rgba8unorm"), "rgba8unorm");
        assert!(!hooks.masks.format_allowed("rgb10a2-vendor"));
        assert_eq!(hooks.preferred_canvas_format("rgb10a2-vendor"), "bgra8unorm");

        cfg.whitelists.webgpu_formats = vec!["rgba8unorm".into()];
        let hooks = WebGpuHooks::with_defaults(&PatchEnv::new(cfg.clone()).unwrap());
        assert_eq!(hooks.preferred_canvas_format("bgra8unorm"), "rgba8unorm");

        cfg.whitelists.webgpu_formats = vec!["r8unorm".into()];
        let hooks = WebGpuHooks::with_defaults(&PatchEnv::new(cfg).unwrap());
        assert_eq!(hooks.preferred_canvas_format("bgra8unorm"), "bgra8unorm");
    }
}
