//! Device profile and masking configuration.
//!
//! The loader hands over one object (JS value or JSON) before any patch
//! runs. Everything here is read-only once the runtime is built.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoofError};

/// Features always kept in the WebGPU feature whitelist.
pub const WEBGPU_STABLE_FEATURES: &[&str] = &[
    "depth-clip-control",
    "depth32float-stencil8",
    "texture-compression-bc",
    "texture-compression-etc2",
    "texture-compression-astc",
    "timestamp-query",
    "indirect-first-instance",
    "shader-f16",
    "rg11b10ufloat-renderable",
    "bgra8unorm-storage",
    "float32-filterable",
    "float32-blendable",
];

pub const WEBGPU_LIMITS: &[&str] = &[
    "maxTextureDimension1D",
    "maxTextureDimension2D",
    "maxTextureDimension3D",
    "maxTextureArrayLayers",
    "maxBindGroups",
    "maxBindingsPerBindGroup",
    "maxDynamicUniformBuffersPerPipelineLayout",
    "maxDynamicStorageBuffersPerPipelineLayout",
    "maxSampledTexturesPerShaderStage",
    "maxSamplersPerShaderStage",
    "maxStorageBuffersPerShaderStage",
    "maxStorageTexturesPerShaderStage",
    "maxUniformBuffersPerShaderStage",
    "maxUniformBufferBindingSize",
    "maxStorageBufferBindingSize",
    "minUniformBufferOffsetAlignment",
    "minStorageBufferOffsetAlignment",
    "maxVertexBuffers",
    "maxBufferSize",
    "maxVertexAttributes",
    "maxVertexBufferArrayStride",
    "maxInterStageShaderVariables",
    "maxColorAttachments",
    "maxColorAttachmentBytesPerSample",
    "maxComputeWorkgroupStorageSize",
    "maxComputeInvocationsPerWorkgroup",
    "maxComputeWorkgroupSizeX",
    "maxComputeWorkgroupSizeY",
    "maxComputeWorkgroupSizeZ",
    "maxComputeWorkgroupsPerDimension",
];

pub const WEBGPU_FORMATS: &[&str] = &[
    "r8unorm", "r8snorm", "r8uint", "r8sint",
    "rg8unorm", "rg8snorm", "rg8uint", "rg8sint",
    "rgba8unorm", "rgba8unorm-srgb", "rgba8snorm", "rgba8uint", "rgba8sint",
    "bgra8unorm", "bgra8unorm-srgb",
    "r16uint", "r16sint", "r16float",
    "rg16uint", "rg16sint", "rg16float",
    "rgba16uint", "rgba16sint", "rgba16float",
    "r32uint", "r32sint", "r32float",
    "rg32uint", "rg32sint", "rg32float",
    "rgba32uint", "rgba32sint", "rgba32float",
    "rgb10a2unorm", "rgb10a2uint", "rg11b10ufloat", "rgb9e5ufloat",
    "depth16unorm", "depth24plus", "depth24plus-stencil8", "depth32float", "stencil8",
];

pub const WEBGL_EXTENSIONS: &[&str] = &[
    "ANGLE_instanced_arrays",
    "EXT_blend_minmax",
    "EXT_color_buffer_half_float",
    "EXT_float_blend",
    "EXT_frag_depth",
    "EXT_shader_texture_lod",
    "EXT_texture_filter_anisotropic",
    "EXT_sRGB",
    "OES_element_index_uint",
    "OES_standard_derivatives",
    "OES_texture_float",
    "OES_texture_float_linear",
    "OES_texture_half_float",
    "OES_texture_half_float_linear",
    "OES_vertex_array_object",
    "WEBGL_color_buffer_float",
    "WEBGL_compressed_texture_s3tc",
    "WEBGL_debug_renderer_info",
    "WEBGL_depth_texture",
    "WEBGL_draw_buffers",
    "WEBGL_lose_context",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// User-agent client hint brand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub brand: String,
    pub version: String,
}

/// Low-entropy client hints (`navigator.userAgentData`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UaData {
    pub platform: String,
    pub brands: Vec<Brand>,
    pub mobile: bool,
}

impl Default for UaData {
    fn default() -> Self {
        Self {
            platform: "Windows".into(),
            brands: vec![
                Brand { brand: "Chromium".into(), version: "124".into() },
                Brand { brand: "Google Chrome".into(), version: "124".into() },
                Brand { brand: "Not-A.Brand".into(), version: "99".into() },
            ],
            mobile: false,
        }
    }
}

/// High-entropy client hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HighEntropy {
    pub ua_full_version: String,
    pub full_version_list: Vec<Brand>,
    pub architecture: String,
    pub bitness: String,
    pub model: String,
    pub platform_version: String,
    pub form_factors: Vec<String>,
    pub wow64: bool,
}

impl Default for HighEntropy {
    fn default() -> Self {
        Self {
            ua_full_version: "124.0.6367.91".into(),
            full_version_list: vec![
                Brand { brand: "Chromium".into(), version: "124.0.6367.91".into() },
                Brand { brand: "Google Chrome".into(), version: "124.0.6367.91".into() },
            ],
            architecture: "x86".into(),
            bitness: "64".into(),
            model: String::new(),
            platform_version: "15.0.0".into(),
            form_factors: vec!["Desktop".into()],
            wow64: false,
        }
    }
}

/// The identity presented to page scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub user_agent: String,
    pub vendor: String,
    pub platform: String,
    pub language: String,
    pub languages: Vec<String>,
    pub device_pixel_ratio: f64,
    pub hardware_concurrency: u32,
    pub device_memory: f64,
    pub timezone: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u32,
    pub webgl_vendor: String,
    pub webgl_renderer: String,
    pub webgl_unmasked_vendor: String,
    pub webgl_unmasked_renderer: String,
    pub gpu_vendor: String,
    pub gpu_architecture: String,
    pub gpu_device: String,
    pub gpu_type: String,
    pub ua_data: UaData,
    pub high_entropy: HighEntropy,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .into(),
            vendor: "Google Inc.".into(),
            platform: "Win32".into(),
            language: "en-US".into(),
            languages: vec!["en-US".into(), "en".into()],
            device_pixel_ratio: 1.0,
            hardware_concurrency: 8,
            device_memory: 8.0,
            timezone: "UTC".into(),
            screen_width: 1920,
            screen_height: 1080,
            color_depth: 24,
            webgl_vendor: "WebKit".into(),
            webgl_renderer: "WebKit WebGL".into(),
            webgl_unmasked_vendor: "Google Inc. (Intel)".into(),
            webgl_unmasked_renderer:
                "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)".into(),
            gpu_vendor: "intel".into(),
            gpu_architecture: "gen-9".into(),
            gpu_device: String::new(),
            gpu_type: "integrated".into(),
            ua_data: UaData::default(),
            high_entropy: HighEntropy::default(),
        }
    }
}

/// Static capability whitelists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Whitelists {
    pub webgl_extensions: Vec<String>,
    /// Empty means every parameter is answered natively.
    pub webgl_parameters: Vec<u32>,
    pub webgpu_features: Vec<String>,
    pub webgpu_limits: Vec<String>,
    pub webgpu_formats: Vec<String>,
}

impl Default for Whitelists {
    fn default() -> Self {
        Self {
            webgl_extensions: strings(WEBGL_EXTENSIONS),
            webgl_parameters: Vec::new(),
            webgpu_features: strings(WEBGPU_STABLE_FEATURES),
            webgpu_limits: strings(WEBGPU_LIMITS),
            webgpu_formats: strings(WEBGPU_FORMATS),
        }
    }
}

/// Edge-aware resampler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Base jitter is `1 / (eps_base_px * dpr)` pixels.
    pub eps_base_px: f64,
    pub jitter_factor: f64,
    pub edge_gain: f64,
    pub blur_passes: u32,
    pub flat_mean_threshold: f64,
    /// Max text origin offset in CSS px.
    pub text_jitter_px: f64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            eps_base_px: 64.0,
            jitter_factor: 0.5,
            edge_gain: 4.0,
            blur_passes: 1,
            flat_mean_threshold: 0.02,
            text_jitter_px: 0.10,
        }
    }
}

/// Per-pixel colour noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelNoiseConfig {
    pub enabled: bool,
    pub density: f64,
    pub strength: f64,
    pub mono: bool,
}

impl Default for PixelNoiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            density: 0.08,
            strength: 0.75,
            mono: false,
        }
    }
}

/// Analyser and render-buffer noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioNoiseConfig {
    pub smoothing: f64,
    pub fft_size: u32,
    pub min_decibels: f64,
    pub max_decibels: f64,
    pub render_rate: f64,
    pub render_amplitude: f64,
    pub first_channel_rate: f64,
    pub first_channel_amplitude: f64,
}

impl Default for AudioNoiseConfig {
    fn default() -> Self {
        Self {
            smoothing: 0.8,
            fft_size: 2048,
            min_decibels: -100.0,
            max_decibels: -30.0,
            render_rate: 0.1,
            render_amplitude: 0.005,
            first_channel_rate: 0.025,
            first_channel_amplitude: 0.003,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Lowp,
    Mediump,
    Highp,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Lowp => "lowp",
            Precision::Mediump => "mediump",
            Precision::Highp => "highp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrecisionMode {
    /// Rewrite `precision highp` statements and bare `highp` qualifiers.
    Smart,
    /// Rewrite only `precision highp float|int` statements.
    FloatOnly,
}

/// Shader precision downgrade policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionPolicy {
    pub vertex: Precision,
    pub fragment: Precision,
    pub mode: PrecisionMode,
}

impl Default for PrecisionPolicy {
    fn default() -> Self {
        Self {
            vertex: Precision::Mediump,
            fragment: Precision::Highp,
            mode: PrecisionMode::Smart,
        }
    }
}

/// Logical canvas size reported in encoded PNG headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSize {
    pub width: u32,
    pub height: u32,
}

/// Which patch groups get installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleToggles {
    pub canvas: bool,
    pub webgl: bool,
    pub audio: bool,
    pub webgpu: bool,
    pub env_sync: bool,
}

impl Default for ModuleToggles {
    fn default() -> Self {
        Self {
            canvas: true,
            webgl: true,
            audio: true,
            webgpu: true,
            env_sync: true,
        }
    }
}

/// Complete masking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoofConfig {
    pub seed: String,
    pub debug: bool,
    pub log_level: String,
    pub device: DeviceProfile,
    pub whitelists: Whitelists,
    pub resample: ResampleConfig,
    pub pixel_noise: PixelNoiseConfig,
    pub audio: AudioNoiseConfig,
    pub precision: PrecisionPolicy,
    pub logical_size: Option<LogicalSize>,
    pub modules: ModuleToggles,
}

impl Default for SpoofConfig {
    fn default() -> Self {
        Self {
            seed: String::new(),
            debug: false,
            log_level: "info".into(),
            device: DeviceProfile::default(),
            whitelists: Whitelists::default(),
            resample: ResampleConfig::default(),
            pixel_noise: PixelNoiseConfig::default(),
            audio: AudioNoiseConfig::default(),
            precision: PrecisionPolicy::default(),
            logical_size: None,
            modules: ModuleToggles::default(),
        }
    }
}

impl SpoofConfig {
    /// Default configuration with the given seed.
    pub fn with_seed(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SpoofConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make output non-deterministic or
    /// numerically meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.seed.is_empty() {
            return Err(SpoofError::MissingSeed);
        }
        let dpr = self.device.device_pixel_ratio;
        if !dpr.is_finite() || dpr <= 0.0 {
            return Err(SpoofError::InvalidConfig(format!("device_pixel_ratio = {dpr}")));
        }
        if !(self.resample.eps_base_px.is_finite() && self.resample.eps_base_px > 0.0) {
            return Err(SpoofError::InvalidConfig("resample.eps_base_px must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.pixel_noise.density) {
            return Err(SpoofError::InvalidConfig("pixel_noise.density outside [0, 1]".into()));
        }
        if self.pixel_noise.strength < 0.0 || self.resample.text_jitter_px < 0.0 {
            return Err(SpoofError::InvalidConfig("negative noise strength".into()));
        }
        if self.audio.fft_size == 0 {
            return Err(SpoofError::InvalidConfig("audio.fft_size must be > 0".into()));
        }
        if self.audio.min_decibels >= self.audio.max_decibels {
            return Err(SpoofError::InvalidConfig(
                "audio.min_decibels must be below audio.max_decibels".into(),
            ));
        }
        if self.modules.webgl && self.whitelists.webgl_extensions.is_empty() {
            return Err(SpoofError::MissingConfig("whitelists.webgl_extensions".into()));
        }
        if self.modules.webgpu && self.whitelists.webgpu_features.is_empty() {
            return Err(SpoofError::MissingConfig("whitelists.webgpu_features".into()));
        }
        Ok(())
    }

    /// Console log level for the browser logger.
    pub fn log_level(&self) -> log::Level {
        if self.debug {
            return log::Level::Debug;
        }
        match self.log_level.to_ascii_lowercase().as_str() {
            "error" => log::Level::Error,
            "warn" => log::Level::Warn,
            "debug" => log::Level::Debug,
            "trace" => log::Level::Trace,
            _ => log::Level::Info,
        }
    }

    /// Seed as it may appear in logs.
    pub fn masked_seed(&self) -> String {
        mask_seed(&self.seed)
    }
}

/// A seed safe to log: first and last four characters only.
pub fn mask_seed(seed: &str) -> String {
    let chars: Vec<char> = seed.chars().collect();
    if chars.len() <= 8 {
        return format!("\"***\" (len {})", chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("\"{head}…{tail}\" (len {})", chars.len())
}
