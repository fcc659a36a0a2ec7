//! # Environment Masking for WebAssembly
//!
//! Runtime patches that make a browser's fingerprinting surface report a
//! chosen, seed-stable identity instead of the host machine's.
//!
//! ## Architecture
//!
//! ```text
//! applyEnvironment(config)        (bindings)
//!   ↓
//! SpoofRuntime                    (runtime: noise service + hook registries)
//!   ↓
//! Context proxies / prototypes    (context: canvas, 2D, WebGL, WebGPU, audio)
//!   ↓
//! Hook chaining                   (patch)
//!   ↓
//! Native host methods
//! ```
//!
//! ## Features
//!
//! - **Deterministic**: every perturbation is a pure function of the seed
//!   and the call's inputs, so repeated reads agree within a realm and
//!   across realms
//! - **Transparent**: patched methods fall back to the native result on any
//!   internal failure
//! - **Testable**: [`host::software`] provides an in-memory host so the
//!   whole pipeline runs outside a browser

use wasm_bindgen::prelude::*;

pub mod bindings;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod noise;
pub mod patch;
pub mod rng;
pub mod runtime;
pub mod sync;

#[cfg(test)]
mod consistency_tests;

pub use config::SpoofConfig;
pub use context::{Canvas2dHooks, CanvasHooks, PatchEnv, SpoofedContext2d, SurfaceHooks, WebGlHooks};
pub use error::{Result, SpoofError};
pub use noise::NoiseService;
pub use runtime::{RuntimeStatus, SpoofRuntime};
pub use sync::{EnvHub, EnvSnapshot, SnapshotMirror};

/// Set up logging. Patches are installed by `applyEnvironment`.
#[wasm_bindgen(start)]
pub fn init() {
    if console_log::init_with_level(log::Level::Info).is_err() {
        return;
    }
    log::debug!("envmask module loaded");
}

#[wasm_bindgen(js_name = version)]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
