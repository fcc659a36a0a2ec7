//! Browser bindings.
//!
//! Each submodule puts the patched slots of one surface in front of the
//! real prototypes. The `#[wasm_bindgen]` functions here are what the
//! loader calls.

pub mod audio;
pub mod canvas;
pub mod env_sync;
pub mod js_host;
pub mod proxy_helpers;
pub mod webgl;
pub mod webgpu;

use wasm_bindgen::prelude::*;

use crate::config::SpoofConfig;
use crate::error::{Result, SpoofError};
use crate::runtime::{self, SpoofRuntime};

type Installer = fn(&SpoofRuntime) -> Result<usize>;

fn installers(rt: &SpoofRuntime) -> Vec<(&'static str, Installer)> {
    let toggles = &rt.config().modules;
    let mut out: Vec<(&'static str, Installer)> = Vec::new();
    if toggles.canvas {
        out.push(("canvas", canvas::install));
    }
    if toggles.webgl {
        out.push(("webgl", webgl::install));
    }
    if toggles.audio {
        out.push(("audio", audio::install));
    }
    if toggles.webgpu {
        out.push(("webgpu", webgpu::install));
    }
    if toggles.env_sync {
        out.push(("env_sync", env_sync::install));
    }
    out
}

fn parse_config(config: JsValue) -> Result<SpoofConfig> {
    if let Some(json) = config.as_string() {
        return SpoofConfig::from_json(&json);
    }
    if config.is_undefined() || config.is_null() {
        return Err(SpoofError::MissingConfig("environment config".into()));
    }
    let config: SpoofConfig = serde_wasm_bindgen::from_value(config)?;
    config.validate()?;
    Ok(config)
}

/// Install every enabled patch module in this realm.
///
/// Only configuration errors are returned. A module that fails to install
/// is logged and left out of `applied`. Calling again installs nothing
/// new; the first configuration stays in effect.
#[wasm_bindgen(js_name = applyEnvironment)]
pub fn apply_environment(config: JsValue) -> std::result::Result<JsValue, JsValue> {
    let config = parse_config(config)?;
    log::set_max_level(config.log_level().to_level_filter());
    let rt = runtime::initialize(config)?;

    for (module, install) in installers(&rt) {
        if rt.is_applied(module) {
            continue;
        }
        match install(&rt) {
            Ok(0) => log::debug!("[bindings] {module}: nothing to patch in this realm"),
            Ok(n) => {
                log::info!("[bindings] {module}: {n} method(s) patched");
                rt.mark_applied(module);
            }
            Err(err) => log::warn!("[bindings] {module}: not applied ({err})"),
        }
    }
    Ok(serde_wasm_bindgen::to_value(&rt.status())?)
}

/// Re-post this realm's environment snapshot to other realms.
#[wasm_bindgen(js_name = publishEnvSnapshot)]
pub fn publish_env_snapshot() -> std::result::Result<(), JsValue> {
    let rt = runtime::current()?;
    env_sync::publish(&rt)?;
    Ok(())
}

/// The environment this realm currently reports.
#[wasm_bindgen(js_name = envSnapshot)]
pub fn env_snapshot() -> std::result::Result<JsValue, JsValue> {
    let snapshot = env_sync::current_snapshot()?;
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    Ok(serde::Serialize::serialize(&snapshot, &serializer)?)
}

#[wasm_bindgen(js_name = spoofStatus)]
pub fn spoof_status() -> std::result::Result<JsValue, JsValue> {
    Ok(serde_wasm_bindgen::to_value(&runtime::status())?)
}
