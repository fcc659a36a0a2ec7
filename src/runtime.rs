//! Per-realm bootstrap.
//!
//! One [`SpoofRuntime`] per thread (page or worker realm), built once from
//! the configuration. It owns the noise service and the hook registries;
//! every patch module reads both from here.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use crate::config::{mask_seed, DeviceProfile, SpoofConfig};
use crate::context::{PatchEnv, SurfaceHooks};
use crate::error::{Result, SpoofError};
use crate::noise::NoiseService;
use crate::sync::EnvSnapshot;

thread_local! {
    static RUNTIME: RefCell<Option<Rc<SpoofRuntime>>> = const { RefCell::new(None) };
}

/// Snapshot of what the runtime has done, for `spoof_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub initialized: bool,
    pub applied: Vec<String>,
    pub count: usize,
    pub seed: String,
}

pub struct SpoofRuntime {
    env: PatchEnv,
    profile: RefCell<DeviceProfile>,
    registries: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    applied: RefCell<Vec<String>>,
}

impl std::fmt::Debug for SpoofRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoofRuntime")
            .field("seed", &mask_seed(&self.env.noise.seed()))
            .field("registries", &self.registries.borrow().len())
            .field("applied", &self.applied.borrow())
            .finish()
    }
}

impl SpoofRuntime {
    /// Validates `config`; a missing seed is fatal.
    pub fn new(config: SpoofConfig) -> Result<Self> {
        let profile = RefCell::new(config.device.clone());
        Ok(Self {
            env: PatchEnv::new(config)?,
            profile,
            registries: RefCell::new(HashMap::new()),
            applied: RefCell::new(Vec::new()),
        })
    }

    pub fn env(&self) -> &PatchEnv {
        &self.env
    }

    pub fn config(&self) -> &SpoofConfig {
        &self.env.config
    }

    pub fn noise(&self) -> &Rc<NoiseService> {
        &self.env.noise
    }

    /// The device profile in effect: the configured one, overlaid with any
    /// snapshot adopted since.
    pub fn profile(&self) -> DeviceProfile {
        self.profile.borrow().clone()
    }

    /// What this realm would publish to others.
    pub fn snapshot(&self) -> EnvSnapshot {
        EnvSnapshot::from_profile(&self.profile.borrow(), &self.env.noise.seed())
    }

    /// Take on another realm's environment: its profile fields, then its
    /// seed and pixel ratio for the noise service.
    pub fn adopt_snapshot(&self, snapshot: &EnvSnapshot) -> Result<()> {
        let dpr = {
            let mut profile = self.profile.borrow_mut();
            snapshot.apply_to(&mut profile);
            profile.device_pixel_ratio
        };
        if self.env.noise.adopt(&snapshot.seed, Some(dpr))? {
            log::info!("[runtime] adopted seed {}", mask_seed(&self.env.noise.seed()));
        }
        Ok(())
    }

    /// The registry of type `T`, created with its default hooks on first
    /// use. Later calls return handles to the same registry.
    pub fn registry<T: SurfaceHooks>(&self) -> T {
        let key = TypeId::of::<T>();
        if let Some(existing) = self
            .registries
            .borrow()
            .get(&key)
            .and_then(|r| r.downcast_ref::<T>())
        {
            return existing.clone();
        }
        let hooks = T::with_defaults(&self.env);
        log::debug!(
            "[runtime] registered {} default hook(s) for {}",
            hooks.hook_count(),
            std::any::type_name::<T>()
        );
        self.registries.borrow_mut().insert(key, Rc::new(hooks.clone()));
        hooks
    }

    pub fn has_registry<T: SurfaceHooks>(&self) -> bool {
        self.registries.borrow().contains_key(&TypeId::of::<T>())
    }

    /// Record an installed patch module. Repeats are ignored.
    pub fn mark_applied(&self, module: &str) {
        let mut applied = self.applied.borrow_mut();
        if !applied.iter().any(|m| m == module) {
            applied.push(module.to_string());
        }
    }

    pub fn is_applied(&self, module: &str) -> bool {
        self.applied.borrow().iter().any(|m| m == module)
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.borrow().clone()
    }

    pub fn status(&self) -> RuntimeStatus {
        let applied = self.applied();
        RuntimeStatus {
            initialized: true,
            count: applied.len(),
            applied,
            seed: mask_seed(&self.env.noise.seed()),
        }
    }
}

/// Build this realm's runtime. A second call keeps the first runtime and
/// ignores `config`.
pub fn initialize(config: SpoofConfig) -> Result<Rc<SpoofRuntime>> {
    if let Some(existing) = RUNTIME.with(|r| r.borrow().clone()) {
        log::debug!("[runtime] already initialized, keeping seed {}", mask_seed(&existing.noise().seed()));
        return Ok(existing);
    }
    let runtime = Rc::new(SpoofRuntime::new(config)?);
    log::info!("[runtime] initialized with seed {}", runtime.config().masked_seed());
    RUNTIME.with(|r| *r.borrow_mut() = Some(Rc::clone(&runtime)));
    Ok(runtime)
}

pub fn current() -> Result<Rc<SpoofRuntime>> {
    RUNTIME.with(|r| r.borrow().clone()).ok_or(SpoofError::NotInitialized)
}

pub fn is_initialized() -> bool {
    RUNTIME.with(|r| r.borrow().is_some())
}

pub fn status() -> RuntimeStatus {
    match current() {
        Ok(rt) => rt.status(),
        Err(_) => RuntimeStatus {
            initialized: false,
            applied: Vec::new(),
            count: 0,
            seed: String::new(),
        },
    }
}

/// Drop this thread's runtime.
#[cfg(test)]
pub(crate) fn reset() {
    RUNTIME.with(|r| *r.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::webgpu::WebGpuHooks;
    use crate::context::AnalyserHooks;
    use crate::patch::Receiver;

    struct Node;

    impl Receiver for Node {
        fn flag_is_set(&self, _: &str) -> bool {
            false
        }
        fn set_flag(&self, _: &str, _: bool) {}
    }

    impl crate::context::AnalyserNodeLike for Node {
        fn params(&self) -> Option<crate::noise::AnalyserParams> {
            None
        }
    }

    #[test]
    fn test_initialize_once_per_thread() {
        reset();
        assert!(!is_initialized());
        assert_eq!(current().unwrap_err(), SpoofError::NotInitialized);
        assert!(!status().initialized);

        assert_eq!(initialize(SpoofConfig::default()).unwrap_err(), SpoofError::MissingSeed);
        assert!(!is_initialized());

        let a = initialize(SpoofConfig::with_seed("first-seed")).unwrap();
        let b = initialize(SpoofConfig::with_seed("second-seed")).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(&*current().unwrap().noise().seed(), "first-seed");
        reset();
    }

    #[test]
    fn test_registry_created_once() {
        let rt = SpoofRuntime::new(SpoofConfig::with_seed("abc123")).unwrap();
        assert!(!rt.has_registry::<AnalyserHooks<Node>>());
        let a: AnalyserHooks<Node> = rt.registry();
        assert_eq!(a.get_byte_frequency_data.post.len(), 1);

        // A hook added through one handle is visible through the next.
        a.get_byte_frequency_data.post.add(|_, _, _| Ok(None));
        let b: AnalyserHooks<Node> = rt.registry();
        assert_eq!(b.get_byte_frequency_data.post.len(), 2);

        let gpu: WebGpuHooks = rt.registry();
        assert_eq!(gpu.hook_count(), 1);
        assert!(rt.has_registry::<WebGpuHooks>());
    }

    #[test]
    fn test_applied_modules() {
        let rt = SpoofRuntime::new(SpoofConfig::with_seed("0123456789abcdef")).unwrap();
        rt.mark_applied("canvas");
        rt.mark_applied("webgl");
        rt.mark_applied("canvas");
        let status = rt.status();
        assert_eq!(status.applied, vec!["canvas", "webgl"]);
        assert_eq!(status.count, 2);
        assert_eq!(status.seed, "\"0123…cdef\" (len 16)");
        assert!(rt.is_applied("webgl"));
    }

    #[test]
    fn test_adopt_snapshot_overlays_profile() {
        let rt = SpoofRuntime::new(SpoofConfig::with_seed("worker-seed-local")).unwrap();
        let mut main_cfg = SpoofConfig::with_seed("main-seed-remote");
        main_cfg.device.languages = vec!["de-DE".into(), "de".into()];
        main_cfg.device.hardware_concurrency = 12;
        main_cfg.device.device_pixel_ratio = 2.0;

        let mut snap = EnvSnapshot::from_config(&main_cfg);
        snap.ua = None;
        rt.adopt_snapshot(&snap).unwrap();

        let profile = rt.profile();
        assert_eq!(profile.languages, main_cfg.device.languages);
        assert_eq!(profile.hardware_concurrency, 12);
        assert_eq!(profile.user_agent, rt.config().device.user_agent);
        assert_eq!(&*rt.noise().seed(), "main-seed-remote");
        assert_eq!(rt.noise().dpr(), 2.0);
        assert_eq!(rt.status().seed, "\"main…mote\" (len 16)");
        assert_eq!(rt.snapshot().seed, "main-seed-remote");

        // A snapshot without a seed keeps the current one.
        rt.adopt_snapshot(&EnvSnapshot::default()).unwrap();
        assert_eq!(&*rt.noise().seed(), "main-seed-remote");
    }
}
