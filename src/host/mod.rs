//! Host adapters.
//!
//! The patch layer only sees hosts through the capability traits in
//! [`crate::context`]. [`software`] is a pure-Rust host: a raster canvas,
//! a WebGL stub, a GPU adapter and audio nodes, with prototypes that can be
//! patched exactly like a browser's. Native tests and tooling run against
//! it; the browser host lives in `bindings`.

pub mod software;

pub use software::{
    Dyn2d, SoftwareAnalyser, SoftwareAudioBuffer, SoftwareCanvas, SoftwareContext, SoftwareContext2d, SoftwareGl,
    SoftwareGlValue, SoftwareGpuAdapter, SoftwareGpuDevice, SoftwareOfflineContext, SoftwareRealm,
};
