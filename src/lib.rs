//! Acoustic Engine - Real-time Spatial Audio Processing
//!
//! Renders mono or stereo PCM through a configurable acoustic environment:
//! distance attenuation, an FDN room reverb, HRTF or parametric
//! spatialization of the direct sound, width and tilt shaping, and a
//! dry/wet mix. Environments can be set parameter by parameter or through
//! named scenario presets.
//!
//! # Architecture
//!
//! - [`Engine`] owns the audio-side pipeline; `process` never allocates,
//!   locks or blocks.
//! - [`EngineController`] stages parameter targets from any thread.
//! - Current values approach their targets with exponential smoothing, so
//!   every change is glitch-free.
//! - [`ffi`] exposes the engine through a stable C ABI.

pub mod cli;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod scenario;
pub mod spatial;

pub use engine::{
    AudioBuffer, AudioBufferMut, Engine, EngineConfig, EngineController, Layout, Param,
    SpatialDefaults,
};
pub use error::{EngineError, Result};
pub use scenario::ScenarioPreset;

// ============================================================================
// Version
// ============================================================================

pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 2;
pub const VERSION_PATCH: u32 = 0;

/// Version string, matching the crate version
pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

/// Version packed as `(major << 16) | (minor << 8) | patch`
pub const fn version() -> u32 {
    (VERSION_MAJOR << 16) | (VERSION_MINOR << 8) | VERSION_PATCH
}

/// Whether a caller built against `expected` can use this library
///
/// The major versions must match and the expected minor must not be newer
/// than ours.
pub fn is_abi_compatible(expected: u32) -> bool {
    let major = (expected >> 16) & 0xFF;
    let minor = (expected >> 8) & 0xFF;
    major == VERSION_MAJOR && minor <= VERSION_MINOR
}
