//! C ABI
//!
//! Every function returns a status code from [`crate::error::status`]
//! unless noted otherwise. Handles come from [`ae_create_engine`] and must
//! be released with [`ae_destroy_engine`].
//!
//! Threading: setters may be called from any thread, concurrently with
//! `ae_process`. `ae_process` itself must only be called from one thread
//! at a time per handle.

use std::cell::UnsafeCell;
use std::ffi::{c_char, CStr, CString};
use std::path::PathBuf;
use std::ptr;
use std::sync::Mutex;

use log::error;

use crate::engine::{
    AudioBuffer, AudioBufferMut, Engine, EngineConfig, EngineController, Layout, ReverbProfile,
    SpatialDefaults,
};
use crate::error::{status, status_message, BufferError, EngineError};

// ============================================================================
// C types
// ============================================================================

/// Engine configuration as seen from C
///
/// Null or empty paths mean "use built-in data".
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AeConfig {
    pub sample_rate: u32,
    pub max_buffer_size: u32,
    pub data_path: *const c_char,
    pub hrtf_path: *const c_char,
    pub preload_hrtf: bool,
    pub preload_all_presets: bool,
    pub max_reverb_time: f32,
    pub smoothing_time_ms: f32,
}

/// Caller-owned PCM buffer
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AeAudioBuffer {
    pub samples: *mut f32,
    pub frame_count: usize,
    /// 1 = mono, 2 = stereo
    pub channels: u8,
    /// true: `LRLR...`, false: `LL..RR..`
    pub interleaved: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AeMainParams {
    pub distance: f32,
    pub room_size: f32,
    pub brightness: f32,
    pub width: f32,
    pub dry_wet: f32,
    pub intensity: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct AeExtendedParams {
    pub decay_time: f32,
    pub diffusion: f32,
    pub lofi_amount: f32,
    pub modulation: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AeScenarioBlend {
    pub name: *const c_char,
    pub weight: f32,
}

/// Opaque engine handle
pub struct AeEngine {
    controller: EngineController,
    /// Only touched by `ae_process`, which the caller serializes
    processor: UnsafeCell<Engine>,
    last_error: Mutex<Option<CString>>,
}

// The processor cell is only accessed from the single audio thread; every
// other field is Sync on its own.
unsafe impl Sync for AeEngine {}

impl AeEngine {
    fn record(&self, err: &EngineError) -> i32 {
        let text = CString::new(err.to_string().replace('\0', " ")).ok();
        let mut slot = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = text;
        err.error_code()
    }

    fn clear_error(&self) {
        let mut slot = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    fn status(&self, result: crate::Result<()>) -> i32 {
        match result {
            Ok(()) => {
                self.clear_error();
                status::OK
            }
            Err(err) => self.record(&err),
        }
    }
}

impl From<SpatialDefaults> for AeMainParams {
    fn from(p: SpatialDefaults) -> Self {
        Self {
            distance: p.distance,
            room_size: p.room_size,
            brightness: p.brightness,
            width: p.width,
            dry_wet: p.dry_wet,
            intensity: p.intensity,
        }
    }
}

impl From<AeMainParams> for SpatialDefaults {
    fn from(p: AeMainParams) -> Self {
        Self {
            distance: p.distance,
            room_size: p.room_size,
            brightness: p.brightness,
            width: p.width,
            dry_wet: p.dry_wet,
            intensity: p.intensity,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Borrow a C string as UTF-8
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn str_arg<'a>(ptr: *const c_char, param: &str) -> Result<&'a str, EngineError> {
    if ptr.is_null() {
        return Err(EngineError::InvalidParameter {
            param: param.to_string(),
            value: "null".to_string(),
            expected: "a string".to_string(),
        });
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| EngineError::InvalidParameter {
            param: param.to_string(),
            value: "<invalid utf-8>".to_string(),
            expected: "UTF-8 text".to_string(),
        })
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn path_arg(ptr: *const c_char, param: &str) -> Result<Option<PathBuf>, EngineError> {
    if ptr.is_null() {
        return Ok(None);
    }
    let text = str_arg(ptr, param)?;
    Ok((!text.is_empty()).then(|| PathBuf::from(text)))
}

/// # Safety
/// `handle` must be null or a live handle from [`ae_create_engine`].
unsafe fn engine_ref<'a>(handle: *mut AeEngine) -> Option<&'a AeEngine> {
    handle.as_ref()
}

fn config_from_c(config: &AeConfig) -> Result<EngineConfig, EngineError> {
    // SAFETY: the caller guarantees the path pointers are null or valid C strings.
    let (data_path, hrtf_path) = unsafe {
        (
            path_arg(config.data_path, "data_path")?,
            path_arg(config.hrtf_path, "hrtf_path")?,
        )
    };
    Ok(EngineConfig {
        sample_rate: config.sample_rate,
        max_buffer_size: config.max_buffer_size as usize,
        data_path,
        hrtf_path,
        preload_hrtf: config.preload_hrtf,
        preload_all_presets: config.preload_all_presets,
        max_reverb_time_sec: config.max_reverb_time,
        smoothing_time_ms: config.smoothing_time_ms,
        ..EngineConfig::default()
    })
}

/// Sample count of a descriptor, rejecting nulls and anything over `max_frames`
fn sample_len(buffer: &AeAudioBuffer, max_frames: usize) -> Result<usize, BufferError> {
    if buffer.samples.is_null() {
        return Err(BufferError::LengthMismatch {
            expected: buffer.frame_count,
            actual: 0,
        });
    }
    if buffer.channels == 0 || buffer.channels > 2 {
        return Err(BufferError::UnsupportedChannels {
            channels: buffer.channels as usize,
        });
    }
    if buffer.frame_count == 0 {
        return Err(BufferError::Empty);
    }
    let too_many = BufferError::TooManyFrames {
        frames: buffer.frame_count,
        max: max_frames,
    };
    if buffer.frame_count > max_frames {
        return Err(too_many);
    }
    buffer
        .frame_count
        .checked_mul(buffer.channels as usize)
        .ok_or(too_many)
}

/// Address range `[start, end)` covered by `len` samples at `ptr`
fn byte_range(ptr: *const f32, len: usize, frames: usize, max_frames: usize) -> Result<(usize, usize), BufferError> {
    let start = ptr as usize;
    let end = len
        .checked_mul(std::mem::size_of::<f32>())
        .and_then(|bytes| start.checked_add(bytes))
        .ok_or(BufferError::TooManyFrames {
            frames,
            max: max_frames,
        })?;
    Ok((start, end))
}

/// # Safety
/// Both descriptors must describe valid, properly sized sample memory.
unsafe fn process_descriptors(
    engine: &mut Engine,
    input: &AeAudioBuffer,
    output: &AeAudioBuffer,
) -> Result<(), BufferError> {
    let max_frames = engine.config().max_buffer_size;
    let in_len = sample_len(input, max_frames)?;
    let out_len = sample_len(output, max_frames)?;
    let in_layout = Layout::from_interleaved_flag(input.interleaved);
    let out_layout = Layout::from_interleaved_flag(output.interleaved);

    let (in_start, in_end) = byte_range(input.samples, in_len, input.frame_count, max_frames)?;
    let (out_start, out_end) = byte_range(output.samples, out_len, output.frame_count, max_frames)?;

    if in_start == out_start
        && in_len == out_len
        && input.channels == output.channels
        && (in_layout == out_layout || input.channels == 1)
    {
        let samples = std::slice::from_raw_parts_mut(output.samples, out_len);
        let mut buffer =
            AudioBufferMut::new(samples, output.frame_count, output.channels as usize, out_layout)?;
        return engine.process_in_place(&mut buffer).map_err(buffer_error);
    }
    if in_start < out_end && out_start < in_end {
        return Err(BufferError::PartialOverlap);
    }

    let in_samples = std::slice::from_raw_parts(input.samples as *const f32, in_len);
    let out_samples = std::slice::from_raw_parts_mut(output.samples, out_len);
    let input = AudioBuffer::new(in_samples, input.frame_count, input.channels as usize, in_layout)?;
    let mut output =
        AudioBufferMut::new(out_samples, output.frame_count, output.channels as usize, out_layout)?;
    engine.process(&input, &mut output).map_err(buffer_error)
}

fn buffer_error(err: EngineError) -> BufferError {
    match err {
        EngineError::InvalidBuffer(inner) => inner,
        _ => BufferError::Empty,
    }
}

// ============================================================================
// Version
// ============================================================================

#[no_mangle]
pub extern "C" fn ae_get_version() -> u32 {
    crate::version()
}

/// Static NUL-terminated version string
#[no_mangle]
pub extern "C" fn ae_get_version_string() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn ae_check_abi_compatibility(expected_version: u32) -> bool {
    crate::is_abi_compatible(expected_version)
}

/// Static description of a status code
#[no_mangle]
pub extern "C" fn ae_get_error_string(code: i32) -> *const c_char {
    status_message(code).as_ptr()
}

/// Detail of the last failed control call on `engine`, or null
///
/// The pointer stays valid until the next control call on the same handle.
///
/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn ae_get_last_error_detail(engine: *mut AeEngine) -> *const c_char {
    let Some(engine) = engine_ref(engine) else {
        return ptr::null();
    };
    let slot = engine
        .last_error
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    slot.as_ref().map_or(ptr::null(), |text| text.as_ptr())
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Default configuration: 48 kHz, 4096 frames, built-in data
#[no_mangle]
pub extern "C" fn ae_get_default_config() -> AeConfig {
    let defaults = EngineConfig::default();
    AeConfig {
        sample_rate: defaults.sample_rate,
        max_buffer_size: defaults.max_buffer_size as u32,
        data_path: ptr::null(),
        hrtf_path: ptr::null(),
        preload_hrtf: defaults.preload_hrtf,
        preload_all_presets: defaults.preload_all_presets,
        max_reverb_time: defaults.max_reverb_time_sec,
        smoothing_time_ms: defaults.smoothing_time_ms,
    }
}

/// Create an engine, or return null if `config` is invalid or loading fails
///
/// # Safety
/// `config` must be null or point to a valid `AeConfig` whose path fields
/// are null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn ae_create_engine(config: *const AeConfig) -> *mut AeEngine {
    let Some(config) = config.as_ref() else {
        error!("ae_create_engine: null config");
        return ptr::null_mut();
    };
    let engine = config_from_c(config).and_then(Engine::new);
    match engine {
        Ok(engine) => Box::into_raw(Box::new(AeEngine {
            controller: engine.controller().clone(),
            processor: UnsafeCell::new(engine),
            last_error: Mutex::new(None),
        })),
        Err(err) => {
            error!("ae_create_engine failed: {}", err);
            ptr::null_mut()
        }
    }
}

/// Release an engine; null is ignored
///
/// # Safety
/// `engine` must be null or a live handle not used afterwards.
#[no_mangle]
pub unsafe extern "C" fn ae_destroy_engine(engine: *mut AeEngine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Clear all DSP state before the next `ae_process`
///
/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn ae_reset(engine: *mut AeEngine) -> i32 {
    match engine_ref(engine) {
        Some(engine) => {
            engine.controller.reset();
            status::OK
        }
        None => status::INVALID_PARAMETER,
    }
}

// ============================================================================
// Parameters
// ============================================================================

macro_rules! setter {
    ($(#[$doc:meta])* $name:ident => $method:ident) => {
        $(#[$doc])*
        ///
        /// NaN is ignored; other values are clamped into range.
        ///
        /// # Safety
        /// `engine` must be null or a live handle.
        #[no_mangle]
        pub unsafe extern "C" fn $name(engine: *mut AeEngine, value: f32) -> i32 {
            match engine_ref(engine) {
                Some(engine) => {
                    engine.controller.$method(value);
                    status::OK
                }
                None => status::INVALID_PARAMETER,
            }
        }
    };
}

setter!(
    /// Source distance
    ae_set_distance => set_distance
);
setter!(
    /// Room size 0-1
    ae_set_room_size => set_room_size
);
setter!(
    /// Spectral tilt 0-1, 0.5 neutral
    ae_set_brightness => set_brightness
);
setter!(
    /// Stereo width 0-1, 0.5 unchanged
    ae_set_width => set_width
);
setter!(
    /// Dry/wet mix 0-1
    ae_set_dry_wet => set_dry_wet
);
setter!(
    /// Effect intensity 0-1
    ae_set_intensity => set_intensity
);

/// # Safety
/// `engine` must be null or a live handle; `params` null or valid.
#[no_mangle]
pub unsafe extern "C" fn ae_set_main_params(engine: *mut AeEngine, params: *const AeMainParams) -> i32 {
    match (engine_ref(engine), params.as_ref()) {
        (Some(engine), Some(params)) => {
            engine.controller.set_main_params(&SpatialDefaults::from(*params));
            status::OK
        }
        _ => status::INVALID_PARAMETER,
    }
}

/// # Safety
/// `engine` must be null or a live handle; `out` null or writable.
#[no_mangle]
pub unsafe extern "C" fn ae_get_main_params(engine: *mut AeEngine, out: *mut AeMainParams) -> i32 {
    match (engine_ref(engine), out.as_mut()) {
        (Some(engine), Some(out)) => {
            *out = engine.controller.main_params().into();
            status::OK
        }
        _ => status::INVALID_PARAMETER,
    }
}

/// # Safety
/// `engine` must be null or a live handle; `params` null or valid.
#[no_mangle]
pub unsafe extern "C" fn ae_set_extended_params(
    engine: *mut AeEngine,
    params: *const AeExtendedParams,
) -> i32 {
    match (engine_ref(engine), params.as_ref()) {
        (Some(engine), Some(params)) => {
            engine.controller.set_reverb_profile(&ReverbProfile {
                decay_time_sec: params.decay_time,
                diffusion: params.diffusion,
                modulation: params.modulation,
                lofi: params.lofi_amount,
            });
            status::OK
        }
        _ => status::INVALID_PARAMETER,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// # Safety
/// `engine` must be null or a live handle; `name` null or a C string.
#[no_mangle]
pub unsafe extern "C" fn ae_apply_scenario(
    engine: *mut AeEngine,
    name: *const c_char,
    intensity: f32,
) -> i32 {
    let Some(engine) = engine_ref(engine) else {
        return status::INVALID_PARAMETER;
    };
    let result = str_arg(name, "name").and_then(|name| engine.controller.apply_scenario(name, intensity));
    engine.status(result)
}

/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn ae_clear_scenario(engine: *mut AeEngine) -> i32 {
    match engine_ref(engine) {
        Some(engine) => {
            engine.controller.clear_scenario();
            status::OK
        }
        None => status::INVALID_PARAMETER,
    }
}

/// Stage a weighted blend of `count` scenarios
///
/// # Safety
/// `engine` must be null or a live handle; `blends` must point to `count`
/// entries whose names are C strings.
#[no_mangle]
pub unsafe extern "C" fn ae_blend_scenarios(
    engine: *mut AeEngine,
    blends: *const AeScenarioBlend,
    count: usize,
) -> i32 {
    let Some(engine) = engine_ref(engine) else {
        return status::INVALID_PARAMETER;
    };
    if blends.is_null() || count == 0 {
        return engine.record(&EngineError::InvalidParameter {
            param: "blends".to_string(),
            value: count.to_string(),
            expected: "at least one entry".to_string(),
        });
    }
    let entries = std::slice::from_raw_parts(blends, count);
    let mut parts = Vec::with_capacity(count);
    for entry in entries {
        match str_arg(entry.name, "name") {
            Ok(name) => parts.push((name, entry.weight)),
            Err(err) => return engine.record(&err),
        }
    }
    engine.status(engine.controller.blend_scenarios(&parts))
}

// ============================================================================
// Position and expressions
// ============================================================================

/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn ae_set_source_position(
    engine: *mut AeEngine,
    azimuth_deg: f32,
    elevation_deg: f32,
) -> i32 {
    match engine_ref(engine) {
        Some(engine) => {
            engine.status(engine.controller.set_source_position(azimuth_deg, elevation_deg))
        }
        None => status::INVALID_PARAMETER,
    }
}

/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn ae_clear_source_position(engine: *mut AeEngine) -> i32 {
    match engine_ref(engine) {
        Some(engine) => {
            engine.controller.clear_source_position();
            status::OK
        }
        None => status::INVALID_PARAMETER,
    }
}

/// # Safety
/// `engine` must be null or a live handle; `expression` null or a C string.
#[no_mangle]
pub unsafe extern "C" fn ae_apply_expression(engine: *mut AeEngine, expression: *const c_char) -> i32 {
    let Some(engine) = engine_ref(engine) else {
        return status::INVALID_PARAMETER;
    };
    let result = str_arg(expression, "expression")
        .and_then(|text| engine.controller.apply_expression(text).map(|_| ()));
    engine.status(result)
}

// ============================================================================
// Processing
// ============================================================================

/// Render `input` into `output`
///
/// `input` and `output` may describe the same memory (in-place); any other
/// overlap is rejected. On failure neither buffer is modified. Does not
/// allocate and does not record error detail.
///
/// # Safety
/// `engine` must be null or a live handle used by no other thread in
/// `ae_process`. Non-null descriptors must point to `frame_count *
/// channels` valid samples.
#[no_mangle]
pub unsafe extern "C" fn ae_process(
    engine: *mut AeEngine,
    input: *const AeAudioBuffer,
    output: *mut AeAudioBuffer,
) -> i32 {
    let (Some(engine), Some(input), Some(output)) = (engine_ref(engine), input.as_ref(), output.as_ref())
    else {
        return status::INVALID_PARAMETER;
    };
    // SAFETY: the caller guarantees a single audio thread per handle.
    let processor = &mut *engine.processor.get();
    match process_descriptors(processor, input, output) {
        Ok(()) => status::OK,
        Err(_) => status::INVALID_BUFFER,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_rust_defaults() {
        let config = ae_get_default_config();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.max_buffer_size, 4096);
        assert!(config.data_path.is_null());
        assert!(config.preload_hrtf);
    }

    #[test]
    fn test_error_strings() {
        let text = unsafe { CStr::from_ptr(ae_get_error_string(status::UNKNOWN_SCENARIO)) };
        assert_eq!(text.to_str().unwrap(), "Unknown scenario");
        let text = unsafe { CStr::from_ptr(ae_get_error_string(99)) };
        assert_eq!(text.to_str().unwrap(), "Unknown error");
    }

    #[test]
    fn test_version_string_is_terminated() {
        let text = unsafe { CStr::from_ptr(ae_get_version_string()) };
        assert_eq!(text.to_str().unwrap(), crate::VERSION_STRING);
    }

    #[test]
    fn test_sample_len_checks() {
        let mut data = [0.0_f32; 4];
        let mut buffer = AeAudioBuffer {
            samples: data.as_mut_ptr(),
            frame_count: 2,
            channels: 2,
            interleaved: true,
        };
        assert_eq!(sample_len(&buffer, 16), Ok(4));
        assert_eq!(
            sample_len(&buffer, 1),
            Err(BufferError::TooManyFrames { frames: 2, max: 1 })
        );
        buffer.channels = 3;
        assert!(sample_len(&buffer, 16).is_err());
        buffer.channels = 2;
        buffer.samples = ptr::null_mut();
        assert!(sample_len(&buffer, 16).is_err());
    }
}
