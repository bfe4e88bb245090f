//! Spatialization
//!
//! Places the direct sound in space:
//! - HRTF datasets (loaded or synthesized) and nearest-direction lookup
//! - Parametric ITD/ILD cues for directions the dataset does not cover
//! - The direct-path renderer with air absorption and stereo width

pub mod binaural;
pub mod hrtf;
pub mod spatializer;

pub use binaural::BinauralCues;
pub use hrtf::{HrirMeasurement, HrtfDataset, HrtfStore, MAX_HRTF_TAPS};
pub use spatializer::{apply_width, DirectControls, Spatializer};
