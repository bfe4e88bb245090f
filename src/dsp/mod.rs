//! Signal processing building blocks
//!
//! Stateful DSP used by the pipeline. Nothing here allocates after
//! construction.

pub mod filter;
pub mod reverb;

pub use filter::{OnePole, TiltFilter};
pub use reverb::{Reverb, ReverbControls};

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}
