//! Buffer I/O adapter
//!
//! Caller buffers arrive as flat `f32` slices in either interleaved
//! (`L R L R ...`) or planar (`L L ... R R ...`) layout, mono or stereo.
//! They are checked once on entry and wrapped in [`AudioBuffer`] /
//! [`AudioBufferMut`]; the pipeline only ever works on the stereo scratch in
//! [`StereoScratch`]. This is the only place channel layout is interpreted.

use crate::error::BufferError;

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    Mono,
    /// Two channels (stereo: left, right)
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

/// Sample ordering inside the flat slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layout {
    /// Frames stored one after another: `L0 R0 L1 R1 ...`
    #[default]
    Interleaved,
    /// Channels stored one after another: `L0 L1 ... R0 R1 ...`
    Planar,
}

impl Layout {
    pub fn from_interleaved_flag(interleaved: bool) -> Self {
        if interleaved {
            Layout::Interleaved
        } else {
            Layout::Planar
        }
    }

    #[cfg(test)]
    fn index(self, frame: usize, channel: usize, frames: usize, channels: usize) -> usize {
        match self {
            Layout::Interleaved => frame * channels + channel,
            Layout::Planar => channel * frames + frame,
        }
    }
}

fn check_shape(len: usize, frames: usize, channels: usize) -> Result<ChannelLayout, BufferError> {
    let layout =
        ChannelLayout::from_count(channels).ok_or(BufferError::UnsupportedChannels { channels })?;
    if frames == 0 {
        return Err(BufferError::Empty);
    }
    let expected = frames
        .checked_mul(channels)
        .ok_or(BufferError::TooManyFrames {
            frames,
            max: usize::MAX / channels,
        })?;
    if len != expected {
        return Err(BufferError::LengthMismatch {
            expected,
            actual: len,
        });
    }
    Ok(layout)
}

// ============================================================================
// Buffer Views
// ============================================================================

/// Read-only view of a caller buffer
#[derive(Debug, Clone, Copy)]
pub struct AudioBuffer<'a> {
    samples: &'a [f32],
    frames: usize,
    channels: ChannelLayout,
    layout: Layout,
}

impl<'a> AudioBuffer<'a> {
    /// Wrap `samples` holding `frames` frames of `channels` channels
    pub fn new(
        samples: &'a [f32],
        frames: usize,
        channels: usize,
        layout: Layout,
    ) -> Result<Self, BufferError> {
        let channels = check_shape(samples.len(), frames, channels)?;
        Ok(Self {
            samples,
            frames,
            channels,
            layout,
        })
    }

    /// Wrap an interleaved slice, deriving the frame count from its length
    pub fn interleaved(samples: &'a [f32], channels: usize) -> Result<Self, BufferError> {
        let frames = if channels == 0 { 0 } else { samples.len() / channels };
        Self::new(samples, frames, channels, Layout::Interleaved)
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> ChannelLayout {
        self.channels
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    /// Sample at `frame` on `channel`
    #[cfg(test)]
    fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels.num_channels();
        self.samples[self.layout.index(frame, channel, self.frames, channels)]
    }
}

/// Writable view of a caller buffer
#[derive(Debug)]
pub struct AudioBufferMut<'a> {
    samples: &'a mut [f32],
    frames: usize,
    channels: ChannelLayout,
    layout: Layout,
}

impl<'a> AudioBufferMut<'a> {
    /// Wrap `samples` holding `frames` frames of `channels` channels
    pub fn new(
        samples: &'a mut [f32],
        frames: usize,
        channels: usize,
        layout: Layout,
    ) -> Result<Self, BufferError> {
        let channels = check_shape(samples.len(), frames, channels)?;
        Ok(Self {
            samples,
            frames,
            channels,
            layout,
        })
    }

    /// Wrap an interleaved slice, deriving the frame count from its length
    pub fn interleaved(samples: &'a mut [f32], channels: usize) -> Result<Self, BufferError> {
        let frames = if channels == 0 { 0 } else { samples.len() / channels };
        Self::new(samples, frames, channels, Layout::Interleaved)
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> ChannelLayout {
        self.channels
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Reborrow as a read-only view (used for in-place processing)
    pub fn as_buffer(&self) -> AudioBuffer<'_> {
        AudioBuffer {
            samples: self.samples,
            frames: self.frames,
            channels: self.channels,
            layout: self.layout,
        }
    }

    #[cfg(test)]
    fn set_sample(&mut self, frame: usize, channel: usize, value: f32) {
        let channels = self.channels.num_channels();
        let index = self.layout.index(frame, channel, self.frames, channels);
        self.samples[index] = value;
    }
}

// ============================================================================
// Stereo Scratch
// ============================================================================

/// Pre-allocated per-channel working storage
#[derive(Debug, Clone, Default)]
pub struct StereoScratch {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl StereoScratch {
    /// Allocate room for `capacity` frames per channel
    pub fn new(capacity: usize) -> Self {
        Self {
            left: vec![0.0; capacity],
            right: vec![0.0; capacity],
        }
    }

    /// De-interleave `input` into the scratch; mono is duplicated to both sides
    pub fn load(&mut self, input: &AudioBuffer<'_>) {
        let frames = input.frames();
        let (left, right) = self.channels_mut(frames);
        match (input.channels(), input.layout()) {
            (ChannelLayout::Mono, _) => {
                left.copy_from_slice(input.samples());
                right.copy_from_slice(input.samples());
            }
            (ChannelLayout::Stereo, Layout::Planar) => {
                let (l, r) = input.samples().split_at(frames);
                left.copy_from_slice(l);
                right.copy_from_slice(r);
            }
            (ChannelLayout::Stereo, Layout::Interleaved) => {
                for (i, frame) in input.samples().chunks_exact(2).enumerate() {
                    left[i] = frame[0];
                    right[i] = frame[1];
                }
            }
        }
    }

    /// Write the first `output.frames()` frames back out; mono output averages
    pub fn store(&self, output: &mut AudioBufferMut<'_>) {
        let frames = output.frames();
        let left = &self.left[..frames];
        let right = &self.right[..frames];
        match output.channels() {
            ChannelLayout::Mono => {
                for (dst, (l, r)) in output.samples.iter_mut().zip(left.iter().zip(right)) {
                    *dst = 0.5 * (l + r);
                }
            }
            ChannelLayout::Stereo => match output.layout() {
                Layout::Planar => {
                    let (l, r) = output.samples.split_at_mut(frames);
                    l.copy_from_slice(left);
                    r.copy_from_slice(right);
                }
                Layout::Interleaved => {
                    for (i, frame) in output.samples.chunks_exact_mut(2).enumerate() {
                        frame[0] = left[i];
                        frame[1] = right[i];
                    }
                }
            },
        }
    }

    /// Left and right channels limited to `frames`
    pub fn channels(&self, frames: usize) -> (&[f32], &[f32]) {
        (&self.left[..frames], &self.right[..frames])
    }

    /// Mutable left and right channels limited to `frames`
    pub fn channels_mut(&mut self, frames: usize) -> (&mut [f32], &mut [f32]) {
        (&mut self.left[..frames], &mut self.right[..frames])
    }

    /// Zero everything
    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_channel_layout() {
        assert_eq!(ChannelLayout::Mono.num_channels(), 1);
        assert_eq!(ChannelLayout::Stereo.num_channels(), 2);
        assert_eq!(ChannelLayout::from_count(1), Some(ChannelLayout::Mono));
        assert_eq!(ChannelLayout::from_count(2), Some(ChannelLayout::Stereo));
        assert_eq!(ChannelLayout::from_count(6), None);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let data = [0.0_f32; 6];
        assert_eq!(
            AudioBuffer::new(&data, 3, 3, Layout::Interleaved).unwrap_err(),
            BufferError::UnsupportedChannels { channels: 3 }
        );
        assert_eq!(
            AudioBuffer::new(&data, 0, 2, Layout::Interleaved).unwrap_err(),
            BufferError::Empty
        );
        assert_eq!(
            AudioBuffer::new(&data, 4, 2, Layout::Planar).unwrap_err(),
            BufferError::LengthMismatch {
                expected: 8,
                actual: 6
            }
        );
        assert_eq!(
            AudioBuffer::interleaved(&data[..5], 2).unwrap_err(),
            BufferError::LengthMismatch {
                expected: 4,
                actual: 5
            }
        );
    }

    #[test]
    fn test_overflowing_shape_is_an_error() {
        let data = [0.0_f32; 4];
        let frames = usize::MAX / 2 + 1;
        assert_eq!(
            AudioBuffer::new(&data, frames, 2, Layout::Interleaved).unwrap_err(),
            BufferError::TooManyFrames {
                frames,
                max: usize::MAX / 2
            }
        );
    }

    #[test]
    fn test_interleaved_round_trip() {
        let original = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let input = AudioBuffer::interleaved(&original, 2).unwrap();
        let mut scratch = StereoScratch::new(16);
        scratch.load(&input);

        let (left, right) = scratch.channels(4);
        assert_eq!(left, &[0.1, 0.3, 0.5, 0.7]);
        assert_eq!(right, &[0.2, 0.4, 0.6, 0.8]);

        let mut out = vec![0.0; 8];
        let mut output = AudioBufferMut::interleaved(&mut out, 2).unwrap();
        scratch.store(&mut output);
        assert_eq!(out, original);
    }

    #[test]
    fn test_planar_round_trip() {
        let original = vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0];
        let input = AudioBuffer::new(&original, 3, 2, Layout::Planar).unwrap();
        assert_eq!(input.sample(1, 1), -2.0);

        let mut scratch = StereoScratch::new(3);
        scratch.load(&input);

        let mut out = vec![0.0; 6];
        let mut output = AudioBufferMut::new(&mut out, 3, 2, Layout::Planar).unwrap();
        scratch.store(&mut output);
        assert_eq!(out, original);
    }

    #[test]
    fn test_mono_in_stereo_out_duplicates() {
        let mono = [0.25, -0.5];
        let mut scratch = StereoScratch::new(4);
        scratch.load(&AudioBuffer::interleaved(&mono, 1).unwrap());

        let mut out = vec![0.0; 4];
        scratch.store(&mut AudioBufferMut::interleaved(&mut out, 2).unwrap());
        assert_eq!(out, vec![0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn test_stereo_in_mono_out_averages() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        let mut scratch = StereoScratch::new(4);
        scratch.load(&AudioBuffer::interleaved(&stereo, 2).unwrap());

        let mut out = vec![9.0; 2];
        scratch.store(&mut AudioBufferMut::interleaved(&mut out, 1).unwrap());
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_set_sample_respects_layout() {
        let mut data = vec![0.0; 4];
        {
            let mut view = AudioBufferMut::new(&mut data, 2, 2, Layout::Planar).unwrap();
            view.set_sample(1, 0, 7.0);
            view.set_sample(0, 1, 8.0);
            assert_eq!(view.as_buffer().sample(1, 0), 7.0);
        }
        assert_eq!(data, vec![0.0, 7.0, 8.0, 0.0]);
    }
}
