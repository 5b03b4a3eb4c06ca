// src/audio_buffer.rs

use std::ops::{AddAssign, Index, IndexMut, MulAssign};

use crate::contract;

/// Owned block of interleaved samples: ch0..chN, frame by frame.
///
/// `index = frame * channels + channel`. This layout is the contract
/// between every node and any external producer or consumer.
///
/// Storage only ever grows. Shrinking keeps the allocation so that a
/// later resize back to a previously seen shape never allocates, which
/// keeps the render path allocation-free once the block size and channel
/// count have settled.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Vec<f32>,
    frames: usize,
    channels: usize,
    size: usize,
    data_rate: f32,
}

impl AudioBuffer {
    /// Zero-filled buffer of `frames * channels` samples.
    pub fn new(frames: usize, channels: usize) -> Self {
        Self::filled(0.0, frames, channels)
    }

    pub fn filled(value: f32, frames: usize, channels: usize) -> Self {
        let size = frames * channels;
        Self {
            data: vec![value; size],
            frames,
            channels,
            size,
            data_rate: crate::config::DEFAULT_SAMPLE_RATE,
        }
    }

    /// Change the logical shape without touching element values.
    ///
    /// Reallocates only if the new size exceeds the current capacity.
    /// Contents beyond the previous logical size are unspecified.
    pub fn resize(&mut self, frames: usize, channels: usize) {
        let size = frames * channels;
        if size > self.data.len() {
            self.data.resize(size, 0.0);
        }
        self.frames = frames;
        self.channels = channels;
        self.size = size;
    }

    /// Resize and assign `value` to every logical element.
    pub fn resize_with(&mut self, frames: usize, channels: usize, value: f32) {
        self.resize(frames, channels);
        self.fill(value);
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total logical samples (`frames * channels`).
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Samples that fit without reallocating.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Nominal sample rate tag. Informational only.
    #[inline]
    pub fn data_rate(&self) -> f32 {
        self.data_rate
    }

    #[inline]
    pub fn set_data_rate(&mut self, rate: f32) {
        self.data_rate = rate;
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.data[..self.size]
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.size]
    }

    /// All channels of one frame.
    #[inline]
    pub fn frame(&self, frame: usize) -> &[f32] {
        contract!(frame < self.frames, "frame {} out of range ({} frames)", frame, self.frames);
        let start = frame * self.channels;
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn frame_mut(&mut self, frame: usize) -> &mut [f32] {
        contract!(frame < self.frames, "frame {} out of range ({} frames)", frame, self.frames);
        let start = frame * self.channels;
        &mut self.data[start..start + self.channels]
    }

    #[inline]
    pub fn clear(&mut self) {
        self.fill(0.0);
    }

    #[inline]
    pub fn fill(&mut self, value: f32) {
        self.samples_mut().fill(value);
    }

    /// Linear interpolation between the two frames bracketing `frame`.
    ///
    /// `frame` must lie in `[0, frames - 1]`; integer positions return the
    /// stored sample exactly.
    pub fn interpolate(&self, frame: f32, channel: usize) -> f32 {
        contract!(
            frame >= 0.0 && frame <= self.frames.saturating_sub(1) as f32,
            "fractional frame {} outside [0, {}]",
            frame,
            self.frames.saturating_sub(1)
        );
        contract!(channel < self.channels, "channel {} out of range ({} channels)", channel, self.channels);

        let index = frame as usize;
        let alpha = frame - index as f32;
        let here = self.data[index * self.channels + channel];
        if alpha == 0.0 || index + 1 >= self.frames {
            return here;
        }
        let next = self.data[(index + 1) * self.channels + channel];
        here + alpha * (next - here)
    }

    /// Broadcast channel 0 of every frame into all other channels.
    ///
    /// Lets a mono source satisfy a stereo consumer without a separate code path.
    pub fn fill_channels(&mut self) {
        let channels = self.channels;
        if channels < 2 {
            return;
        }
        for frame in self.data[..self.size].chunks_exact_mut(channels) {
            let first = frame[0];
            frame[1..].fill(first);
        }
    }

    /// Copy `other` element for element. Shapes must match.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        self.check_shape(other, "copy_from");
        let n = self.size.min(other.size);
        self.data[..n].copy_from_slice(&other.data[..n]);
    }

    /// Copy one channel of `other` into every channel of `self`, frame by frame.
    ///
    /// Used to read a control or frequency stream regardless of the
    /// source's channel count.
    pub fn copy_channel_from(&mut self, other: &AudioBuffer, channel: usize) {
        contract!(channel < other.channels, "channel {} out of range ({} channels)", channel, other.channels);
        contract!(other.frames >= self.frames, "source has {} frames, need {}", other.frames, self.frames);
        let src_channels = other.channels.max(1);
        let channels = self.channels.max(1);
        for (dst, src) in self.data[..self.size]
            .chunks_exact_mut(channels)
            .zip(other.data[..other.size].chunks_exact(src_channels))
        {
            let value = src.get(channel).copied().unwrap_or(0.0);
            dst.fill(value);
        }
    }

    #[inline]
    fn check_shape(&self, other: &AudioBuffer, op: &str) {
        contract!(
            self.frames == other.frames && self.channels == other.channels,
            "{}: shape {}x{} does not match {}x{}",
            op,
            self.frames,
            self.channels,
            other.frames,
            other.channels
        );
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Index<usize> for AudioBuffer {
    type Output = f32;

    #[inline]
    fn index(&self, n: usize) -> &f32 {
        contract!(n < self.size, "index {} out of range ({} samples)", n, self.size);
        &self.data[n]
    }
}

impl IndexMut<usize> for AudioBuffer {
    #[inline]
    fn index_mut(&mut self, n: usize) -> &mut f32 {
        contract!(n < self.size, "index {} out of range ({} samples)", n, self.size);
        &mut self.data[n]
    }
}

impl Index<(usize, usize)> for AudioBuffer {
    type Output = f32;

    #[inline]
    fn index(&self, (frame, channel): (usize, usize)) -> &f32 {
        contract!(
            frame < self.frames && channel < self.channels,
            "invalid frame ({}) or channel ({})",
            frame,
            channel
        );
        &self.data[frame * self.channels + channel]
    }
}

impl IndexMut<(usize, usize)> for AudioBuffer {
    #[inline]
    fn index_mut(&mut self, (frame, channel): (usize, usize)) -> &mut f32 {
        contract!(
            frame < self.frames && channel < self.channels,
            "invalid frame ({}) or channel ({})",
            frame,
            channel
        );
        &mut self.data[frame * self.channels + channel]
    }
}

impl AddAssign<&AudioBuffer> for AudioBuffer {
    fn add_assign(&mut self, other: &AudioBuffer) {
        self.check_shape(other, "+=");
        let n = self.size.min(other.size);
        for (out, x) in self.data[..n].iter_mut().zip(&other.data[..n]) {
            *out += x;
        }
    }
}

impl MulAssign<&AudioBuffer> for AudioBuffer {
    fn mul_assign(&mut self, other: &AudioBuffer) {
        self.check_shape(other, "*=");
        let n = self.size.min(other.size);
        for (out, x) in self.data[..n].iter_mut().zip(&other.data[..n]) {
            *out *= x;
        }
    }
}
