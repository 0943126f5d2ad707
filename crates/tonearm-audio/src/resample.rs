//! Sample-rate conversion using rubato.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tonearm_core::{Error, Result};
use tracing::debug;

/// Nominal input chunk handed to rubato, in frames.
const CHUNK_FRAMES: usize = 1024;

/// Converts interleaved `f32` audio between sample rates.
///
/// Input is collected per channel until a full rubato chunk is available, so
/// up to one chunk of input can be held back until [`Resampler::flush`].
/// rubato's filter delay is trimmed from the front of the output, and flush
/// runs silence through until every accepted input frame has come out.
pub struct Resampler {
    /// `None` when input and output rates match.
    #[allow(clippy::struct_field_names)]
    resampler: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk.
    input_buffer: Vec<Vec<f32>>,
    /// Chunk handed to rubato.
    chunk: Vec<Vec<f32>>,
    /// Leading output frames still to discard.
    delay_remaining: usize,
    /// Input frames accepted since the last flush or reset.
    consumed: u64,
    /// Output frames emitted since the last flush or reset.
    emitted: u64,
}

impl Resampler {
    /// Create a new resampler.
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let resampler = if input_rate == output_rate {
            None
        } else {
            let resampler = FftFixedIn::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            )
            .map_err(|e| Error::Internal(format!("Failed to create resampler: {e}")))?;
            debug!(
                "Resampler created: {}Hz -> {}Hz, {} channels, {} frames delay",
                input_rate,
                output_rate,
                channels,
                resampler.output_delay()
            );
            Some(resampler)
        };
        let delay_remaining = resampler.as_ref().map_or(0, RubatoResampler::output_delay);

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            channels,
            input_buffer: vec![Vec::new(); channels],
            chunk: vec![Vec::new(); channels],
            delay_remaining,
            consumed: 0,
            emitted: 0,
        })
    }

    /// Check if resampling is needed.
    pub const fn needs_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// Get the input sample rate.
    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Get the output sample rate.
    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Get the number of channels.
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Input frames accepted but not yet emitted, including those inside
    /// the filter delay.
    #[allow(clippy::cast_possible_truncation)]
    pub fn pending_frames(&self) -> usize {
        if self.resampler.is_none() {
            return 0;
        }
        let covered = self.emitted * u64::from(self.input_rate) / u64::from(self.output_rate);
        self.consumed.saturating_sub(covered) as usize
    }

    /// Resample interleaved `input`, appending interleaved output to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_ref() else {
            out.extend_from_slice(input);
            return Ok(());
        };
        let needed = resampler.input_frames_next();

        for frame in input.chunks_exact(self.channels) {
            for (buffer, sample) in self.input_buffer.iter_mut().zip(frame) {
                buffer.push(*sample);
            }
        }
        self.consumed += (input.len() / self.channels) as u64;

        while self.input_buffer[0].len() >= needed {
            for (chunk, buffer) in self.chunk.iter_mut().zip(&mut self.input_buffer) {
                chunk.clear();
                chunk.extend(buffer.drain(..needed));
            }
            self.run_chunk(usize::MAX, out)?;
        }

        Ok(())
    }

    /// Emit any held-back input, then start over with a fresh filter.
    ///
    /// The output covers exactly `consumed * output_rate / input_rate`
    /// frames (rounded up) since the last flush or reset.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_ref() else {
            return Ok(());
        };
        let needed = resampler.input_frames_next();
        let chunk_out = resampler.output_frames_max().max(1);

        let expected =
            (self.consumed * u64::from(self.output_rate)).div_ceil(u64::from(self.input_rate));
        #[allow(clippy::cast_possible_truncation)]
        let missing = expected.saturating_sub(self.emitted) as usize;
        // Pending input plus the filter delay, with one chunk of slack
        let max_chunks = (self.delay_remaining + missing).div_ceil(chunk_out) + 2;

        for _ in 0..max_chunks {
            if self.emitted >= expected {
                break;
            }
            for (chunk, buffer) in self.chunk.iter_mut().zip(&mut self.input_buffer) {
                chunk.clear();
                let take = buffer.len().min(needed);
                chunk.extend(buffer.drain(..take));
                chunk.resize(needed, 0.0);
            }
            #[allow(clippy::cast_possible_truncation)]
            let limit = (expected - self.emitted) as usize;
            self.run_chunk(limit, out)?;
        }

        self.reset();
        Ok(())
    }

    /// Drop held-back input and reset filter state.
    pub fn reset(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
            self.delay_remaining = resampler.output_delay();
        }
        self.input_buffer.iter_mut().for_each(Vec::clear);
        self.consumed = 0;
        self.emitted = 0;
    }

    /// Resample `self.chunk`, dropping delay frames and keeping at most `limit`.
    fn run_chunk(&mut self, limit: usize, out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        let resampled = resampler
            .process(&self.chunk, None)
            .map_err(|e| Error::Internal(format!("Resample failed: {e}")))?;

        let frames = resampled.first().map_or(0, Vec::len);
        let skip = self.delay_remaining.min(frames);
        self.delay_remaining -= skip;
        let written = interleave(&resampled, skip, limit, out);
        self.emitted += written as u64;
        Ok(())
    }
}

/// Interleave planar `channels` onto `out`, starting at frame `skip` and
/// taking at most `max_frames`. Returns the frames written.
fn interleave(channels: &[Vec<f32>], skip: usize, max_frames: usize, out: &mut Vec<f32>) -> usize {
    let Some(first) = channels.first() else {
        return 0;
    };
    let frames = first.len().saturating_sub(skip).min(max_frames);
    out.reserve(frames * channels.len());
    for frame in skip..skip + frames {
        for channel in channels {
            out.push(channel[frame]);
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut resampler = Resampler::new(48000, 48000, 2).unwrap();
        assert!(!resampler.needs_resampling());

        let input = vec![0.5f32; 2048];
        let mut out = Vec::new();
        resampler.process(&input, &mut out).unwrap();
        assert_eq!(out.len(), input.len());
        assert_eq!(resampler.pending_frames(), 0);
    }

    #[test]
    fn test_resampler_creation() {
        let resampler = Resampler::new(48000, 44100, 2).unwrap();
        assert!(resampler.needs_resampling());
        assert_eq!(resampler.input_rate(), 48000);
        assert_eq!(resampler.output_rate(), 44100);
        assert_eq!(resampler.channels(), 2);
    }

    #[test]
    fn test_holds_partial_chunk_until_flush() {
        let mut resampler = Resampler::new(22050, 44100, 1).unwrap();
        let mut out = Vec::new();

        resampler.process(&vec![0.25f32; 100], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(resampler.pending_frames(), 100);

        resampler.flush(&mut out).unwrap();
        assert_eq!(resampler.pending_frames(), 0);
        assert_eq!(out.len(), 200);
    }

    #[test]
    fn test_output_tracks_rate_ratio() {
        let mut resampler = Resampler::new(22050, 44100, 2).unwrap();
        let mut out = Vec::new();

        resampler.process(&vec![0.0f32; 2 * 22050], &mut out).unwrap();
        resampler.flush(&mut out).unwrap();

        let frames = out.len() / 2;
        assert!(frames.abs_diff(44100) <= 2, "got {frames} frames");
    }

    /// Count frames whose every channel is above `threshold`.
    fn loud_frames(out: &[f32], channels: usize, threshold: f32) -> usize {
        out.chunks_exact(channels)
            .filter(|frame| frame.iter().all(|s| s.abs() > threshold))
            .count()
    }

    #[test]
    fn test_flush_keeps_the_whole_tail() {
        for (input_rate, output_rate) in [(22050, 44100), (44100, 48000), (48000, 44100)] {
            let mut resampler = Resampler::new(input_rate, output_rate, 2).unwrap();
            let mut out = Vec::new();

            resampler.process(&vec![0.5f32; 2 * 3000], &mut out).unwrap();
            resampler.flush(&mut out).unwrap();

            let expected = (3000 * u64::from(output_rate)).div_ceil(u64::from(input_rate));
            let expected = usize::try_from(expected).unwrap();
            let frames = out.len() / 2;
            assert_eq!(frames, expected, "{input_rate} -> {output_rate}");

            // Only the filter edges may fall below half level
            let loud = loud_frames(&out, 2, 0.25);
            assert!(
                expected - loud <= 4,
                "{input_rate} -> {output_rate}: {loud} of {expected} frames carry the signal"
            );
        }
    }

    #[test]
    fn test_signal_starts_without_delay() {
        let mut resampler = Resampler::new(44100, 48000, 1).unwrap();
        let mut out = Vec::new();

        resampler.process(&vec![0.5f32; 4096], &mut out).unwrap();
        assert!(!out.is_empty());
        // Past the filter ramp-in the signal is already at level
        assert!(out[8..out.len().min(256)].iter().all(|s| s.abs() > 0.25));
    }

    #[test]
    fn test_flush_starts_a_fresh_stream() {
        let mut resampler = Resampler::new(22050, 44100, 1).unwrap();
        let mut out = Vec::new();

        resampler.process(&vec![0.5f32; 100], &mut out).unwrap();
        resampler.flush(&mut out).unwrap();
        assert_eq!(out.len(), 200);

        out.clear();
        resampler.process(&vec![0.5f32; 100], &mut out).unwrap();
        resampler.flush(&mut out).unwrap();
        assert_eq!(out.len(), 200);
        assert!(loud_frames(&out, 1, 0.25) >= 196);
    }

    #[test]
    fn test_reset_drops_pending() {
        let mut resampler = Resampler::new(44100, 48000, 2).unwrap();
        let mut out = Vec::new();
        resampler.process(&[0.1f32; 64], &mut out).unwrap();
        assert_eq!(resampler.pending_frames(), 32);

        resampler.reset();
        assert_eq!(resampler.pending_frames(), 0);
    }
}
