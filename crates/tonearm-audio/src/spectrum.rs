//! Spectrum analysis for visualization.
//!
//! Each decoded block is reduced to 32 bands per channel: the most recent
//! window of frames is Hann-weighted, transformed with an FFT, and the mean
//! power of each band of bins is mapped onto a floored decibel scale.

use std::sync::Arc;

use parking_lot::RwLock;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::decode::SampleBlock;

/// Number of frequency bands per channel.
pub const BANDS: usize = 32;
/// Number of channels tracked.
pub const CHANNELS: usize = 2;

/// Frames analyzed per update.
const FFT_SIZE: usize = 512;
/// Bins averaged into one band.
const BINS_PER_BAND: usize = FFT_SIZE / 2 / BANDS;
/// Keeps `log10` away from zero.
const POWER_EPSILON: f32 = 1e-15;
/// Shifts typical powers from [-100, 0] dB to [0, 100].
const DB_OFFSET: f32 = 100.0;
/// Per-cycle multiplier while idle.
const DECAY_FACTOR: f32 = 0.98;
/// Values below this snap to zero during decay.
const DECAY_SNAP: f32 = 0.1;

/// Band magnitudes in dB, all values ≥ 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spectrum {
    values: [[f32; BANDS]; CHANNELS],
}

impl Default for Spectrum {
    fn default() -> Self {
        Self {
            values: [[0.0; BANDS]; CHANNELS],
        }
    }
}

impl Spectrum {
    /// Magnitude of `band` on `channel`.
    pub fn band(&self, channel: usize, band: usize) -> f32 {
        self.values[channel][band]
    }

    /// All bands of one channel.
    pub const fn channel(&self, channel: usize) -> &[f32; BANDS] {
        &self.values[channel]
    }

    /// Returns true when every band is exactly zero.
    pub fn is_silent(&self) -> bool {
        self.values.iter().flatten().all(|v| *v == 0.0)
    }

    /// Largest value across all bands.
    pub fn peak(&self) -> f32 {
        self.values.iter().flatten().copied().fold(0.0, f32::max)
    }
}

/// Spectrum shared between the analyzer and its readers.
pub type SharedSpectrum = Arc<RwLock<Spectrum>>;

/// Create a new zeroed shared spectrum.
pub fn shared_spectrum() -> SharedSpectrum {
    Arc::new(RwLock::new(Spectrum::default()))
}

/// Computes band magnitudes from decoded blocks.
pub struct SpectrumAnalyzer {
    shared: SharedSpectrum,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer that publishes into `shared`.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(shared: SharedSpectrum) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(FFT_SIZE);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        let window = (0..FFT_SIZE)
            .map(|i| {
                0.5 * (1.0 - (std::f32::consts::TAU * i as f32 / FFT_SIZE as f32).cos())
            })
            .collect();

        Self {
            shared,
            fft,
            window,
            buffer: vec![Complex::default(); FFT_SIZE],
            scratch,
        }
    }

    /// Handle for readers of the published spectrum.
    pub fn shared(&self) -> SharedSpectrum {
        self.shared.clone()
    }

    /// Recompute the bands of every channel present in `block`.
    pub fn update(&mut self, block: &SampleBlock) {
        let channels = usize::from(block.channels());
        if channels == 0 || block.is_empty() {
            return;
        }

        let samples = block.samples();
        let frames = samples.len() / channels;
        // Most recent window of the block
        let start = frames.saturating_sub(FFT_SIZE);
        let used = frames - start;
        let scale = 1.0 / (FFT_SIZE * FFT_SIZE) as f32;

        let mut bands = [[0.0f32; BANDS]; CHANNELS];
        for (ch, out) in bands.iter_mut().enumerate().take(channels.min(CHANNELS)) {
            for (i, slot) in self.buffer.iter_mut().enumerate() {
                let value = if i < used {
                    f32::from(samples[(start + i) * channels + ch]) / 32768.0
                } else {
                    0.0
                };
                *slot = Complex::new(value * self.window[i], 0.0);
            }

            self.fft
                .process_with_scratch(&mut self.buffer, &mut self.scratch);

            for (band, value) in out.iter_mut().enumerate() {
                let bins = &self.buffer[band * BINS_PER_BAND..(band + 1) * BINS_PER_BAND];
                let power =
                    bins.iter().map(Complex::norm_sqr).sum::<f32>() * scale / BINS_PER_BAND as f32;
                *value = to_db(power);
            }
        }

        let mut spectrum = self.shared.write();
        for (ch, values) in bands.iter().enumerate().take(channels.min(CHANNELS)) {
            spectrum.values[ch] = *values;
        }
    }

    /// Let every band fall toward zero.
    pub fn decay(&self) {
        let mut spectrum = self.shared.write();
        for value in spectrum.values.iter_mut().flatten() {
            *value *= DECAY_FACTOR;
            if *value < DECAY_SNAP {
                *value = 0.0;
            }
        }
    }
}

/// Zero every band, as at the start of a track.
pub fn reset(shared: &SharedSpectrum) {
    *shared.write() = Spectrum::default();
}

/// Floored decibel scale used for display.
fn to_db(power: f32) -> f32 {
    (10.0 * (power + POWER_EPSILON).log10() + DB_OFFSET).max(0.0)
}
