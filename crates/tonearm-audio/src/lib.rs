//! # tonearm-audio
//!
//! Decode-and-stream playback engine for Tonearm.
//!
//! Features:
//! - Symphonia-based incremental decoding with seeking
//! - 32-band spectrum analysis of decoded blocks
//! - Lock-free ring buffer between the pump and the cpal callback
//! - Playlist controller with bounded auto-advance

pub mod buffer;
pub mod config;
pub mod context;
pub mod controller;
pub mod decode;
pub mod output;
pub mod pump;
pub mod resample;
pub mod spectrum;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::PlayerConfig;
pub use context::PlaybackState;
pub use controller::{AdvanceOutcome, PlaybackController, SessionSnapshot};
pub use decode::{SampleBlock, TrackHandle, TrackInfo};
pub use output::{AudioOutput, OutputStream, StreamTap};
pub use pump::{Cycle, Pump, PumpEvent};
pub use spectrum::{SharedSpectrum, Spectrum, SpectrumAnalyzer};
