//! PCM stream format types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// In-memory sample representation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit integer.
    #[default]
    S16,
    /// 32-bit float in [-1.0, 1.0].
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S16 => f.write_str("s16"),
            Self::F32 => f.write_str("f32"),
        }
    }
}

/// Logical format of an interleaved PCM stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Sample representation.
    #[serde(default)]
    pub sample_format: SampleFormat,
}

impl StreamFormat {
    pub const fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Bytes in one frame (one sample per channel).
    pub const fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    /// Bytes needed to hold `duration` of audio, rounded down to whole frames.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = u128::from(self.sample_rate) * duration.as_micros() / 1_000_000;
        frames as usize * self.frame_bytes()
    }

    /// Same rate and channel layout, ignoring the sample representation.
    pub const fn same_layout(&self, other: &Self) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Returns true if the format can describe real audio.
    pub const fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}",
            self.sample_rate, self.channels, self.sample_format
        )
    }
}
