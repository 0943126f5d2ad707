//! Fixture files for decoder, pump and controller tests.

#![allow(clippy::unwrap_used, clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};

/// Write a 16-bit PCM WAV file from interleaved samples.
pub fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

/// Write `frames` frames of a 440 Hz tone at half scale.
pub fn write_sine_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, frames: usize) -> PathBuf {
    let samples: Vec<i16> = (0..frames)
        .flat_map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = (t * 440.0 * std::f32::consts::TAU).sin() * 16_000.0;
            std::iter::repeat(value as i16).take(usize::from(channels))
        })
        .collect();
    write_wav(dir, name, sample_rate, channels, &samples)
}

/// Header of an MPEG-1 Layer III frame: 128 kbit/s, 44.1 kHz, stereo, no CRC.
const MP3_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];

/// Bytes after the header in an unpadded 128 kbit/s, 44.1 kHz frame.
const MP3_BODY_LEN: usize = 413;

/// Frames per channel in one MPEG-1 Layer III frame.
pub const MP3_FRAME_SAMPLES: u64 = 1152;

/// Write a stereo 44.1 kHz MP3 with one frame per entry of `frames`.
///
/// `true` is a silent frame that decodes cleanly. `false` is a frame whose
/// side info claims more big values than a granule holds, so the decoder
/// rejects it. There is no Xing tag, and with fewer than 16 frames the
/// demuxer cannot estimate a frame count.
pub fn write_mp3(dir: &Path, name: &str, frames: &[bool]) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = Vec::with_capacity(frames.len() * (MP3_HEADER.len() + MP3_BODY_LEN));
    for &decodable in frames {
        let mut body = [0u8; MP3_BODY_LEN];
        if !decodable {
            // big_values = 511 for granule 0, channel 0
            body[4] = 0xFF;
            body[5] = 0x80;
        }
        bytes.extend_from_slice(&MP3_HEADER);
        bytes.extend_from_slice(&body);
    }
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Write a file that no demuxer recognises.
pub fn write_garbage(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let text = "this is a playlist note, not audio.\n".repeat(200);
    std::fs::write(&path, text).unwrap();
    path
}
