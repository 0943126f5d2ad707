//! Incremental audio decoding using symphonia.
//!
//! A [`TrackHandle`] owns the demuxer and codec state of one open file and
//! hands out interleaved `i16` samples on demand. Sample counts and cursors are
//! in interleaved samples, so one stereo frame is two samples.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
    units::TimeBase,
};
use tonearm_core::{Error, Result, SampleFormat, StreamFormat};
use tracing::{debug, trace, warn};

/// Consecutive undecodable packets tolerated before the stream is given up.
const MAX_DECODE_RETRIES: usize = 3;

/// Static properties of an open track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total interleaved samples in the track.
    pub total_samples: u64,
}

impl TrackInfo {
    /// Decoder-native format of the samples this track produces.
    pub const fn format(&self) -> StreamFormat {
        StreamFormat::new(self.sample_rate, self.channels, SampleFormat::S16)
    }

    /// Track length in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        self.total_samples as f64 / f64::from(self.channels) / f64::from(self.sample_rate)
    }
}

/// Interleaved PCM produced by one [`TrackHandle::read`] call.
#[derive(Debug, Clone, Default)]
pub struct SampleBlock {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl SampleBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a block from raw interleaved samples.
    pub const fn from_samples(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * SampleFormat::S16.bytes_per_sample()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn format(&self) -> StreamFormat {
        StreamFormat::new(self.sample_rate, self.channels, SampleFormat::S16)
    }

    /// Empty the block and tag it with a new format, keeping the allocation.
    fn reset(&mut self, sample_rate: u32, channels: u16) {
        self.samples.clear();
        self.sample_rate = sample_rate;
        self.channels = channels;
    }
}

/// Demuxer and codec state bound to the open file.
struct OpenStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    /// Most recently decoded packet, interleaved. Reused across packets.
    buffer: Option<SampleBuffer<i16>>,
    /// Samples of `buffer` already handed out.
    offset: usize,
    /// The demuxer has no more packets for this track.
    at_end: bool,
}

impl OpenStream {
    /// Decoded samples not yet handed out.
    fn buffered(&self) -> &[i16] {
        self.buffer
            .as_ref()
            .map_or(&[][..], |b| &b.samples()[self.offset.min(b.len())..])
    }

    fn discard_buffered(&mut self) {
        self.offset = self.buffer.as_ref().map_or(0, SampleBuffer::len);
    }
}

/// Decoder state for one open file.
pub struct TrackHandle {
    path: PathBuf,
    info: TrackInfo,
    cursor: u64,
    stream: Option<OpenStream>,
}

impl std::fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackHandle")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("cursor", &self.cursor)
            .field("closed", &self.stream.is_none())
            .finish()
    }
}

impl TrackHandle {
    /// Open a file and prepare it for decoding.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (mut stream, params) = open_stream(path)?;

        let sample_rate = params.sample_rate.unwrap_or(0);
        let channels = params.channels;
        if sample_rate == 0 {
            return Err(Error::MalformedStream(format!(
                "{}: missing sample rate",
                path.display()
            )));
        }
        if !matches!(channels, Some(1 | 2)) {
            return Err(Error::MalformedStream(format!(
                "{}: unsupported channel count {channels:?}",
                path.display()
            )));
        }
        let channels = channels.unwrap_or(2);

        let total_frames = match params.n_frames {
            Some(frames) => frames,
            None => {
                // No frame count in the container: walk the packet index once,
                // then start over on a fresh reader.
                let frames = count_frames(&mut stream)?;
                stream = open_stream(path)?.0;
                frames
            }
        };
        if total_frames == 0 {
            return Err(Error::EmptyStream(format!(
                "{}: no audio frames",
                path.display()
            )));
        }

        let info = TrackInfo {
            sample_rate,
            channels,
            total_samples: total_frames * u64::from(channels),
        };

        let mut handle = Self {
            path: path.to_path_buf(),
            info,
            cursor: 0,
            stream: Some(stream),
        };

        // Prove at least one packet decodes before accepting the file.
        if !handle.load_next_packet()? {
            return Err(Error::EmptyStream(format!(
                "{}: no decodable packets",
                path.display()
            )));
        }

        debug!(
            "Opened {}: {} Hz, {} channels, {} samples ({:.1}s)",
            path.display(),
            info.sample_rate,
            info.channels,
            info.total_samples,
            info.duration_secs()
        );

        Ok(handle)
    }

    pub const fn info(&self) -> TrackInfo {
        self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the next sample `read` will return.
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Fraction of the track already decoded, in [0, 1].
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        self.cursor as f64 / self.info.total_samples as f64
    }

    pub const fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Returns true once every sample has been handed out.
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.info.total_samples
            || self
                .stream
                .as_ref()
                .is_some_and(|s| s.at_end && s.buffered().is_empty())
    }

    /// Decode up to `max_bytes` of interleaved samples into `block`.
    ///
    /// Only whole frames are returned. Returns the number of samples written,
    /// which is 0 at end of stream or when `max_bytes` is smaller than a frame.
    pub fn read(&mut self, block: &mut SampleBlock, max_bytes: usize) -> Result<usize> {
        if self.stream.is_none() {
            return Err(Error::TrackClosed);
        }

        let channels = usize::from(self.info.channels);
        block.reset(self.info.sample_rate, self.info.channels);

        let remaining = usize::try_from(self.info.total_samples - self.cursor).unwrap_or(usize::MAX);
        let wanted = (max_bytes / SampleFormat::S16.bytes_per_sample() / channels * channels)
            .min(remaining);

        while block.samples.len() < wanted {
            let stream = self.stream.as_mut().ok_or(Error::TrackClosed)?;
            let buffered = stream.buffered();
            if buffered.is_empty() {
                if !self.load_next_packet()? {
                    break;
                }
                continue;
            }
            let take = buffered.len().min(wanted - block.samples.len());
            block.samples.extend_from_slice(&buffered[..take]);
            stream.offset += take;
        }

        self.cursor += block.samples.len() as u64;
        trace!("Decoded {} samples, cursor {}", block.samples.len(), self.cursor);
        Ok(block.samples.len())
    }

    /// Move the cursor to `target_sample`.
    ///
    /// The target is clamped to the track and aligned down to a whole frame.
    /// The demuxer lands on the packet boundary at or before the target, then
    /// decoded samples are discarded up to the target. Returns the new cursor.
    pub fn seek(&mut self, target_sample: u64) -> Result<u64> {
        let channels = u64::from(self.info.channels);
        let rate = self.info.sample_rate;
        let target = target_sample.min(self.info.total_samples) / channels * channels;
        let target_frame = target / channels;

        let stream = self.stream.as_mut().ok_or(Error::TrackClosed)?;
        stream.discard_buffered();

        if target >= self.info.total_samples {
            stream.at_end = true;
            self.cursor = self.info.total_samples;
            return Ok(self.cursor);
        }

        let seeked = stream
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame_to_ts(target_frame, rate, stream.time_base),
                    track_id: stream.track_id,
                },
            )
            .map_err(|e| Error::Seek(format!("{}: {e}", self.path.display())))?;
        stream.decoder.reset();
        stream.at_end = false;

        let landed = ts_to_frame(seeked.actual_ts, rate, stream.time_base).min(target_frame);
        self.cursor = landed * channels;

        if let Err(e) = self.skip(target - self.cursor) {
            // Frame accuracy is the contract; stay on the packet boundary.
            debug!("Seek refinement stopped at {}: {e}", self.cursor);
        }

        debug!("Seeked to sample {} (requested {})", self.cursor, target_sample);
        Ok(self.cursor)
    }

    /// Release the demuxer and codec. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }

    /// Discard `samples` decoded samples.
    fn skip(&mut self, samples: u64) -> Result<()> {
        let mut left = samples;
        while left > 0 {
            let stream = self.stream.as_mut().ok_or(Error::TrackClosed)?;
            let available = stream.buffered().len() as u64;
            if available == 0 {
                if !self.load_next_packet()? {
                    break;
                }
                continue;
            }
            let take = available.min(left);
            stream.offset += take as usize;
            left -= take;
            self.cursor += take;
        }
        Ok(())
    }

    /// Decode the next packet of our track into the reuse buffer.
    ///
    /// Returns false at end of stream. Isolated corrupt packets are skipped.
    fn load_next_packet(&mut self) -> Result<bool> {
        let info = self.info;
        let stream = self.stream.as_mut().ok_or(Error::TrackClosed)?;
        if stream.at_end {
            return Ok(false);
        }

        let mut decode_errors = 0;
        loop {
            let packet = match stream.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    stream.at_end = true;
                    return Ok(false);
                }
                Err(SymphoniaError::IoError(e)) => return Err(Error::Io(e)),
                Err(e) => {
                    return Err(Error::MalformedStream(format!(
                        "{}: failed to read packet: {e}",
                        self.path.display()
                    )));
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != stream.track_id {
                continue;
            }

            match stream.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    if spec.rate != info.sample_rate
                        || spec.channels.count() != usize::from(info.channels)
                    {
                        return Err(Error::MalformedStream(format!(
                            "{}: format changed mid-stream to {} Hz, {} channels",
                            self.path.display(),
                            spec.rate,
                            spec.channels.count()
                        )));
                    }
                    if decoded.frames() == 0 {
                        continue;
                    }

                    let needed = decoded.capacity() * spec.channels.count();
                    let mut buffer = match stream.buffer.take() {
                        Some(buffer) if buffer.capacity() >= needed => buffer,
                        _ => SampleBuffer::<i16>::new(decoded.capacity() as u64, spec),
                    };
                    buffer.copy_interleaved_ref(decoded);
                    stream.buffer = Some(buffer);
                    stream.offset = 0;
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    decode_errors += 1;
                    warn!(
                        "Decode error in {} (skipping packet): {e}",
                        self.path.display()
                    );
                    if decode_errors > MAX_DECODE_RETRIES {
                        return Err(Error::MalformedStream(format!(
                            "{}: {decode_errors} consecutive undecodable packets",
                            self.path.display()
                        )));
                    }
                }
                Err(e) => {
                    return Err(Error::MalformedStream(format!(
                        "{}: decode failed: {e}",
                        self.path.display()
                    )));
                }
            }
        }
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Codec parameters of the selected track that `open` validates.
struct StreamParams {
    sample_rate: Option<u32>,
    channels: Option<u16>,
    n_frames: Option<u64>,
}

/// Open `path`, find its first audio track and build a decoder for it.
fn open_stream(path: &Path) -> Result<(OpenStream, StreamParams)> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };

    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &MetadataOptions::default())
        .map_err(|e| match e {
            SymphoniaError::IoError(e) if e.kind() != std::io::ErrorKind::UnexpectedEof => {
                Error::Io(e)
            }
            e => Error::MalformedStream(format!("{}: {e}", path.display())),
        })?;

    let format = detected.format;

    // Find the first audio track
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::EmptyStream(format!("{}: no audio tracks", path.display())))?;

    #[allow(clippy::cast_possible_truncation)]
    let params = StreamParams {
        sample_rate: track.codec_params.sample_rate,
        channels: track.codec_params.channels.map(|c| c.count() as u16),
        n_frames: track.codec_params.n_frames,
    };
    let track_id = track.id;
    let time_base = track.codec_params.time_base;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::MalformedStream(format!("{}: {e}", path.display())))?;

    let stream = OpenStream {
        format,
        decoder,
        track_id,
        time_base,
        buffer: None,
        offset: 0,
        at_end: false,
    };
    Ok((stream, params))
}

/// Count the frames of the selected track by walking its packets.
fn count_frames(stream: &mut OpenStream) -> Result<u64> {
    let mut frames = 0u64;
    loop {
        match stream.format.next_packet() {
            Ok(packet) if packet.track_id() == stream.track_id => {
                let trimmed = u64::from(packet.trim_start) + u64::from(packet.trim_end);
                frames += packet.dur.saturating_sub(trimmed);
            }
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(frames);
            }
            Err(SymphoniaError::IoError(e)) => return Err(Error::Io(e)),
            Err(e) => return Err(Error::MalformedStream(format!("packet scan failed: {e}"))),
        }
    }
}

/// Convert a frame index into the track's timestamp units.
fn frame_to_ts(frame: u64, rate: u32, time_base: Option<TimeBase>) -> u64 {
    match time_base {
        Some(tb) if tb.numer > 0 => {
            let ts = u128::from(frame) * u128::from(tb.denom)
                / (u128::from(tb.numer) * u128::from(rate));
            u64::try_from(ts).unwrap_or(u64::MAX)
        }
        _ => frame,
    }
}

/// Convert a timestamp in the track's units into a frame index.
fn ts_to_frame(ts: u64, rate: u32, time_base: Option<TimeBase>) -> u64 {
    match time_base {
        Some(tb) if tb.denom > 0 => {
            let frame =
                u128::from(ts) * u128::from(tb.numer) * u128::from(rate) / u128::from(tb.denom);
            u64::try_from(frame).unwrap_or(u64::MAX)
        }
        _ => ts,
    }
}
