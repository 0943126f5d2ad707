//! Audio output using cpal.
//!
//! [`OutputStream`] is the pump-facing half: it converts decoded blocks to
//! the device layout and queues them in a ring buffer. [`AudioOutput`] owns
//! the cpal stream whose callback drains that ring through a [`StreamTap`].

use crate::buffer::{shared_ring_buffer, SharedRingBuffer};
use crate::config::PlayerConfig;
use crate::decode::SampleBlock;
use crate::resample::Resampler;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, Stream, StreamConfig,
};
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tonearm_core::{Error, Result, SampleFormat, StreamFormat};
use tracing::{debug, error, info, warn};

/// Device-side view of an [`OutputStream`].
///
/// Reads the current ring without touching the playback context, so the
/// audio callback never waits on the pump.
#[derive(Clone)]
pub struct StreamTap {
    ring: Arc<RwLock<SharedRingBuffer>>,
    paused: Arc<AtomicBool>,
}

impl StreamTap {
    /// Fill `out` with queued device samples, padding with silence.
    ///
    /// Returns the number of queued samples consumed. Nothing is consumed
    /// while paused.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        if self.paused.load(Ordering::Acquire) {
            out.fill(0.0);
            return 0;
        }

        let read = self.ring.read().pop_into(out);
        out[read..].fill(0.0);
        read
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

/// Per-binding conversion state.
struct Conversion {
    resampler: Resampler,
    ring: SharedRingBuffer,
    /// Source-layout f32 samples.
    converted: Vec<f32>,
    /// Source-layout samples at the device rate.
    resampled: Vec<f32>,
    /// Device-layout samples.
    mapped: Vec<f32>,
}

/// Pump-facing output stream bound to one source format at a time.
pub struct OutputStream {
    source: StreamFormat,
    device: StreamFormat,
    target_latency: Duration,
    ring_capacity: Duration,
    /// `None` once closed.
    conversion: Option<Conversion>,
    ring_slot: Arc<RwLock<SharedRingBuffer>>,
    paused: Arc<AtomicBool>,
    rebinds: u64,
}

impl OutputStream {
    /// Create a stream for a device of format `device` with no hardware
    /// attached. Consumption happens through [`OutputStream::tap`].
    pub fn detached(source: StreamFormat, device: StreamFormat, config: &PlayerConfig) -> Result<Self> {
        if !device.is_valid() {
            return Err(Error::DeviceUnavailable(format!(
                "unusable device format {device}"
            )));
        }
        let conversion = Self::conversion_for(source, device, config.ring_capacity())?;
        let ring_slot = Arc::new(RwLock::new(conversion.ring.clone()));

        Ok(Self {
            source,
            device,
            target_latency: config.target_latency(),
            ring_capacity: config.ring_capacity(),
            conversion: Some(conversion),
            ring_slot,
            paused: Arc::new(AtomicBool::new(false)),
            rebinds: 0,
        })
    }

    fn conversion_for(
        source: StreamFormat,
        device: StreamFormat,
        ring_capacity: Duration,
    ) -> Result<Conversion> {
        if !source.is_valid() {
            return Err(Error::InvalidArgument(format!(
                "cannot bind output to {source}"
            )));
        }
        let resampler = Resampler::new(
            source.sample_rate,
            device.sample_rate,
            usize::from(source.channels),
        )?;
        let capacity = device.bytes_for(ring_capacity) / SampleFormat::F32.bytes_per_sample();

        Ok(Conversion {
            resampler,
            ring: shared_ring_buffer(capacity),
            converted: Vec::new(),
            resampled: Vec::new(),
            mapped: Vec::new(),
        })
    }

    /// Handle for the consuming side.
    pub fn tap(&self) -> StreamTap {
        StreamTap {
            ring: self.ring_slot.clone(),
            paused: self.paused.clone(),
        }
    }

    /// Format blocks must match to be written.
    pub const fn source_format(&self) -> StreamFormat {
        self.source
    }

    pub const fn device_format(&self) -> StreamFormat {
        self.device
    }

    /// Number of rebinds since creation.
    pub const fn rebind_count(&self) -> u64 {
        self.rebinds
    }

    pub const fn is_closed(&self) -> bool {
        self.conversion.is_none()
    }

    /// Bind to a new source format, dropping anything still queued.
    pub fn rebind(&mut self, source: StreamFormat) -> Result<()> {
        if self.conversion.is_none() {
            return Err(Error::Internal("output stream is closed".into()));
        }
        let conversion = Self::conversion_for(source, self.device, self.ring_capacity)?;
        *self.ring_slot.write() = conversion.ring.clone();
        self.conversion = Some(conversion);
        self.rebinds += 1;

        debug!(
            "Output rebound: {} -> {} (device {})",
            self.source, source, self.device
        );
        self.source = source;
        Ok(())
    }

    /// Audio accepted but not yet consumed, in source-format bytes.
    pub fn queued_bytes(&self) -> usize {
        let Some(conversion) = self.conversion.as_ref() else {
            return 0;
        };

        let device_frames = (conversion.ring.len() / usize::from(self.device.channels)) as u64;
        let ring_frames = (device_frames * u64::from(self.source.sample_rate))
            .div_ceil(u64::from(self.device.sample_rate));
        let frames = ring_frames as usize + conversion.resampler.pending_frames();
        frames * self.source.frame_bytes()
    }

    /// Queue depth the pump aims for, in source-format bytes.
    pub fn target_bytes(&self) -> usize {
        self.source.bytes_for(self.target_latency)
    }

    /// Convert `block` to the device layout and queue it.
    ///
    /// Never blocks. Writes after [`OutputStream::close`] are ignored.
    pub fn write(&mut self, block: &SampleBlock) -> Result<()> {
        let device_channels = usize::from(self.device.channels);
        let Some(conversion) = self.conversion.as_mut() else {
            return Ok(());
        };
        if block.is_empty() {
            return Ok(());
        }
        if !block.format().same_layout(&self.source) {
            return Err(Error::FormatMismatch {
                expected: self.source,
                actual: block.format(),
            });
        }

        conversion.converted.clear();
        conversion
            .converted
            .extend(block.samples().iter().map(|&s| f32::from(s) / 32768.0));

        conversion.resampled.clear();
        conversion
            .resampler
            .process(&conversion.converted, &mut conversion.resampled)?;

        conversion.enqueue(usize::from(self.source.channels), device_channels);
        Ok(())
    }

    /// Push input held back by the resampler. Called at end of stream.
    pub fn flush(&mut self) -> Result<()> {
        let device_channels = usize::from(self.device.channels);
        let Some(conversion) = self.conversion.as_mut() else {
            return Ok(());
        };

        conversion.resampled.clear();
        conversion.resampler.flush(&mut conversion.resampled)?;
        conversion.enqueue(usize::from(self.source.channels), device_channels);
        Ok(())
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        let Some(conversion) = self.conversion.as_mut() else {
            return;
        };

        let ring = shared_ring_buffer(conversion.ring.capacity());
        *self.ring_slot.write() = ring.clone();
        conversion.ring = ring;
        conversion.resampler.reset();
        debug!("Output queue cleared");
    }

    /// Suspend or resume consumption. Queued audio is kept.
    pub fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Release the ring and converter. Safe to call more than once.
    pub fn close(&mut self) {
        if self.conversion.take().is_some() {
            *self.ring_slot.write() = shared_ring_buffer(2);
            debug!("Output stream closed");
        }
    }
}

impl Conversion {
    /// Map `resampled` onto the device channels and push it to the ring.
    fn enqueue(&mut self, source_channels: usize, device_channels: usize) {
        if self.resampled.is_empty() {
            return;
        }

        let samples: &[f32] = if source_channels == device_channels {
            &self.resampled
        } else {
            self.mapped.clear();
            for frame in self.resampled.chunks_exact(source_channels) {
                for ch in 0..device_channels {
                    self.mapped.push(frame[ch.min(source_channels - 1)]);
                }
            }
            &self.mapped
        };

        let pushed = self.ring.push(samples);
        if pushed < samples.len() {
            warn!(
                "Output ring full: dropped {} of {} samples",
                samples.len() - pushed,
                samples.len()
            );
        }
    }
}

/// Owner of the cpal stream feeding the default device.
///
/// `cpal::Stream` is not `Send`; keep this on the thread that opened it.
pub struct AudioOutput {
    _stream: Stream,
    device_name: String,
    format: StreamFormat,
}

impl AudioOutput {
    /// Open the default device in its native configuration.
    pub fn open(source: StreamFormat, config: &PlayerConfig) -> Result<(Self, OutputStream)> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("No output device found".to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let supported_config = device.default_output_config().map_err(|e| {
            Error::DeviceUnavailable(format!("Failed to get output config: {e}"))
        })?;
        debug!("Supported output config: {:?}", supported_config);

        let sample_format = supported_config.sample_format();
        let stream_config: StreamConfig = supported_config.into();
        let format = StreamFormat::new(
            stream_config.sample_rate.0,
            stream_config.channels,
            SampleFormat::F32,
        );

        let output_stream = OutputStream::detached(source, format, config)?;
        let tap = output_stream.tap();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, tap)?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, tap)?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, tap)?,
            _ => {
                return Err(Error::DeviceUnavailable(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to start stream: {e}")))?;

        info!("Audio output initialized: {format}, device: {device_name}");

        Ok((
            Self {
                _stream: stream,
                device_name,
                format,
            },
            output_stream,
        ))
    }

    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &Device,
        config: &StreamConfig,
        tap: StreamTap,
    ) -> Result<Stream> {
        let err_fn = |err| {
            error!("Audio stream error: {err}");
        };

        // Grows to the callback size once, then reused
        let mut scratch: Vec<f32> = Vec::new();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let buffer = &mut scratch[..data.len()];
                    tap.fill(buffer);
                    for (sample, value) in data.iter_mut().zip(buffer.iter()) {
                        *sample = T::from_sample(*value);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to build stream: {e}")))?;

        Ok(stream)
    }

    /// Get the device name.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Native device format.
    pub const fn format(&self) -> StreamFormat {
        self.format
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}
