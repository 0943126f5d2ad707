//! The playback pump: moves decoded audio into the output stream.
//!
//! Every cycle tops the output queue up to the target latency. Once the
//! decoder runs dry the queued tail keeps playing, and end of track is
//! reported when the queue is empty.

use crate::config::PlayerConfig;
use crate::context::{shared_context, ActiveTrack, PlaybackState, SharedContext};
use crate::decode::SampleBlock;
use crate::output::{AudioOutput, OutputStream};
use crate::spectrum::{SharedSpectrum, SpectrumAnalyzer};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tonearm_core::{Error, Result};
use tracing::{debug, error, info, trace, warn};

/// Events emitted by the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEvent {
    /// The track finished and its queued audio has played out.
    TrackEnded { index: usize, generation: u64 },
}

/// Outcome of one pump cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Not playing, or nothing loaded.
    Idle,
    /// Enough audio is already queued.
    Saturated,
    /// A block was decoded and queued.
    Wrote { bytes: usize },
    /// The decoder is done; waiting for the queue to empty.
    Draining,
    /// The queue emptied and end of track was reported.
    TrackEnded { index: usize },
}

/// Single-cycle pump over a shared playback context.
pub struct Pump {
    context: SharedContext,
    analyzer: SpectrumAnalyzer,
    block: SampleBlock,
    events: Sender<PumpEvent>,
}

impl Pump {
    pub fn new(context: SharedContext, analyzer: SpectrumAnalyzer, events: Sender<PumpEvent>) -> Self {
        Self {
            context,
            analyzer,
            block: SampleBlock::new(),
            events,
        }
    }

    /// Run one cycle with the context locked throughout.
    pub fn cycle(&mut self) -> Cycle {
        let mut guard = self.context.lock();
        let context = &mut *guard;

        let track = match context.track.as_mut() {
            Some(track) if context.state == PlaybackState::Playing && !track.end_signaled => track,
            _ => {
                self.analyzer.decay();
                return Cycle::Idle;
            }
        };
        let stream = &mut context.stream;

        if track.drained {
            if stream.queued_bytes() > 0 {
                return Cycle::Draining;
            }
            track.end_signaled = true;
            debug!("Track {} played out", track.index);
            let event = PumpEvent::TrackEnded {
                index: track.index,
                generation: track.generation,
            };
            if self.events.send(event).is_err() {
                debug!("No listener for pump events");
            }
            return Cycle::TrackEnded { index: track.index };
        }

        let target = stream.target_bytes();
        let queued = stream.queued_bytes();
        if queued >= target || target - queued < stream.source_format().frame_bytes() {
            return Cycle::Saturated;
        }

        match track.handle.read(&mut self.block, target - queued) {
            Ok(0) => {
                debug!("Decoder exhausted for track {}", track.index);
                drain(track, stream)
            }
            Ok(samples) => {
                self.analyzer.update(&self.block);
                match stream.write(&self.block) {
                    Ok(()) => {
                        trace!("Queued {samples} samples ({queued}/{target} bytes before)");
                        Cycle::Wrote {
                            bytes: self.block.byte_len(),
                        }
                    }
                    Err(e) => {
                        error!("Dropping track {}: {e}", track.index);
                        drain(track, stream)
                    }
                }
            }
            Err(e) => {
                warn!("Decode failed in track {}: {e}", track.index);
                drain(track, stream)
            }
        }
    }

    /// Cycle every `interval` until `shutdown` fires or disconnects.
    pub fn run(mut self, shutdown: &Receiver<()>, interval: Duration) {
        info!("Audio pump started ({}ms interval)", interval.as_millis());
        loop {
            self.cycle();
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Audio pump stopped");
    }
}

/// Push out the resampler tail and stop reading from `track`.
fn drain(track: &mut ActiveTrack, stream: &mut OutputStream) -> Cycle {
    if let Err(e) = stream.flush() {
        warn!("Failed to flush output: {e}");
    }
    track.drained = true;
    Cycle::Draining
}

/// The `audio-pump` thread, which also owns the output device.
pub struct PumpThread {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PumpThread {
    /// Open the default device on a new thread and start pumping.
    ///
    /// Returns once the device is open, or with its error.
    pub fn spawn(
        config: PlayerConfig,
        spectrum: SharedSpectrum,
        events: Sender<PumpEvent>,
    ) -> Result<(Self, SharedContext)> {
        let (ready_tx, ready_rx) = bounded::<Result<SharedContext>>(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let handle = std::thread::Builder::new()
            .name("audio-pump".to_string())
            .spawn(move || {
                // cpal::Stream is not Send, so the device lives on this thread
                let (output, stream) = match AudioOutput::open(config.initial_format, &config) {
                    Ok(opened) => opened,
                    Err(e) => {
                        error!("Failed to initialize audio: {e}");
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let context = shared_context(stream);
                if ready_tx.send(Ok(context.clone())).is_err() {
                    return;
                }

                Pump::new(context, SpectrumAnalyzer::new(spectrum), events)
                    .run(&shutdown_rx, config.pump_interval());

                debug!("Releasing audio device {}", output.device_name());
                drop(output);
            })
            .map_err(|e| Error::Internal(format!("Failed to spawn pump thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(context)) => Ok((
                Self {
                    shutdown_tx,
                    handle: Some(handle),
                },
                context,
            )),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Internal("pump thread exited during startup".into()))
            }
        }
    }

    /// Stop the pump and wait for the device to be released.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown_tx.send(());
            if handle.join().is_err() {
                error!("Audio pump thread panicked");
            }
        }
    }
}

impl Drop for PumpThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
