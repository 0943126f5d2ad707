//! Playlist-level playback control.
//!
//! The controller runs on the UI thread. It owns the playlist and the pump
//! thread, mutates the shared [`PlaybackContext`](crate::context::PlaybackContext)
//! for transport commands, and turns pump events into auto-advance.

use crate::config::PlayerConfig;
use crate::context::{shared_context, ActiveTrack, PlaybackState, SharedContext};
use crate::decode::{TrackHandle, TrackInfo};
use crate::output::OutputStream;
use crate::pump::{Pump, PumpEvent, PumpThread};
use crate::spectrum::{self, shared_spectrum, SharedSpectrum, Spectrum, SpectrumAnalyzer};
use crossbeam_channel::{unbounded, Receiver};
use tonearm_core::{Candidates, Error, Playlist, Result, StreamFormat};
use tracing::{debug, error, info, warn};

/// Result of walking the playlist for the next playable track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// `index` is playing after `attempts` tries.
    Playing { index: usize, attempts: usize },
    /// Every candidate failed to open.
    NoPlayableFiles { attempts: usize },
}

/// Point-in-time view of the session for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: PlaybackState,
    /// Playlist index of the loaded track.
    pub index: Option<usize>,
    /// Fraction of the loaded track decoded so far.
    pub progress: f64,
    pub track: Option<TrackInfo>,
    /// Set when an advance found nothing playable.
    pub no_playable_files: bool,
    pub last_error: Option<String>,
}

/// Drives playback of a playlist.
pub struct PlaybackController {
    playlist: Playlist,
    context: SharedContext,
    spectrum: SharedSpectrum,
    events: Receiver<PumpEvent>,
    pump: Option<PumpThread>,
    /// Last index a play was attempted on.
    cursor: Option<usize>,
    generation: u64,
    no_playable_files: bool,
    last_error: Option<String>,
    shut_down: bool,
}

impl PlaybackController {
    /// Open the default device and start the pump thread.
    pub fn start(playlist: Playlist, config: PlayerConfig) -> Result<Self> {
        config.validate()?;

        let spectrum = shared_spectrum();
        let (events_tx, events_rx) = unbounded();
        let (pump, context) = PumpThread::spawn(config, spectrum.clone(), events_tx)?;

        info!("Playback controller started with {} tracks", playlist.len());
        Ok(Self::assemble(playlist, context, spectrum, events_rx, Some(pump)))
    }

    /// Build a controller over `stream` with the pump handed back to the
    /// caller instead of running on its own thread.
    pub fn manual(playlist: Playlist, stream: OutputStream) -> (Self, Pump) {
        let spectrum = shared_spectrum();
        let (events_tx, events_rx) = unbounded();
        let context = shared_context(stream);
        let pump = Pump::new(
            context.clone(),
            SpectrumAnalyzer::new(spectrum.clone()),
            events_tx,
        );

        (
            Self::assemble(playlist, context, spectrum, events_rx, None),
            pump,
        )
    }

    const fn assemble(
        playlist: Playlist,
        context: SharedContext,
        spectrum: SharedSpectrum,
        events: Receiver<PumpEvent>,
        pump: Option<PumpThread>,
    ) -> Self {
        Self {
            playlist,
            context,
            spectrum,
            events,
            pump,
            cursor: None,
            generation: 0,
            no_playable_files: false,
            last_error: None,
            shut_down: false,
        }
    }

    pub const fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn state(&self) -> PlaybackState {
        self.context.lock().state
    }

    /// Source format the output is currently bound to.
    pub fn bound_format(&self) -> StreamFormat {
        self.context.lock().stream.source_format()
    }

    /// Start playing playlist entry `index` from the beginning.
    ///
    /// On failure the player is left stopped with the error recorded; no
    /// other entry is tried.
    pub fn play(&mut self, index: usize) -> Result<()> {
        let Some(path) = self.playlist.get(index).map(std::path::Path::to_path_buf) else {
            return Err(Error::InvalidArgument(format!(
                "track {index} out of range (playlist has {})",
                self.playlist.len()
            )));
        };
        self.cursor = Some(index);

        let previous = {
            let mut context = self.context.lock();
            context.state = PlaybackState::Stopped;
            context.stream.pause(true);
            context.stream.clear();
            context.track.take()
        };
        if let Some(mut previous) = previous {
            previous.handle.close();
        }

        let handle = match TrackHandle::open(&path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open {}: {e}", path.display());
                self.last_error = Some(format!("{}: {e}", path.display()));
                return Err(e);
            }
        };
        let format = handle.info().format();

        {
            let mut context = self.context.lock();
            if let Err(e) = context.stream.rebind(format) {
                error!("Failed to bind output to {format}: {e}");
                self.last_error = Some(e.to_string());
                return Err(e);
            }
            self.generation += 1;
            context.track = Some(ActiveTrack::new(index, self.generation, handle));
            spectrum::reset(&self.spectrum);
            context.stream.pause(false);
            context.state = PlaybackState::Playing;
        }

        self.no_playable_files = false;
        info!("Playing track {index}: {} ({format})", path.display());
        Ok(())
    }

    /// Pause output. Only meaningful while playing.
    pub fn pause(&self) {
        let mut context = self.context.lock();
        if context.state == PlaybackState::Playing {
            context.stream.pause(true);
            context.state = PlaybackState::Paused;
            debug!("Paused");
        }
    }

    /// Resume a paused track, or restart a stopped one from the beginning.
    pub fn resume(&self) -> Result<()> {
        let mut context = self.context.lock();
        let context = &mut *context;
        match (context.state, context.track.as_mut()) {
            (PlaybackState::Paused, Some(_)) => {}
            (PlaybackState::Stopped, Some(track)) => {
                track.handle.seek(0)?;
                track.rearm();
                context.stream.clear();
            }
            _ => return Ok(()),
        }
        context.stream.pause(false);
        context.state = PlaybackState::Playing;
        debug!("Resumed");
        Ok(())
    }

    pub fn toggle_pause(&self) -> Result<()> {
        if self.state() == PlaybackState::Playing {
            self.pause();
            Ok(())
        } else {
            self.resume()
        }
    }

    /// Stop and rewind. The track stays loaded.
    pub fn stop(&self) {
        let mut context = self.context.lock();
        let context = &mut *context;
        if let Some(track) = context.track.as_mut() {
            if let Err(e) = track.handle.seek(0) {
                warn!("Failed to rewind track {}: {e}", track.index);
            }
            track.rearm();
        }
        context.stream.clear();
        context.stream.pause(true);
        context.state = PlaybackState::Stopped;
        debug!("Stopped");
    }

    /// Jump to `fraction` of the loaded track. Ignored while stopped.
    pub fn seek(&mut self, fraction: f64) -> Result<()> {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };

        let mut context = self.context.lock();
        let context = &mut *context;
        if context.state == PlaybackState::Stopped {
            debug!("Seek ignored while stopped");
            return Ok(());
        }
        let Some(track) = context.track.as_mut() else {
            return Ok(());
        };

        let target = (fraction * track.handle.info().total_samples as f64) as u64;
        if let Err(e) = track.handle.seek(target) {
            self.last_error = Some(e.to_string());
            return Err(e);
        }
        track.rearm();
        context.stream.clear();
        Ok(())
    }

    /// Advance past the track that just ended.
    pub fn on_track_ended(&mut self) -> AdvanceOutcome {
        self.advance(self.playlist.candidates_after(self.cursor))
    }

    /// Skip forward to the next playable track.
    pub fn next(&mut self) -> AdvanceOutcome {
        self.advance(self.playlist.candidates_after(self.cursor))
    }

    /// Skip back to the previous playable track.
    pub fn previous(&mut self) -> AdvanceOutcome {
        self.advance(self.playlist.candidates_before(self.cursor))
    }

    fn advance(&mut self, candidates: Candidates) -> AdvanceOutcome {
        let mut attempts = 0;
        for index in candidates {
            attempts += 1;
            match self.play(index) {
                Ok(()) => return AdvanceOutcome::Playing { index, attempts },
                Err(e) if e.is_decode_error() => debug!("Skipping track {index}: {e}"),
                Err(e) => warn!("Skipping track {index}: {e}"),
            }
        }

        let err = Error::NoPlayableFiles;
        self.context.lock().state = PlaybackState::Stopped;
        self.no_playable_files = true;
        warn!("{err} after {attempts} attempts");
        self.last_error = Some(err.to_string());
        AdvanceOutcome::NoPlayableFiles { attempts }
    }

    /// Handle pending pump events. Returns the last advance, if any.
    pub fn poll_events(&mut self) -> Option<AdvanceOutcome> {
        let mut outcome = None;
        while let Ok(event) = self.events.try_recv() {
            match event {
                PumpEvent::TrackEnded { index, generation } => {
                    let current = self.context.lock().track.as_ref().is_some_and(|track| {
                        track.generation == generation && track.end_signaled
                    });
                    if !current {
                        debug!("Ignoring stale end of track {index}");
                        continue;
                    }
                    info!("Track {index} ended");
                    outcome = Some(self.on_track_ended());
                }
            }
        }
        outcome
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let context = self.context.lock();
        let track = context.track.as_ref();
        SessionSnapshot {
            state: context.state,
            index: track.map(|t| t.index),
            progress: track.map_or(0.0, |t| t.handle.progress()),
            track: track.map(|t| t.handle.info()),
            no_playable_files: self.no_playable_files,
            last_error: self.last_error.clone(),
        }
    }

    /// Latest spectrum.
    pub fn spectrum(&self) -> Spectrum {
        *self.spectrum.read()
    }

    /// Stop the pump, release the device, then close stream and decoder.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Some(mut pump) = self.pump.take() {
            pump.shutdown();
        }

        let mut context = self.context.lock();
        context.state = PlaybackState::Stopped;
        context.stream.close();
        if let Some(mut track) = context.track.take() {
            track.handle.close();
        }
        info!("Playback controller shut down");
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::output::StreamTap;
    use crate::pump::Cycle;
    use crate::test_support::{write_garbage, write_sine_wav};
    use std::path::PathBuf;
    use tonearm_core::SampleFormat;

    const CD: StreamFormat = StreamFormat::new(44100, 2, SampleFormat::S16);
    const DEVICE: StreamFormat = StreamFormat::new(48000, 2, SampleFormat::F32);

    fn controller(paths: Vec<PathBuf>) -> (PlaybackController, Pump, StreamTap) {
        let stream = OutputStream::detached(CD, DEVICE, &PlayerConfig::default()).unwrap();
        let tap = stream.tap();
        let (controller, pump) = PlaybackController::manual(Playlist::from_paths(paths), stream);
        (controller, pump, tap)
    }

    /// Cycle the pump and consume output until the track ends.
    fn play_out(pump: &mut Pump, tap: &StreamTap) -> usize {
        let mut out = vec![0.0f32; 4096];
        for _ in 0..10_000 {
            if let Cycle::TrackEnded { index } = pump.cycle() {
                return index;
            }
            tap.fill(&mut out);
        }
        panic!("track never ended");
    }

    #[test]
    fn test_play_out_of_range() {
        let (mut controller, _pump, _tap) = controller(Vec::new());
        assert!(matches!(controller.play(0), Err(Error::InvalidArgument(_))));
        assert_eq!(controller.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_failed_play_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_garbage(dir.path(), "bad.mp3");
        let good = write_sine_wav(dir.path(), "good.wav", 44100, 2, 4410);
        let (mut controller, _pump, _tap) = controller(vec![bad, good]);

        assert!(controller.play(0).is_err());
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Stopped);
        assert_eq!(snapshot.index, None);
        assert!(snapshot.last_error.is_some());
    }

    #[test]
    fn test_corrupt_middle_track_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_sine_wav(dir.path(), "a.wav", 44100, 2, 4410),
            write_garbage(dir.path(), "b.mp3"),
            write_sine_wav(dir.path(), "c.wav", 44100, 2, 4410),
        ];
        let (mut controller, mut pump, tap) = controller(paths);

        controller.play(0).unwrap();
        assert_eq!(play_out(&mut pump, &tap), 0);
        assert_eq!(
            controller.poll_events(),
            Some(AdvanceOutcome::Playing {
                index: 2,
                attempts: 2
            })
        );
        assert_eq!(controller.snapshot().index, Some(2));
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_all_corrupt_gives_up_after_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let paths = (0..3)
            .map(|i| write_garbage(dir.path(), &format!("{i}.ogg")))
            .collect();
        let (mut controller, _pump, _tap) = controller(paths);

        assert!(controller.play(0).is_err());
        assert_eq!(
            controller.on_track_ended(),
            AdvanceOutcome::NoPlayableFiles { attempts: 3 }
        );
        let snapshot = controller.snapshot();
        assert!(snapshot.no_playable_files);
        assert_eq!(snapshot.state, PlaybackState::Stopped);
        assert_eq!(
            snapshot.last_error,
            Some(Error::NoPlayableFiles.to_string())
        );
    }

    #[test]
    fn test_play_clears_spectrum() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_sine_wav(dir.path(), "a.wav", 44100, 2, 44100),
            write_sine_wav(dir.path(), "b.wav", 44100, 2, 44100),
        ];
        let (mut controller, mut pump, _tap) = controller(paths);

        controller.play(0).unwrap();
        assert!(matches!(pump.cycle(), Cycle::Wrote { .. }));
        assert!(controller.spectrum().peak() > 0.0);

        controller.play(1).unwrap();
        assert!(controller.spectrum().is_silent());
    }

    #[test]
    fn test_empty_playlist_has_nothing_to_play() {
        let (mut controller, _pump, _tap) = controller(Vec::new());
        assert_eq!(
            controller.next(),
            AdvanceOutcome::NoPlayableFiles { attempts: 0 }
        );
    }

    #[test]
    fn test_format_change_rebinds_once_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_sine_wav(dir.path(), "cd.wav", 44100, 2, 44100),
            write_sine_wav(dir.path(), "mono.wav", 22050, 1, 22050),
        ];
        let (mut controller, mut pump, _tap) = controller(paths);

        controller.play(0).unwrap();
        assert!(matches!(pump.cycle(), Cycle::Wrote { .. }));
        let before = controller.context.lock().stream.rebind_count();

        controller.play(1).unwrap();
        assert_eq!(controller.context.lock().stream.rebind_count(), before + 1);
        assert_eq!(
            controller.bound_format(),
            StreamFormat::new(22050, 1, SampleFormat::S16)
        );
        assert_eq!(controller.context.lock().stream.queued_bytes(), 0);

        assert!(matches!(pump.cycle(), Cycle::Wrote { .. }));
        assert_eq!(controller.context.lock().stream.rebind_count(), before + 1);
        assert!(!controller.context.lock().track.as_ref().unwrap().drained);
    }

    #[test]
    fn test_stop_rewinds_and_resume_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 44100, 2, 44100);
        let (mut controller, mut pump, _tap) = controller(vec![path]);

        controller.play(0).unwrap();
        pump.cycle();
        assert!(controller.snapshot().progress > 0.0);

        controller.stop();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Stopped);
        assert!(snapshot.progress.abs() < f64::EPSILON);
        assert_eq!(pump.cycle(), Cycle::Idle);
        assert_eq!(controller.context.lock().stream.queued_bytes(), 0);
        assert!(controller.context.lock().stream.is_paused());

        controller.resume().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert!(matches!(pump.cycle(), Cycle::Wrote { .. }));
    }

    #[test]
    fn test_pause_and_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 44100, 2, 44100);
        let (mut controller, mut pump, _tap) = controller(vec![path]);

        controller.play(0).unwrap();
        controller.pause();
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(pump.cycle(), Cycle::Idle);

        controller.toggle_pause().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
        controller.toggle_pause().unwrap();
        assert_eq!(controller.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_seek_clears_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 44100, 2, 44100);
        let (mut controller, mut pump, _tap) = controller(vec![path]);

        controller.play(0).unwrap();
        pump.cycle();
        controller.seek(0.5).unwrap();

        let snapshot = controller.snapshot();
        approx::assert_abs_diff_eq!(snapshot.progress, 0.5, epsilon = 1e-3);
        assert_eq!(controller.context.lock().stream.queued_bytes(), 0);

        controller.seek(7.0).unwrap();
        approx::assert_abs_diff_eq!(controller.snapshot().progress, 1.0);
    }

    #[test]
    fn test_seek_ignored_when_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 44100, 2, 44100);
        let (mut controller, _pump, _tap) = controller(vec![path]);

        controller.play(0).unwrap();
        controller.stop();
        controller.seek(0.5).unwrap();
        assert!(controller.snapshot().progress.abs() < f64::EPSILON);
    }

    #[test]
    fn test_stale_end_event_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_sine_wav(dir.path(), "a.wav", 44100, 2, 2000),
            write_sine_wav(dir.path(), "b.wav", 44100, 2, 44100),
        ];
        let (mut controller, mut pump, tap) = controller(paths);

        controller.play(0).unwrap();
        play_out(&mut pump, &tap);
        controller.play(1).unwrap();

        assert_eq!(controller.poll_events(), None);
        assert_eq!(controller.snapshot().index, Some(1));
    }

    #[test]
    fn test_previous_walks_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_sine_wav(dir.path(), "a.wav", 44100, 2, 4410),
            write_garbage(dir.path(), "b.flac"),
            write_sine_wav(dir.path(), "c.wav", 44100, 2, 4410),
        ];
        let (mut controller, _pump, _tap) = controller(paths);

        controller.play(0).unwrap();
        assert_eq!(
            controller.previous(),
            AdvanceOutcome::Playing {
                index: 2,
                attempts: 1
            }
        );
        assert_eq!(
            controller.previous(),
            AdvanceOutcome::Playing {
                index: 0,
                attempts: 2
            }
        );
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 44100, 2, 4410);
        let (mut controller, _pump, _tap) = controller(vec![path]);

        controller.play(0).unwrap();
        controller.shutdown();
        controller.shutdown();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Stopped);
        assert_eq!(snapshot.index, None);
        assert!(controller.context.lock().stream.is_closed());
    }
}
