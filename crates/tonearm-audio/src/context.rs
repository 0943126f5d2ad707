//! Playback state shared between the controller and the pump.

use crate::decode::TrackHandle;
use crate::output::OutputStream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Playback state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// The loaded track and its end-of-stream bookkeeping.
#[derive(Debug)]
pub struct ActiveTrack {
    /// Playlist index.
    pub index: usize,
    /// Bumped on every successful play.
    pub generation: u64,
    pub handle: TrackHandle,
    /// The decoder has nothing more to give.
    pub drained: bool,
    /// End of track has been reported.
    pub end_signaled: bool,
}

impl ActiveTrack {
    pub const fn new(index: usize, generation: u64, handle: TrackHandle) -> Self {
        Self {
            index,
            generation,
            handle,
            drained: false,
            end_signaled: false,
        }
    }

    /// Forget end-of-stream state after a seek or restart.
    pub fn rearm(&mut self) {
        self.drained = false;
        self.end_signaled = false;
    }
}

/// Everything the pump needs for one cycle, guarded by a single lock.
pub struct PlaybackContext {
    pub state: PlaybackState,
    pub track: Option<ActiveTrack>,
    pub stream: OutputStream,
}

impl PlaybackContext {
    pub const fn new(stream: OutputStream) -> Self {
        Self {
            state: PlaybackState::Stopped,
            track: None,
            stream,
        }
    }
}

/// Context shared by the controller and the pump.
pub type SharedContext = Arc<Mutex<PlaybackContext>>;

pub fn shared_context(stream: OutputStream) -> SharedContext {
    Arc::new(Mutex::new(PlaybackContext::new(stream)))
}
