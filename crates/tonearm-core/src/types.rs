//! Core domain types for Tonearm.

pub mod format;
pub mod playlist;

pub use format::{SampleFormat, StreamFormat};
pub use playlist::{Candidates, Playlist};
