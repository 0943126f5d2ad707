//! # tonearm-core
//!
//! Core types and error handling shared by the Tonearm playback engine.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
