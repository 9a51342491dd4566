//! # Preview Player Library (preview-player)
//!
//! Audio/video synchronised preview playback.
//!
//! **Purpose:** Pull frames from an asynchronous decode source, keep a small
//! decode-ahead buffer, and present video frames paced by the audio clock.
//! Seeks and output resizes coalesce so rapid user input never piles up
//! decoder work.
//!
//! **Architecture:** tokio tasks for the decode-ahead and presentation
//! loops; audio is rendered on a dedicated thread (headless clock or cpal)
//! that the engine reaches only through request/reply messages.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod render;
pub mod source;

pub use error::{Error, Result};
pub use playback::PlaybackEngine;
