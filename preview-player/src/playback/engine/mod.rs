//! Playback engine
//!
//! **Module Structure:**
//! - `core.rs`: Engine state, lifecycle (open, play, stop, close), status
//! - `decode.rs`: Decode-ahead loop and frame admission
//! - `present.rs`: Presentation loop paced by the audio clock
//! - `seek.rs`: Seeking and frame stepping
//! - `streams.rs`: Audio stream switching, output size, volume
//!
//! Decoder calls, audio-buffer resets and pool reallocation all run under
//! the engine's FIFO [`Mutex`](preview_common::sync::Mutex). The small
//! `PlayerState` behind a std mutex is only ever held for synchronous
//! bookkeeping and never across an await.

mod core;
mod decode;
mod present;
mod seek;
mod streams;

pub use self::core::PlaybackEngine;
