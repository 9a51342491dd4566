//! Playback: frame memory, timing rules and the engine

pub mod engine;
pub mod frame_pool;
pub mod layout;
pub mod presenter;
pub mod types;

pub use engine::PlaybackEngine;
pub use frame_pool::{FramePool, PoolError, PooledBuffer};
pub use layout::{fit_output_size, OutputLayout};
pub use types::{EngineStatus, SeekOptions, SeekRequest, VideoFrame};
