//! Shared playback data types

use crate::playback::frame_pool::PooledBuffer;
use serde::Serialize;
use std::time::Duration;

/// A decoded video frame backed by a pool slot
///
/// Owned by exactly one holder at a time (the presentation queue or the
/// engine's last-frame slot); dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct VideoFrame {
    pub buffer: PooledBuffer,
    /// Frame index in the stream
    pub position: u64,
    /// Presentation time (seconds)
    pub time: f64,
    /// Pixel size (RGBA)
    pub size: (u32, u32),
    /// Bytes per row
    pub stride: usize,
}

impl VideoFrame {
    pub fn byte_size(&self) -> usize {
        self.buffer.len()
    }

    /// Hand the pool slot back
    pub fn release(self) {
        self.buffer.release();
    }
}

/// Target of a seek request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// Target time in seconds, already clamped to the media
    pub time: f64,
    /// Accept the first frames after the coarse seek instead of exact ones
    pub imprecise: bool,
    /// Run even if the target equals the current position
    pub force: bool,
}

impl SeekRequest {
    pub fn precise(time: f64) -> Self {
        Self {
            time,
            imprecise: false,
            force: false,
        }
    }

    pub fn forced(time: f64) -> Self {
        Self {
            time,
            imprecise: false,
            force: true,
        }
    }

    /// Two requests are redundant when target and force flag match exactly
    pub fn same_target(&self, other: &SeekRequest) -> bool {
        self.time == other.time && self.force == other.force
    }
}

/// Options for [`seek`](crate::playback::PlaybackEngine::seek)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekOptions {
    pub imprecise: bool,
}

/// Result of one presentation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStep {
    /// Nothing to do until something wakes the loop
    Stop,
    /// Check again after the delay
    After(Duration),
}

/// Serialisable engine state snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Time of the displayed frame (seconds)
    pub position: f64,
    /// Index of the displayed frame
    pub frame: u64,
    pub playing: bool,
    /// The decoder has produced its last frame
    pub preload_eof: bool,
    /// The last frame has been presented
    pub play_eof: bool,
    pub duration: f64,
    pub video_queue: usize,
    pub video_queue_bytes: usize,
    pub audio_queue: usize,
    pub audio_queue_bytes: usize,
    pub audio_head: Option<f64>,
    pub audio_tail: Option<f64>,
    pub audio_stream: Option<usize>,
    pub sample_rate: Option<u32>,
    pub volume: f32,
    pub output_size: (u32, u32),
    pub pool_capacity: usize,
    pub pool_leased: usize,
}
