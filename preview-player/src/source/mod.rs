//! Decode source contract
//!
//! The engine drives decoding through [`DecodeSource`]; the decoder itself is
//! a black box reachable only through these async calls. Implementations
//! use interior mutability so one source can be shared by the decode loop
//! and the seek/resize executors (the engine's mutex keeps those calls from
//! overlapping).

pub mod synthetic;

use crate::audio::AudioFrame;
use crate::error::{Error, Result};
use crate::playback::frame_pool::FramePool;
use crate::playback::types::VideoFrame;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub use synthetic::SyntheticSource;

/// Kind of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
}

/// One stream of the opened media
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub description: String,
}

/// The opened video stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoStatus {
    pub index: usize,
    pub frame_rate: f64,
    /// Coded size in pixels
    pub size: (u32, u32),
    /// Pixel width / pixel height
    pub sample_aspect_ratio: f64,
}

/// The opened audio stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioStatus {
    pub index: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Frames produced by one decode call, each list in time order
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub audio: Vec<AudioFrame>,
    pub video: Vec<VideoFrame>,
    /// No frames follow this batch
    pub end_of_stream: bool,
}

impl DecodedBatch {
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty() && self.video.is_empty()
    }
}

/// Asynchronous decoder service
#[async_trait]
pub trait DecodeSource: Send + Sync {
    /// Select the audio stream to decode
    async fn open_audio(&self, stream: usize) -> Result<AudioStatus>;

    /// Select the video stream to decode; `None` picks the default stream
    async fn open_video(&self, stream: Option<usize>, use_hwaccel: bool) -> Result<VideoStatus>;

    /// Decode for roughly `budget`, leasing video buffers from `pool`.
    ///
    /// Stops early (without error) when the pool has no free slot.
    async fn decode_automatic(&self, budget: Duration, pool: &FramePool) -> Result<DecodedBatch>;

    /// Coarse seek: position the decoder at or before `time`
    async fn seek_video(&self, time: f64) -> Result<()>;

    /// Decode forward discarding frames until `time`, returning the first
    /// audio and video frames at or after it. Either list may be empty when
    /// the stream has nothing there.
    async fn skip_until(&self, time: f64, pool: &FramePool) -> Result<DecodedBatch>;

    /// Change the size decoded video frames are scaled to
    async fn set_video_size(&self, width: u32, height: u32) -> Result<()>;

    /// Current decoded frame size
    fn output_size(&self) -> (u32, u32);

    /// Time of the last keyframe strictly before `time`
    async fn get_keyframe_before(&self, time: f64) -> Result<Option<f64>>;

    /// Media duration in seconds
    fn duration(&self) -> f64;

    fn streams(&self) -> Vec<StreamInfo>;

    fn video(&self) -> Option<VideoStatus>;

    fn audio(&self) -> Option<AudioStatus>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Open the source named by `url`.
///
/// Supported schemes: `synthetic://` (test pattern).
pub async fn open_source(url: &str) -> Result<Arc<dyn DecodeSource>> {
    if url.starts_with(synthetic::SCHEME) {
        let source = SyntheticSource::open(url)?;
        return Ok(Arc::new(source));
    }
    Err(Error::Decode(format!("unsupported media source: {}", url)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_source_dispatch() {
        let source = open_source("synthetic://?duration=2").await.unwrap();
        assert_eq!(source.duration(), 2.0);

        let err = open_source("file:///tmp/movie.mkv").await.err();
        assert!(matches!(err, Some(Error::Decode(_))));
    }
}
