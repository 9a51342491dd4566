//! Synthetic test-pattern decode source
//!
//! Produces a colour-ramp video stream and sine-tone audio streams without
//! touching any media file. Used by the CLI (`synthetic://` URLs), the
//! integration tests and the benches.
//!
//! URL form: `synthetic://?duration=10&fps=25&rate=48000&width=320&height=180`
//!
//! | key | default | meaning |
//! |---|---|---|
//! | `duration` | 10 | seconds |
//! | `fps` | 25 | video frame rate |
//! | `rate` | 48000 | sample rate of audio stream 1 |
//! | `width`, `height` | 320, 180 | coded video size |
//! | `sar` | 1 | sample aspect ratio |
//! | `gop` | 12 | frames between keyframes |
//! | `block` | 1024 | samples per audio frame |
//! | `latency_ms` | 0 | simulated delay per decoder call |
//!
//! Streams: 0 is video, 1 is audio at `rate`, 2 is audio at 44.1 kHz
//! (48 kHz when `rate` is itself 44.1 kHz) so a stream switch changes the
//! sample rate.

use crate::audio::AudioFrame;
use crate::error::{Error, Result};
use crate::playback::frame_pool::{FramePool, PoolError};
use crate::playback::types::VideoFrame;
use crate::source::{AudioStatus, DecodeSource, DecodedBatch, StreamInfo, StreamKind, VideoStatus};
use async_trait::async_trait;
use preview_common::time::{frame_to_time, time_to_frame_ceil, time_to_frame_floor};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// URL scheme handled by [`SyntheticSource`]
pub const SCHEME: &str = "synthetic://";

const VIDEO_STREAM: usize = 0;
const PRIMARY_AUDIO_STREAM: usize = 1;
const SECONDARY_AUDIO_STREAM: usize = 2;
const AUDIO_CHANNELS: u16 = 2;
const TONE_HZ: f64 = 440.0;

/// Frames one `decode_automatic` call may return at most
const MAX_BATCH_ITEMS: usize = 16;

/// Test-pattern parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub duration: f64,
    pub frame_rate: f64,
    pub sample_rate: u32,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: f64,
    pub gop: u64,
    pub audio_block: usize,
    pub latency: Duration,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration: 10.0,
            frame_rate: 25.0,
            sample_rate: 48_000,
            width: 320,
            height: 180,
            sample_aspect_ratio: 1.0,
            gop: 12,
            audio_block: 1024,
            latency: Duration::ZERO,
        }
    }
}

impl SyntheticConfig {
    /// Parse the query part of a `synthetic://` URL
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::Decode(format!("not a synthetic URL: {}", url)))?;
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");

        let mut config = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Decode(format!("malformed parameter: {}", pair)))?;
            match key {
                "duration" => config.duration = parse(key, value)?,
                "fps" => config.frame_rate = parse(key, value)?,
                "sar" => config.sample_aspect_ratio = parse(key, value)?,
                "rate" => config.sample_rate = parse(key, value)?,
                "width" => config.width = parse(key, value)?,
                "height" => config.height = parse(key, value)?,
                "gop" => config.gop = parse(key, value)?,
                "block" => config.audio_block = parse(key, value)?,
                "latency_ms" => config.latency = Duration::from_millis(parse(key, value)?),
                _ => return Err(Error::Decode(format!("unknown parameter: {}", key))),
            }
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.duration > 0.0) || !(self.frame_rate > 0.0) || !(self.sample_aspect_ratio > 0.0) {
            return Err(Error::Decode(
                "duration, fps and sar must be positive".to_string(),
            ));
        }
        if self.sample_rate == 0 || self.width == 0 || self.height == 0 || self.gop == 0 || self.audio_block == 0 {
            return Err(Error::Decode(
                "rate, width, height, gop and block must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn secondary_rate(&self) -> u32 {
        if self.sample_rate == 44_100 {
            48_000
        } else {
            44_100
        }
    }

    /// Frames with a presentation time before the end
    fn total_video_frames(&self) -> u64 {
        let exact = self.duration * self.frame_rate;
        let floor = time_to_frame_floor(self.duration, self.frame_rate);
        if (exact - floor as f64).abs() < 1e-6 {
            floor
        } else {
            floor + 1
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Decode(format!("invalid value for {}: {}", key, value)))
}

/// Call counters, for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub decode_calls: usize,
    pub seek_calls: usize,
    pub skip_calls: usize,
    pub resize_calls: usize,
}

#[derive(Debug)]
struct Cursor {
    audio: Option<AudioStatus>,
    video: Option<VideoStatus>,
    output_size: (u32, u32),
    next_video: u64,
    next_sample: u64,
}

/// Test-pattern implementation of [`DecodeSource`]
#[derive(Debug)]
pub struct SyntheticSource {
    config: SyntheticConfig,
    cursor: Mutex<Cursor>,
    closed: AtomicBool,
    decode_calls: AtomicUsize,
    seek_calls: AtomicUsize,
    skip_calls: AtomicUsize,
    resize_calls: AtomicUsize,
}

impl SyntheticSource {
    /// Open from a `synthetic://` URL
    pub fn open(url: &str) -> Result<Self> {
        Ok(Self::new(SyntheticConfig::from_url(url)?))
    }

    pub fn new(config: SyntheticConfig) -> Self {
        debug!("Opened synthetic source: {:?}", config);
        let output_size = (config.width, config.height);
        Self {
            config,
            cursor: Mutex::new(Cursor {
                audio: None,
                video: None,
                output_size,
                next_video: 0,
                next_sample: 0,
            }),
            closed: AtomicBool::new(false),
            decode_calls: AtomicUsize::new(0),
            seek_calls: AtomicUsize::new(0),
            skip_calls: AtomicUsize::new(0),
            resize_calls: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    pub fn stats(&self) -> SyntheticStats {
        SyntheticStats {
            decode_calls: self.decode_calls.load(Ordering::Relaxed),
            seek_calls: self.seek_calls.load(Ordering::Relaxed),
            skip_calls: self.skip_calls.load(Ordering::Relaxed),
            resize_calls: self.resize_calls.load(Ordering::Relaxed),
        }
    }

    async fn enter(&self) -> Result<()> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SourceClosed);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn total_samples(&self, sample_rate: u32) -> u64 {
        (self.config.duration * f64::from(sample_rate)).floor() as u64
    }

    fn keyframe_at_or_before(&self, index: u64) -> u64 {
        index - index % self.config.gop
    }

    /// Render video frame `index`, or `None` when the pool is full
    fn make_video(&self, cursor: &Cursor, index: u64, pool: &FramePool) -> Result<Option<VideoFrame>> {
        let (w, h) = cursor.output_size;
        let stride = w as usize * 4;
        let mut buffer = match pool.allocate(stride * h as usize) {
            Ok(buffer) => buffer,
            Err(PoolError::Exhausted { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let shade = (index % 256) as u8;
        for (i, px) in buffer.chunks_exact_mut(4).enumerate() {
            let x = (i % w as usize) as u32;
            px[0] = shade;
            px[1] = ((x * 255) / w.max(1)) as u8;
            px[2] = 255 - shade;
            px[3] = 255;
        }

        Ok(Some(VideoFrame {
            buffer,
            position: index,
            time: frame_to_time(index, self.config.frame_rate),
            size: (w, h),
            stride,
        }))
    }

    /// Render the audio block starting at sample `start`
    fn make_audio(&self, status: &AudioStatus, start: u64) -> AudioFrame {
        let total = self.total_samples(status.sample_rate);
        let count = (self.config.audio_block as u64).min(total.saturating_sub(start)) as usize;
        let rate = f64::from(status.sample_rate);
        let channels = usize::from(status.channels);

        let mut samples = Vec::with_capacity(count * channels);
        for n in 0..count {
            let t = (start + n as u64) as f64 / rate;
            let value = (0.25 * (2.0 * std::f64::consts::PI * TONE_HZ * t).sin()) as f32;
            samples.extend(std::iter::repeat(value).take(channels));
        }
        AudioFrame {
            samples,
            channels: status.channels,
            time: start as f64 / rate,
        }
    }

    fn next_audio_time(&self, cursor: &Cursor) -> Option<f64> {
        let status = cursor.audio.as_ref()?;
        if cursor.next_sample >= self.total_samples(status.sample_rate) {
            return None;
        }
        Some(cursor.next_sample as f64 / f64::from(status.sample_rate))
    }

    fn next_video_time(&self, cursor: &Cursor) -> Option<f64> {
        cursor.video.as_ref()?;
        if cursor.next_video >= self.config.total_video_frames() {
            return None;
        }
        Some(frame_to_time(cursor.next_video, self.config.frame_rate))
    }

    fn position_at(&self, cursor: &mut Cursor, video_index: u64) {
        cursor.next_video = video_index;
        let time = frame_to_time(video_index, self.config.frame_rate);
        if let Some(status) = &cursor.audio {
            cursor.next_sample = time_to_frame_floor(time, f64::from(status.sample_rate));
        }
    }
}

#[async_trait]
impl DecodeSource for SyntheticSource {
    async fn open_audio(&self, stream: usize) -> Result<AudioStatus> {
        self.enter().await?;
        let sample_rate = match stream {
            PRIMARY_AUDIO_STREAM => self.config.sample_rate,
            SECONDARY_AUDIO_STREAM => self.config.secondary_rate(),
            _ => return Err(Error::Decode(format!("no audio stream {}", stream))),
        };
        let status = AudioStatus {
            index: stream,
            sample_rate,
            channels: AUDIO_CHANNELS,
        };

        let mut cursor = self.lock();
        let now = frame_to_time(cursor.next_video, self.config.frame_rate);
        cursor.next_sample = time_to_frame_floor(now, f64::from(sample_rate));
        cursor.audio = Some(status);
        debug!("Synthetic source: audio stream {} at {} Hz", stream, sample_rate);
        Ok(status)
    }

    async fn open_video(&self, stream: Option<usize>, _use_hwaccel: bool) -> Result<VideoStatus> {
        self.enter().await?;
        let index = stream.unwrap_or(VIDEO_STREAM);
        if index != VIDEO_STREAM {
            return Err(Error::Decode(format!("no video stream {}", index)));
        }
        let status = VideoStatus {
            index,
            frame_rate: self.config.frame_rate,
            size: (self.config.width, self.config.height),
            sample_aspect_ratio: self.config.sample_aspect_ratio,
        };
        self.lock().video = Some(status);
        Ok(status)
    }

    async fn decode_automatic(&self, budget: Duration, pool: &FramePool) -> Result<DecodedBatch> {
        self.enter().await?;
        self.decode_calls.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let mut cursor = self.lock();
        let mut batch = DecodedBatch::default();

        while batch.audio.len() + batch.video.len() < MAX_BATCH_ITEMS && started.elapsed() < budget {
            let audio_time = self.next_audio_time(&cursor);
            let video_time = self.next_video_time(&cursor);
            let take_video = match (video_time, audio_time) {
                (None, None) => {
                    batch.end_of_stream = true;
                    break;
                }
                (Some(v), Some(a)) => v <= a,
                (Some(_), None) => true,
                (None, Some(_)) => false,
            };

            if take_video {
                let index = cursor.next_video;
                match self.make_video(&cursor, index, pool)? {
                    Some(frame) => {
                        batch.video.push(frame);
                        cursor.next_video += 1;
                    }
                    None => {
                        trace!("Synthetic source: pool full, ending batch");
                        break;
                    }
                }
            } else if let Some(status) = cursor.audio {
                let frame = self.make_audio(&status, cursor.next_sample);
                cursor.next_sample += frame.frame_count() as u64;
                batch.audio.push(frame);
            }
        }
        Ok(batch)
    }

    async fn seek_video(&self, time: f64) -> Result<()> {
        self.enter().await?;
        self.seek_calls.fetch_add(1, Ordering::Relaxed);

        let mut cursor = self.lock();
        let index = time_to_frame_floor(time.max(0.0), self.config.frame_rate);
        let key = self.keyframe_at_or_before(index);
        self.position_at(&mut cursor, key);
        trace!("Synthetic source: seek to {} lands on keyframe {}", time, key);
        Ok(())
    }

    async fn skip_until(&self, time: f64, pool: &FramePool) -> Result<DecodedBatch> {
        self.enter().await?;
        self.skip_calls.fetch_add(1, Ordering::Relaxed);

        let mut cursor = self.lock();
        let mut batch = DecodedBatch::default();

        let target_video = time_to_frame_ceil(time, self.config.frame_rate);
        if cursor.video.is_some() && target_video < self.config.total_video_frames() {
            let index = target_video.max(cursor.next_video);
            if let Some(frame) = self.make_video(&cursor, index, pool)? {
                batch.video.push(frame);
                cursor.next_video = index + 1;
            }
        }

        if let Some(status) = cursor.audio {
            let target_sample = time_to_frame_ceil(time, f64::from(status.sample_rate));
            let start = target_sample.max(cursor.next_sample);
            if start < self.total_samples(status.sample_rate) {
                let frame = self.make_audio(&status, start);
                cursor.next_sample = start + frame.frame_count() as u64;
                batch.audio.push(frame);
            }
        }
        Ok(batch)
    }

    async fn set_video_size(&self, width: u32, height: u32) -> Result<()> {
        self.enter().await?;
        if width == 0 || height == 0 {
            return Err(Error::Decode(format!("invalid output size {}x{}", width, height)));
        }
        self.resize_calls.fetch_add(1, Ordering::Relaxed);
        self.lock().output_size = (width, height);
        Ok(())
    }

    fn output_size(&self) -> (u32, u32) {
        self.lock().output_size
    }

    async fn get_keyframe_before(&self, time: f64) -> Result<Option<f64>> {
        self.enter().await?;
        let index = time_to_frame_ceil(time, self.config.frame_rate);
        if index == 0 {
            return Ok(None);
        }
        let key = self.keyframe_at_or_before(index - 1);
        Ok(Some(frame_to_time(key, self.config.frame_rate)))
    }

    fn duration(&self) -> f64 {
        self.config.duration
    }

    fn streams(&self) -> Vec<StreamInfo> {
        vec![
            StreamInfo {
                index: VIDEO_STREAM,
                kind: StreamKind::Video,
                description: format!(
                    "test pattern {}x{} @ {} fps",
                    self.config.width, self.config.height, self.config.frame_rate
                ),
            },
            StreamInfo {
                index: PRIMARY_AUDIO_STREAM,
                kind: StreamKind::Audio,
                description: format!("sine {} Hz", self.config.sample_rate),
            },
            StreamInfo {
                index: SECONDARY_AUDIO_STREAM,
                kind: StreamKind::Audio,
                description: format!("sine {} Hz", self.config.secondary_rate()),
            },
        ]
    }

    fn video(&self) -> Option<VideoStatus> {
        self.lock().video
    }

    fn audio(&self) -> Option<AudioStatus> {
        self.lock().audio
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::SourceClosed);
        }
        debug!("Synthetic source closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
