//! Core playback engine - state and lifecycle

use crate::audio::AudioSink;
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::playback::frame_pool::FramePool;
use crate::playback::layout::{frame_bytes, OutputLayout};
use crate::playback::types::{EngineStatus, SeekRequest, VideoFrame};
use crate::render::RenderSink;
use crate::source::{open_source, DecodeSource, StreamInfo, StreamKind, VideoStatus};
use preview_common::events::{EventBus, EventSubscription, PlayerEvent};
use preview_common::sync::{Mutex, RestartableTask};
use preview_common::time::format_timestamp;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, RwLock, Weak};
use tracing::{debug, info, warn};

/// Progress of a precise seek whose frames are still arriving
#[derive(Debug, Clone, Copy)]
pub(super) struct SeekProgress {
    pub(super) target: f64,
    pub(super) skipped_audio: usize,
    pub(super) skipped_video: usize,
    /// A video frame at the target has been queued
    pub(super) video_seen: bool,
}

impl SeekProgress {
    pub(super) fn new(target: f64) -> Self {
        Self {
            target,
            skipped_audio: 0,
            skipped_video: 0,
            video_seen: false,
        }
    }
}

/// Bookkeeping shared by the loops and the public API
pub(super) struct PlayerState {
    /// Decoded frames waiting to be presented, in time order
    pub(super) video: VecDeque<VideoFrame>,
    /// Most recently presented frame, redrawn at end of stream
    pub(super) last_frame: Option<VideoFrame>,
    /// Time of the displayed frame; survives cache clears
    pub(super) position: f64,
    pub(super) frame: u64,
    pub(super) playing: bool,
    pub(super) preload_eof: bool,
    pub(super) play_eof: bool,
    pub(super) closed: bool,
    pub(super) seek: Option<SeekProgress>,
    pub(super) layout: OutputLayout,
    /// Damped duration of decode calls that produced video / audio (ms)
    pub(super) fetch_video_ms: f64,
    pub(super) fetch_audio_ms: f64,
}

impl PlayerState {
    fn new(output_size: (u32, u32)) -> Self {
        Self {
            video: VecDeque::new(),
            last_frame: None,
            position: 0.0,
            frame: 0,
            playing: false,
            preload_eof: false,
            play_eof: false,
            closed: false,
            seek: None,
            layout: OutputLayout::identity(output_size),
            fetch_video_ms: 0.0,
            fetch_audio_ms: 0.0,
        }
    }

    pub(super) fn video_queue_bytes(&self) -> usize {
        self.video.iter().map(VideoFrame::byte_size).sum()
    }
}

pub(super) struct EngineInner {
    pub(super) config: PlayerConfig,
    pub(super) source: Arc<dyn DecodeSource>,
    pub(super) video: VideoStatus,
    pub(super) pool: FramePool,
    /// Serialises decoder calls and audio-buffer resets
    pub(super) mutex: Mutex,
    /// Replaced when an audio stream with another sample rate is selected
    pub(super) audio: RwLock<Arc<AudioSink>>,
    pub(super) state: StdMutex<PlayerState>,
    pub(super) events: EventBus,
    pub(super) render: Arc<dyn RenderSink>,
    pub(super) decoding: AtomicBool,
    pub(super) decode_requested: AtomicBool,
    pub(super) presenting: AtomicBool,
    pub(super) present_requested: AtomicBool,
    pub(super) seek_task: RestartableTask<SeekRequest, Error>,
    pub(super) resize_task: RestartableTask<(u32, u32), Error>,
}

/// Playback engine - keeps audio and video of one media source in sync
///
/// Cheap to clone; clones drive the same engine. Background loops hold
/// clones, so call [`close`](Self::close) to stop them.
#[derive(Clone)]
pub struct PlaybackEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("status", &self.status())
            .finish()
    }
}

impl PlaybackEngine {
    /// Open `url` and start decoding ahead.
    ///
    /// `audio_stream` selects the audio stream; `None` takes the first one.
    /// Must be called inside a tokio runtime.
    pub async fn open(
        url: &str,
        config: PlayerConfig,
        render: Arc<dyn RenderSink>,
        audio_stream: Option<usize>,
    ) -> Result<Self> {
        config.validate()?;
        let source = open_source(url).await?;
        match Self::with_source(Arc::clone(&source), config, render, audio_stream).await {
            Ok(engine) => Ok(engine),
            Err(e) => {
                if let Err(close_err) = source.close().await {
                    warn!("Failed to close source after open error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Build an engine around an already opened source
    pub async fn with_source(
        source: Arc<dyn DecodeSource>,
        config: PlayerConfig,
        render: Arc<dyn RenderSink>,
        audio_stream: Option<usize>,
    ) -> Result<Self> {
        config.validate()?;
        let video = source.open_video(None, config.video.use_hwaccel).await?;

        let audio_index = audio_stream
            .or_else(|| {
                source
                    .streams()
                    .iter()
                    .find(|s| s.kind == StreamKind::Audio)
                    .map(|s| s.index)
            })
            .ok_or_else(|| Error::Decode("media has no audio stream".to_string()))?;
        let audio_status = source.open_audio(audio_index).await?;

        let output_size = source.output_size();
        let pool = FramePool::new(config.pool_capacity(), frame_bytes(output_size));
        let events = EventBus::default();
        let sink = AudioSink::open(audio_status.sample_rate, &config, events.clone())?;

        info!(
            "Opened media: {:.3}s, video {}x{} @ {:.3} fps, audio stream {} @ {} Hz",
            source.duration(),
            video.size.0,
            video.size.1,
            video.frame_rate,
            audio_status.index,
            audio_status.sample_rate
        );

        let stall = config.mutex_stall_warning();
        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let seek_weak = weak.clone();
            let seek_task = RestartableTask::new("seek", move |request: SeekRequest, token| {
                let weak = seek_weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            let engine = PlaybackEngine { inner };
                            engine.run_seek(request, token).await
                        }
                        None => Ok(()),
                    }
                }
            })
            .with_dedup(|a: &SeekRequest, b: &SeekRequest| a.same_target(b));

            let resize_weak = weak.clone();
            let resize_task = RestartableTask::new("resize", move |size: (u32, u32), token| {
                let weak = resize_weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => {
                            let engine = PlaybackEngine { inner };
                            engine.run_resize(size, token).await
                        }
                        None => Ok(()),
                    }
                }
            })
            .with_dedup(|a: &(u32, u32), b: &(u32, u32)| a == b);

            EngineInner {
                config,
                source,
                video,
                pool,
                mutex: Mutex::with_stall_warning("engine", stall),
                audio: RwLock::new(Arc::new(sink)),
                state: StdMutex::new(PlayerState::new(output_size)),
                events,
                render,
                decoding: AtomicBool::new(false),
                decode_requested: AtomicBool::new(false),
                presenting: AtomicBool::new(false),
                present_requested: AtomicBool::new(false),
                seek_task,
                resize_task,
            }
        });

        let engine = Self { inner };
        engine.ensure_decoding();
        Ok(engine)
    }

    /// Start playback from the current position
    pub async fn play(&self) -> Result<()> {
        let _guard = self.inner.mutex.acquire().await;
        {
            let state = self.lock_state();
            if state.closed {
                return Err(Error::Closed);
            }
            if state.playing {
                debug!("Already playing");
                return Ok(());
            }
        }
        self.audio().play().await?;
        let position = {
            let mut state = self.lock_state();
            state.playing = true;
            state.position
        };

        info!("Playback started at {}", format_timestamp(position));
        self.inner.events.emit(PlayerEvent::PlayStateChanged { playing: true });
        self.ensure_decoding();
        self.request_present();
        Ok(())
    }

    /// Pause playback, keeping buffered frames
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.inner.mutex.acquire().await;
        let position = {
            let mut state = self.lock_state();
            if !state.playing {
                debug!("Already stopped");
                return Ok(());
            }
            state.playing = false;
            state.position
        };
        let result = self.audio().stop().await;

        info!("Playback stopped at {}", format_timestamp(position));
        self.inner.events.emit(PlayerEvent::PlayStateChanged { playing: false });
        self.request_present();
        result
    }

    /// Stop every loop, release all frames and close the source and sink
    pub async fn close(&self) -> Result<()> {
        self.inner.seek_task.cancel();
        self.inner.resize_task.cancel();

        {
            let _guard = self.inner.mutex.acquire().await;
            let mut state = self.lock_state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.playing = false;
            state.seek = None;
            state.video.clear();
            state.last_frame = None;
        }

        self.audio().close().await;
        self.inner.source.close().await?;
        info!("Playback engine closed");
        Ok(())
    }

    /// Register an event listener
    pub fn subscribe(&self) -> EventSubscription {
        self.inner.events.subscribe()
    }

    /// Snapshot of the engine state
    pub fn status(&self) -> EngineStatus {
        let audio = self.audio();
        let feedback = audio.feedback();
        let state = self.lock_state();
        EngineStatus {
            position: state.position,
            frame: state.frame,
            playing: state.playing,
            preload_eof: state.preload_eof,
            play_eof: state.play_eof,
            duration: self.inner.source.duration(),
            video_queue: state.video.len(),
            video_queue_bytes: state.video_queue_bytes(),
            audio_queue: feedback.buffer_length,
            audio_queue_bytes: feedback.buffer_size,
            audio_head: feedback.head_time,
            audio_tail: feedback.tail_time,
            audio_stream: self.inner.source.audio().map(|a| a.index),
            sample_rate: Some(audio.sample_rate()),
            volume: feedback.volume,
            output_size: self.inner.source.output_size(),
            pool_capacity: self.inner.pool.capacity(),
            pool_leased: self.inner.pool.leased(),
        }
    }

    /// Time of the displayed frame (seconds)
    pub fn position(&self) -> f64 {
        self.lock_state().position
    }

    pub fn is_playing(&self) -> bool {
        self.lock_state().playing
    }

    pub fn duration(&self) -> f64 {
        self.inner.source.duration()
    }

    pub fn frame_rate(&self) -> f64 {
        self.inner.video.frame_rate
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.inner.source.streams()
    }

    /// Current placement of the picture in the display area
    pub fn layout(&self) -> OutputLayout {
        self.lock_state().layout
    }

    pub(super) fn audio(&self) -> Arc<AudioSink> {
        let audio = self
            .inner
            .audio
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&audio)
    }

    pub(super) fn lock_state(&self) -> StdMutexGuard<'_, PlayerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Drop every queued frame and buffered sample.
    ///
    /// The caller must hold the engine mutex.
    pub(super) async fn clear_cache(&self) -> Result<()> {
        let released = {
            let mut state = self.lock_state();
            state.preload_eof = false;
            state.play_eof = false;
            let released = state.video.len() + usize::from(state.last_frame.is_some());
            state.video.clear();
            state.last_frame = None;
            released
        };
        debug!("Cleared cache ({} video frames released)", released);
        self.audio().clear_buffer().await
    }
}
