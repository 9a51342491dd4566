//! End-to-end engine scenarios on the synthetic source and the headless
//! audio driver

use async_trait::async_trait;
use preview_common::events::{EventSubscription, PlayerEvent};
use preview_common::sync::TaskOutcome;
use preview_player::config::PlayerConfig;
use preview_player::playback::{EngineStatus, FramePool, OutputLayout, SeekOptions, VideoFrame};
use preview_player::render::{DebugOverlay, RenderSink};
use preview_player::source::{
    AudioStatus, DecodeSource, DecodedBatch, StreamInfo, SyntheticSource, VideoStatus,
};
use preview_player::{Error, PlaybackEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Records (frame index, time, size) of every presented frame
#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<(u64, f64, (u32, u32))>>,
}

impl RecordingSink {
    fn frames(&self) -> Vec<(u64, f64, (u32, u32))> {
        self.frames.lock().unwrap().clone()
    }

    fn last(&self) -> Option<(u64, f64, (u32, u32))> {
        self.frames.lock().unwrap().last().copied()
    }
}

impl RenderSink for RecordingSink {
    fn present(&self, frame: &VideoFrame, _layout: &OutputLayout, _overlay: Option<&DebugOverlay>) {
        self.frames
            .lock()
            .unwrap()
            .push((frame.position, frame.time, frame.size));
    }
}

fn test_config() -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.audio.quantum_frames = 256;
    config
}

async fn open(
    url: &str,
    config: PlayerConfig,
) -> (PlaybackEngine, Arc<SyntheticSource>, Arc<RecordingSink>) {
    let source = Arc::new(SyntheticSource::open(url).unwrap());
    let sink = Arc::new(RecordingSink::default());
    let engine = PlaybackEngine::with_source(source.clone(), config, sink.clone(), None)
        .await
        .unwrap();
    (engine, source, sink)
}

async fn wait_for(
    engine: &PlaybackEngine,
    what: &str,
    condition: impl Fn(&EngineStatus) -> bool,
) -> EngineStatus {
    let deadline = Instant::now() + WAIT;
    loop {
        let status = engine.status();
        if condition(&status) {
            return status;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {}: {:?}",
            what,
            status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn next_event(
    events: &mut EventSubscription,
    matches: impl Fn(&PlayerEvent) -> bool,
) -> PlayerEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_open_fills_decode_ahead_buffers() {
    let (engine, source, sink) = open("synthetic://?duration=10", test_config()).await;

    let status = wait_for(&engine, "decode-ahead targets", |s| {
        let audio = match (s.audio_head, s.audio_tail) {
            (Some(head), Some(tail)) => tail - head,
            _ => 0.0,
        };
        s.video_queue >= 8 && audio >= 0.2
    })
    .await;
    assert_eq!(status.position, 0.0);
    assert!(!status.playing);

    // Paused engine shows the first frame
    wait_until("first frame presented", || {
        sink.last().map(|f| f.0) == Some(0)
    })
    .await;

    // Targets met: the loop goes idle
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = source.stats().decode_calls;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.stats().decode_calls, calls);

    // Every leased slot is a queued frame
    let status = engine.status();
    assert_eq!(status.pool_leased, status.video_queue);
    assert!(status.video_queue <= status.pool_capacity);

    engine.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_play_follows_audio_clock() {
    let (engine, _source, sink) = open("synthetic://?duration=10", test_config()).await;
    wait_for(&engine, "first frame", |s| s.video_queue > 0).await;

    engine.play().await.unwrap();
    assert!(engine.is_playing());
    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = engine.status();
    assert!(status.playing);
    assert!(
        status.position > 0.1 && status.position < 1.0,
        "position {}",
        status.position
    );
    let frames = sink.frames();
    assert!(frames.windows(2).all(|w| w[0].1 <= w[1].1));

    engine.stop().await.unwrap();
    assert!(!engine.is_playing());
    engine.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_playback_reaches_end_of_stream() {
    let (engine, _source, sink) = open("synthetic://?duration=1", test_config()).await;
    let mut events = engine.subscribe();

    engine.play().await.unwrap();
    next_event(&mut events, |e| *e == PlayerEvent::EndOfStream).await;

    let status = wait_for(&engine, "stopped at end", |s| !s.playing && s.play_eof).await;
    assert_eq!(status.frame, 24);
    assert_eq!(status.video_queue, 0);
    wait_until("last frame redrawn", || sink.last().map(|f| f.0) == Some(24)).await;

    // Stepping past the end does nothing
    engine.step_forward().await.unwrap();
    assert_eq!(engine.status().frame, 24);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_seek_lands_on_next_frame_boundary() {
    let (engine, source, _sink) = open("synthetic://?duration=10", test_config()).await;
    let mut events = engine.subscribe();

    let outcome = engine.seek(4.99, SeekOptions::default()).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed);

    let status = engine.status();
    assert_eq!(status.position, 5.0);
    assert_eq!(status.frame, 125);
    assert_eq!(source.stats().seek_calls, 1);
    assert!(status.audio_head.unwrap() >= 5.0);

    let seeked = next_event(&mut events, |e| matches!(e, PlayerEvent::Seeked { .. })).await;
    assert_eq!(
        seeked,
        PlayerEvent::Seeked {
            time: 5.0,
            cached: false,
            skipped_audio: 0,
            skipped_video: 0,
        }
    );
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_burst_of_seeks_runs_only_latest() {
    let (engine, source, _sink) = open("synthetic://?duration=10", test_config()).await;

    let first = engine.seek(5.0, SeekOptions::default());
    let second = engine.seek(8.0, SeekOptions::default());
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), TaskOutcome::Cancelled);
    assert_eq!(second.unwrap(), TaskOutcome::Completed);
    assert_eq!(engine.position(), 8.0);
    assert_eq!(source.stats().seek_calls, 1);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_repeated_seek_is_deduplicated() {
    let (engine, _source, _sink) = open("synthetic://?duration=10", test_config()).await;

    let first = engine.seek(3.0, SeekOptions::default());
    let second = engine.seek(3.0, SeekOptions::default());
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap(), TaskOutcome::Completed);
    assert_eq!(second.unwrap(), TaskOutcome::Deduplicated);
    assert_eq!(engine.position(), 3.0);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_seek_inside_queue_skips_decoder() {
    let mut config = test_config();
    config.buffering.video_frames = 100;
    let (engine, source, _sink) =
        open("synthetic://?duration=10&width=32&height=18", config).await;
    wait_for(&engine, "100 queued frames", |s| s.video_queue >= 100).await;

    let mut events = engine.subscribe();
    let outcome = engine.seek(2.0, SeekOptions::default()).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed);

    let stats = source.stats();
    assert_eq!(stats.seek_calls, 0);
    assert_eq!(stats.skip_calls, 0);

    let status = engine.status();
    assert_eq!(status.position, 2.0);
    assert_eq!(status.frame, 50);
    let head = status.audio_head.unwrap();
    assert!((2.0..2.03).contains(&head), "audio head {}", head);

    let seeked = next_event(&mut events, |e| matches!(e, PlayerEvent::Seeked { .. })).await;
    assert_eq!(
        seeked,
        PlayerEvent::Seeked {
            time: 2.0,
            cached: true,
            skipped_audio: 0,
            skipped_video: 50,
        }
    );
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_frame_stepping() {
    let (engine, source, _sink) = open("synthetic://?duration=10", test_config()).await;
    wait_for(&engine, "first frame", |s| s.video_queue > 0).await;

    // No-op at the first frame
    engine.step_backward().await.unwrap();
    assert_eq!(engine.status().frame, 0);
    assert_eq!(source.stats().seek_calls, 0);

    engine.seek(2.0, SeekOptions::default()).await.unwrap();
    engine.step_forward().await.unwrap();
    let status = engine.status();
    assert_eq!(status.frame, 51);
    assert_eq!(status.position, 2.04);

    engine.step_backward().await.unwrap();
    let status = engine.status();
    assert_eq!(status.frame, 50);
    assert_eq!(status.position, 2.0);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_resize_redecodes_current_frame() {
    let (engine, source, sink) = open("synthetic://?duration=10", test_config()).await;
    wait_for(&engine, "first frame", |s| s.video_queue > 0).await;
    let mut events = engine.subscribe();

    assert_eq!(engine.resize(160, 90).await.unwrap(), TaskOutcome::Completed);
    assert_eq!(engine.status().output_size, (160, 90));
    assert_eq!(
        next_event(&mut events, |e| matches!(e, PlayerEvent::Resized { .. })).await,
        PlayerEvent::Resized {
            width: 160,
            height: 90
        }
    );
    wait_until("frame redrawn at new size", || {
        sink.last().map(|f| f.2) == Some((160, 90))
    })
    .await;
    assert_eq!(engine.status().position, 0.0);

    // Same size again: nothing to do
    engine.resize(160, 90).await.unwrap();
    assert_eq!(source.stats().resize_calls, 1);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_display_size_fits_video() {
    let (engine, _source, _sink) = open("synthetic://?duration=10", test_config()).await;

    engine.set_display_size(640, 480).await.unwrap();
    let layout = engine.layout();
    assert_eq!(layout.display_size, (640, 360));
    assert_eq!(layout.offset, (0, 60));
    assert_eq!(engine.status().output_size, (640, 360));

    wait_for(&engine, "frames at new size", |s| s.video_queue > 0).await;
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_audio_stream_switch_changes_sample_rate() {
    let (engine, _source, _sink) = open("synthetic://?duration=10", test_config()).await;
    engine.seek(3.0, SeekOptions::default()).await.unwrap();
    engine.set_volume(0.5).await.unwrap();
    assert_eq!(engine.status().sample_rate, Some(48_000));

    engine.set_audio_stream(2).await.unwrap();

    let status = engine.status();
    assert_eq!(status.audio_stream, Some(2));
    assert_eq!(status.sample_rate, Some(44_100));
    assert_eq!(status.position, 3.0);
    assert_eq!(status.volume, 0.5);
    assert_eq!(status.audio_head, Some(3.0));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_volume_is_clamped() {
    let (engine, _source, _sink) = open("synthetic://?duration=2", test_config()).await;
    engine.set_volume(1.5).await.unwrap();
    assert_eq!(engine.volume(), 1.0);
    engine.set_volume(-1.0).await.unwrap();
    assert_eq!(engine.volume(), 0.0);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_close_releases_everything() {
    let (engine, source, _sink) = open("synthetic://?duration=10", test_config()).await;
    wait_for(&engine, "queued frames", |s| s.video_queue >= 8).await;

    engine.close().await.unwrap();
    let status = engine.status();
    assert_eq!(status.video_queue, 0);
    assert_eq!(status.pool_leased, 0);
    assert!(source.is_closed());
    assert!(matches!(engine.play().await, Err(Error::Closed)));

    // Second close is a no-op
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_open_rejects_unknown_scheme() {
    let result = PlaybackEngine::open(
        "rtsp://camera/stream",
        test_config(),
        Arc::new(RecordingSink::default()),
        None,
    )
    .await;
    assert!(matches!(result, Err(Error::Decode(_))));
}

/// Synthetic source with scripted faults
struct ScriptedSource {
    inner: SyntheticSource,
    /// `decode_automatic` call (1-based) that rewinds the decoder to 0
    rewind_on_call: usize,
    calls: AtomicUsize,
    /// `seek_video` calls left to fail
    failing_seeks: AtomicUsize,
    /// `skip_until` calls left to come back without audio
    silent_skips: AtomicUsize,
    /// `get_keyframe_before` reports no keyframe
    no_keyframes: bool,
    /// Audio stream that reports an unusable sample rate
    broken_audio_stream: Option<usize>,
    seek_targets: Mutex<Vec<f64>>,
    keyframe_queries: AtomicUsize,
}

impl ScriptedSource {
    fn new(url: &str) -> Self {
        Self {
            inner: SyntheticSource::open(url).unwrap(),
            rewind_on_call: 0,
            calls: AtomicUsize::new(0),
            failing_seeks: AtomicUsize::new(0),
            silent_skips: AtomicUsize::new(0),
            no_keyframes: false,
            broken_audio_stream: None,
            seek_targets: Mutex::new(Vec::new()),
            keyframe_queries: AtomicUsize::new(0),
        }
    }

    fn seek_targets(&self) -> Vec<f64> {
        self.seek_targets.lock().unwrap().clone()
    }

    async fn engine(self: &Arc<Self>, config: PlayerConfig) -> PlaybackEngine {
        PlaybackEngine::with_source(
            self.clone(),
            config,
            Arc::new(RecordingSink::default()),
            None,
        )
        .await
        .unwrap()
    }
}

/// Decrement `counter` if positive; true when it was
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl DecodeSource for ScriptedSource {
    async fn open_audio(&self, stream: usize) -> preview_player::Result<AudioStatus> {
        let status = self.inner.open_audio(stream).await?;
        if self.broken_audio_stream == Some(stream) {
            return Ok(AudioStatus {
                sample_rate: 0,
                ..status
            });
        }
        Ok(status)
    }

    async fn open_video(
        &self,
        stream: Option<usize>,
        use_hwaccel: bool,
    ) -> preview_player::Result<VideoStatus> {
        self.inner.open_video(stream, use_hwaccel).await
    }

    async fn decode_automatic(
        &self,
        budget: Duration,
        pool: &FramePool,
    ) -> preview_player::Result<DecodedBatch> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.rewind_on_call {
            self.inner.seek_video(0.0).await?;
        }
        self.inner.decode_automatic(budget, pool).await
    }

    async fn seek_video(&self, time: f64) -> preview_player::Result<()> {
        self.seek_targets.lock().unwrap().push(time);
        if take_one(&self.failing_seeks) {
            return Err(Error::Decode("seek failed".to_string()));
        }
        self.inner.seek_video(time).await
    }

    async fn skip_until(&self, time: f64, pool: &FramePool) -> preview_player::Result<DecodedBatch> {
        let mut batch = self.inner.skip_until(time, pool).await?;
        if take_one(&self.silent_skips) {
            batch.audio.clear();
        }
        Ok(batch)
    }

    async fn set_video_size(&self, width: u32, height: u32) -> preview_player::Result<()> {
        self.inner.set_video_size(width, height).await
    }

    fn output_size(&self) -> (u32, u32) {
        self.inner.output_size()
    }

    async fn get_keyframe_before(&self, time: f64) -> preview_player::Result<Option<f64>> {
        self.keyframe_queries.fetch_add(1, Ordering::SeqCst);
        if self.no_keyframes {
            return Ok(None);
        }
        self.inner.get_keyframe_before(time).await
    }

    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn streams(&self) -> Vec<StreamInfo> {
        self.inner.streams()
    }

    fn video(&self) -> Option<VideoStatus> {
        self.inner.video()
    }

    fn audio(&self) -> Option<AudioStatus> {
        self.inner.audio()
    }

    async fn close(&self) -> preview_player::Result<()> {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[tokio::test]
async fn test_out_of_order_frames_clear_and_recover() {
    let source = Arc::new(ScriptedSource {
        rewind_on_call: 2,
        ..ScriptedSource::new("synthetic://?duration=10")
    });
    let engine = source.engine(test_config()).await;

    wait_for(&engine, "queue refilled after rewind", |s| {
        s.video_queue >= 8 && source.calls.load(Ordering::SeqCst) > 2
    })
    .await;
    // Let the loop go idle so no batch is in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = engine.status();
    // The first batch was dropped; the queue restarts after it
    assert!(status.position > 0.0, "position {}", status.position);
    assert_eq!(status.pool_leased, status.video_queue);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_seek_leaves_engine_usable() {
    let source = Arc::new(ScriptedSource::new("synthetic://?duration=10"));
    let engine = source.engine(test_config()).await;
    wait_for(&engine, "queued frames", |s| s.video_queue >= 8).await;

    source.failing_seeks.store(1, Ordering::SeqCst);
    let result = engine.seek(5.0, SeekOptions::default()).await;
    assert!(matches!(result, Err(Error::Decode(_))), "{:?}", result);

    // Decode-ahead resumes without filtering for the abandoned target
    let status = wait_for(&engine, "queue refilled after failed seek", |s| {
        s.video_queue >= 8 && s.audio_head.is_some()
    })
    .await;
    assert!(status.position < 5.0, "position {}", status.position);
    assert!(status.audio_head.unwrap() < 5.0);

    let outcome = engine.seek(2.0, SeekOptions::default()).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed);
    assert_eq!(engine.position(), 2.0);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_seek_retries_from_earlier_keyframes() {
    let source = Arc::new(ScriptedSource::new("synthetic://?duration=10"));
    let engine = source.engine(test_config()).await;
    wait_for(&engine, "queued frames", |s| s.video_queue >= 8).await;

    source.silent_skips.store(2, Ordering::SeqCst);
    let outcome = engine.seek(5.0, SeekOptions::default()).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed);

    // Keyframes every 12 frames at 25 fps: 120 -> 4.8, 108 -> 4.32
    assert_eq!(source.seek_targets(), vec![5.0, 4.8, 4.32]);
    assert_eq!(source.keyframe_queries.load(Ordering::SeqCst), 2);

    // Only the coarse seek moves back; the frame shown is the requested one
    let status = engine.status();
    assert_eq!(status.position, 5.0);
    assert_eq!(status.frame, 125);
    assert!(status.audio_head.unwrap() >= 5.0);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_seek_retries_are_bounded() {
    let source = Arc::new(ScriptedSource {
        no_keyframes: true,
        ..ScriptedSource::new("synthetic://?duration=10")
    });
    let mut config = test_config();
    config.sync.seek_retry_attempts = 2;
    let engine = source.engine(config).await;
    wait_for(&engine, "queued frames", |s| s.video_queue >= 8).await;

    source.silent_skips.store(usize::MAX, Ordering::SeqCst);
    let outcome = engine.seek(5.0, SeekOptions::default()).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed);

    // No keyframe index: step back by seek_retry_step, twice at most
    assert_eq!(source.seek_targets(), vec![5.0, 4.0, 3.0]);
    assert_eq!(source.keyframe_queries.load(Ordering::SeqCst), 2);
    assert_eq!(engine.position(), 5.0);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_unusable_audio_stream_keeps_current_sink() {
    let source = Arc::new(ScriptedSource {
        broken_audio_stream: Some(2),
        ..ScriptedSource::new("synthetic://?duration=10")
    });
    let engine = source.engine(test_config()).await;
    engine.seek(3.0, SeekOptions::default()).await.unwrap();
    engine.set_volume(0.5).await.unwrap();

    let result = engine.set_audio_stream(2).await;
    assert!(matches!(result, Err(Error::AudioOutput(_))), "{:?}", result);

    let status = engine.status();
    assert_eq!(status.audio_stream, Some(1));
    assert_eq!(status.sample_rate, Some(48_000));
    assert_eq!(status.volume, 0.5);
    assert_eq!(status.position, 3.0);

    // The old sink still answers
    engine.set_volume(0.25).await.unwrap();
    assert_eq!(engine.volume(), 0.25);
    let outcome = engine.seek(6.0, SeekOptions::default()).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed);
    let status = wait_for(&engine, "audio queued after seek", |s| s.audio_head.is_some()).await;
    assert!(status.audio_head.unwrap() >= 6.0);
    engine.close().await.unwrap();
}
