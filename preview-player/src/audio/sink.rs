//! Request/response façade over the render context
//!
//! [`AudioSink`] turns the ring buffer's message protocol into ordinary async
//! calls. Each call holds the sink's [`Mutex`] for one round trip: it tags
//! the request with a fresh id, sends it, and waits for the reply echoing
//! that id or fails with [`Error::AudioTimeout`]. A reply arriving after its
//! request timed out carries a stale id and can never satisfy a later call.
//!
//! A background pump task receives every reply, keeps the latest
//! [`AudioFeedback`] snapshot for the synchronous getters, and logs and
//! broadcasts underruns.

use crate::audio::output::RenderDriver;
use crate::audio::ring_buffer::AudioRingBuffer;
use crate::audio::types::{AudioFeedback, AudioFrame, AudioInput, AudioReply, AudioRequest, FeedbackKind};
use crate::config::{AudioBackend, PlayerConfig};
use crate::error::{Error, Result};
use preview_common::events::{EventBus, PlayerEvent};
use preview_common::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

type PendingReply = Option<(u64, oneshot::Sender<AudioFeedback>)>;

/// Async handle to a running audio render context
pub struct AudioSink {
    requests: StdMutex<Option<mpsc::Sender<AudioRequest>>>,
    mutex: Mutex,
    pending: Arc<StdMutex<PendingReply>>,
    snapshot: Arc<StdMutex<AudioFeedback>>,
    next_id: AtomicU64,
    timeout: Duration,
    sample_rate: u32,
    driver: StdMutex<Option<RenderDriver>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AudioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSink")
            .field("sample_rate", &self.sample_rate)
            .field("feedback", &self.feedback())
            .finish()
    }
}

impl AudioSink {
    /// Start a render context for a stream at `sample_rate`.
    ///
    /// Must be called inside a tokio runtime (the reply pump is a task).
    pub fn open(sample_rate: u32, config: &PlayerConfig, events: EventBus) -> Result<Self> {
        let ring = AudioRingBuffer::new(sample_rate, config.audio.volume_exponent);
        let (req_tx, req_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = tokio::sync::mpsc::unbounded_channel();

        let driver = match config.audio.backend {
            AudioBackend::Headless => RenderDriver::spawn_headless(
                ring,
                sample_rate,
                config.audio.quantum_frames,
                req_rx,
                reply_tx,
            )?,
            #[cfg(feature = "device-output")]
            AudioBackend::Device => RenderDriver::spawn_device(ring, sample_rate, req_rx, reply_tx)?,
            #[cfg(not(feature = "device-output"))]
            AudioBackend::Device => {
                return Err(Error::AudioOutput(
                    "built without the device-output feature".to_string(),
                ))
            }
        };

        info!("Audio sink opened at {} Hz", sample_rate);
        Ok(Self::attach(sample_rate, config, events, req_tx, reply_rx, Some(driver)))
    }

    /// Wrap the channels of a render context that is already running
    fn attach(
        sample_rate: u32,
        config: &PlayerConfig,
        events: EventBus,
        requests: mpsc::Sender<AudioRequest>,
        replies: UnboundedReceiver<AudioReply>,
        driver: Option<RenderDriver>,
    ) -> Self {
        let pending: Arc<StdMutex<PendingReply>> = Arc::new(StdMutex::new(None));
        let snapshot = Arc::new(StdMutex::new(AudioFeedback {
            volume: 1.0,
            ..AudioFeedback::default()
        }));
        let pump = tokio::spawn(pump_replies(
            replies,
            Arc::clone(&pending),
            Arc::clone(&snapshot),
            events,
        ));

        Self {
            requests: StdMutex::new(Some(requests)),
            mutex: Mutex::with_stall_warning("audio-sink", config.mutex_stall_warning()),
            pending,
            snapshot,
            next_id: AtomicU64::new(1),
            timeout: config.request_timeout(),
            sample_rate,
            driver: StdMutex::new(driver),
            pump: StdMutex::new(Some(pump)),
        }
    }

    /// Send one request and wait for its reply
    async fn post(&self, input: AudioInput) -> Result<AudioFeedback> {
        let _guard = self.mutex.acquire().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = input.name();
        let (tx, rx) = oneshot::channel();
        *lock(&self.pending) = Some((id, tx));

        let sent = match lock(&self.requests).as_ref() {
            Some(requests) => requests.send(AudioRequest { id, input }).is_ok(),
            None => false,
        };
        if !sent {
            lock(&self.pending).take();
            return Err(Error::AudioChannelClosed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(feedback)) => Ok(feedback),
            Ok(Err(_)) => Err(Error::AudioChannelClosed),
            Err(_) => {
                lock(&self.pending).take();
                warn!("Audio request {} ({}) timed out", id, name);
                Err(Error::AudioTimeout(name.to_string()))
            }
        }
    }

    /// Drop every queued frame
    pub async fn clear_buffer(&self) -> Result<()> {
        self.post(AudioInput::ClearBuffer).await.map(drop)
    }

    /// Queue a decoded frame
    pub async fn push_frame(&self, frame: AudioFrame) -> Result<()> {
        self.post(AudioInput::Frame(frame)).await.map(drop)
    }

    /// Drop queued frames that start before `time`
    pub async fn shift_until(&self, time: f64) -> Result<()> {
        self.post(AudioInput::ShiftUntil(time)).await.map(drop)
    }

    /// Start consuming samples; no-op if already playing
    pub async fn play(&self) -> Result<()> {
        if self.is_playing() {
            debug!("Audio sink already playing");
            return Ok(());
        }
        self.post(AudioInput::Play).await.map(drop)
    }

    /// Stop consuming samples; no-op if already stopped
    pub async fn stop(&self) -> Result<()> {
        if !self.is_playing() {
            debug!("Audio sink already stopped");
            return Ok(());
        }
        self.post(AudioInput::Suspend).await.map(drop)
    }

    /// Set the linear volume; clamped to [0, 1]
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.post(AudioInput::SetVolume(volume)).await.map(drop)
    }

    /// Refresh the feedback snapshot
    pub async fn query(&self) -> Result<AudioFeedback> {
        self.post(AudioInput::Query).await
    }

    /// Stop the render context and wait for it to exit.
    ///
    /// Later requests fail with [`Error::AudioChannelClosed`].
    pub async fn close(&self) {
        let _guard = self.mutex.acquire().await;
        lock(&self.requests).take();

        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            if tokio::task::spawn_blocking(move || driver.join()).await.is_err() {
                warn!("Audio driver join task failed");
            }
        }
        let pump = lock(&self.pump).take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        info!("Audio sink closed");
    }

    /// Last observed feedback
    pub fn feedback(&self) -> AudioFeedback {
        *lock(&self.snapshot)
    }

    /// Audio clock: time of the next sample to be rendered
    pub fn head(&self) -> Option<f64> {
        self.feedback().head_time
    }

    pub fn tail(&self) -> Option<f64> {
        self.feedback().tail_time
    }

    pub fn buffer_length(&self) -> usize {
        self.feedback().buffer_length
    }

    pub fn buffer_size(&self) -> usize {
        self.feedback().buffer_size
    }

    pub fn is_playing(&self) -> bool {
        self.feedback().is_playing
    }

    pub fn volume(&self) -> f32 {
        self.feedback().volume
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

async fn pump_replies(
    mut replies: UnboundedReceiver<AudioReply>,
    pending: Arc<StdMutex<PendingReply>>,
    snapshot: Arc<StdMutex<AudioFeedback>>,
    events: EventBus,
) {
    while let Some(reply) = replies.recv().await {
        let previous = std::mem::replace(&mut *lock(&snapshot), reply.feedback);

        match reply.kind {
            FeedbackKind::Ok { id } => {
                let mut slot = lock(&pending);
                if slot.as_ref().is_some_and(|(wanted, _)| *wanted == id) {
                    if let Some((_, tx)) = slot.take() {
                        let _ = tx.send(reply.feedback);
                    }
                } else {
                    trace!("Discarding stale audio reply {}", id);
                }
            }
            FeedbackKind::Playing => {}
            FeedbackKind::Underrun => {
                let time = previous.head_time.or(previous.tail_time);
                warn!("Audio buffer exhausted while playing (last head {:?})", time);
                events.emit(PlayerEvent::AudioUnderrun { time });
            }
        }
    }
    debug!("Audio reply pump finished");
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
