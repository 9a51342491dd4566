//! Decode-ahead loop and frame admission
//!
//! The loop runs while the video queue or the audio buffer is below its
//! target. It only ever takes the engine mutex when nobody holds it, so a
//! pending seek or resize is never kept waiting behind speculative decoding.

use super::core::PlaybackEngine;
use crate::audio::AudioFrame;
use crate::error::Result;
use crate::playback::types::VideoFrame;
use crate::source::DecodedBatch;
use preview_common::events::PlayerEvent;
use preview_common::time::format_timestamp;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Weight of the previous value in the damped fetch-time diagnostics
const FETCH_DAMPING: f64 = 0.5;

/// Slots kept free beyond the video queue (last presented frame, one spare)
const POOL_HEADROOM: usize = 2;

enum DecodeStep {
    /// Frames were received; go again
    Continue,
    /// Mutex busy or pool full; retry shortly
    Idle,
    /// Targets met or nothing more to decode
    Done,
}

/// What to do with one decoded video frame
enum Admission {
    OutOfOrder { time: f64, last: f64 },
    Skipped,
    Queued { time: f64, first: bool, align_audio: bool },
}

impl PlaybackEngine {
    /// Start the decode-ahead loop unless it is already running
    pub(super) fn ensure_decoding(&self) {
        self.inner.decode_requested.store(true, Ordering::Release);
        if self.inner.decoding.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move { engine.decode_loop().await });
    }

    async fn decode_loop(self) {
        trace!("Decode-ahead loop started");
        loop {
            let step = match self.decode_step().await {
                Ok(step) => step,
                Err(e) => {
                    warn!("Decode-ahead stopped: {}", e);
                    DecodeStep::Done
                }
            };
            match step {
                DecodeStep::Continue => tokio::task::yield_now().await,
                DecodeStep::Idle => tokio::time::sleep(self.inner.config.busy_retry()).await,
                DecodeStep::Done => {
                    self.inner.decoding.store(false, Ordering::Release);
                    // A request that raced with the last step restarts the loop
                    let restart = self.inner.decode_requested.load(Ordering::Acquire)
                        && !self.is_closed()
                        && !self.inner.decoding.swap(true, Ordering::AcqRel);
                    if restart {
                        continue;
                    }
                    break;
                }
            }
        }
        trace!("Decode-ahead loop finished");
    }

    async fn decode_step(&self) -> Result<DecodeStep> {
        self.inner.decode_requested.store(false, Ordering::Release);
        if !self.wants_more() {
            return Ok(DecodeStep::Done);
        }
        let Some(_guard) = self.inner.mutex.acquire_if_idle() else {
            return Ok(DecodeStep::Idle);
        };
        // A seek may have run between the check and the acquire
        if !self.wants_more() {
            return Ok(DecodeStep::Done);
        }

        let started = Instant::now();
        let batch = self
            .inner
            .source
            .decode_automatic(self.inner.config.decode_budget(), &self.inner.pool)
            .await?;
        let elapsed = started.elapsed();

        if batch.is_empty() && !batch.end_of_stream {
            return Ok(DecodeStep::Idle);
        }
        self.receive_batch(batch, Some(elapsed)).await?;
        Ok(DecodeStep::Continue)
    }

    /// Whether either buffer is below its target
    fn wants_more(&self) -> bool {
        let buffered_audio = self.audio().feedback().buffered_seconds();
        let state = self.lock_state();
        if state.closed || state.preload_eof {
            return false;
        }
        let hard_cap = self.inner.pool.capacity().saturating_sub(POOL_HEADROOM).max(1);
        if state.video.len() >= hard_cap {
            return false;
        }
        let targets = &self.inner.config.buffering;
        state.video.len() < targets.video_frames || buffered_audio < targets.audio_seconds
    }

    /// Route a decoded batch into the audio sink and the video queue.
    ///
    /// Returns `false` when an ordering violation cleared the caches and
    /// the rest of the batch was discarded. The caller must hold the engine
    /// mutex.
    pub(super) async fn receive_batch(
        &self,
        batch: DecodedBatch,
        elapsed: Option<Duration>,
    ) -> Result<bool> {
        let DecodedBatch {
            audio,
            video,
            end_of_stream,
        } = batch;

        if let Some(elapsed) = elapsed {
            let ms = elapsed.as_secs_f64() * 1000.0;
            let mut state = self.lock_state();
            if !video.is_empty() {
                state.fetch_video_ms = damp(state.fetch_video_ms, ms);
            }
            if !audio.is_empty() {
                state.fetch_audio_ms = damp(state.fetch_audio_ms, ms);
            }
        }

        for frame in audio {
            if !self.receive_audio(frame).await? {
                return Ok(false);
            }
        }
        for frame in video {
            if !self.receive_video(frame).await? {
                return Ok(false);
            }
        }

        if end_of_stream {
            self.lock_state().preload_eof = true;
            debug!("Decoder reached end of stream");
            self.request_present();
        }
        Ok(true)
    }

    async fn receive_audio(&self, frame: AudioFrame) -> Result<bool> {
        let sink = self.audio();
        if let Some(tail) = sink.tail().filter(|&tail| frame.time <= tail) {
            warn!(
                "Abnormal audio frame ordering: {} after {}; clearing caches",
                format_timestamp(frame.time),
                format_timestamp(tail)
            );
            self.clear_cache().await?;
            return Ok(false);
        }

        let skip = {
            let mut state = self.lock_state();
            match state.seek.as_mut() {
                Some(seek) if frame.time < seek.target - 1e-9 => {
                    seek.skipped_audio += 1;
                    true
                }
                _ => false,
            }
        };
        if skip {
            trace!("Skipping audio at {} before seek target", frame.time);
            return Ok(true);
        }

        sink.push_frame(frame).await?;
        Ok(true)
    }

    async fn receive_video(&self, frame: VideoFrame) -> Result<bool> {
        let half_frame = 0.5 / self.inner.video.frame_rate.max(1.0);

        let admission = {
            let mut state = self.lock_state();
            let last = state.video.back().map(|f| f.time);
            match last {
                Some(last) if frame.time <= last => Admission::OutOfOrder {
                    time: frame.time,
                    last,
                },
                _ => {
                    let early = state
                        .seek
                        .as_ref()
                        .is_some_and(|seek| frame.time < seek.target - half_frame);
                    if early {
                        if let Some(seek) = state.seek.as_mut() {
                            seek.skipped_video += 1;
                        }
                        Admission::Skipped
                    } else {
                        let align_audio = match state.seek.as_mut() {
                            Some(seek) if !seek.video_seen => {
                                seek.video_seen = true;
                                true
                            }
                            _ => false,
                        };
                        let (time, position) = (frame.time, frame.position);
                        state.video.push_back(frame);
                        let first = state.video.len() == 1;
                        if first {
                            state.position = time;
                            state.frame = position;
                        }
                        Admission::Queued {
                            time,
                            first,
                            align_audio,
                        }
                    }
                }
            }
        };

        match admission {
            Admission::OutOfOrder { time, last } => {
                warn!(
                    "Abnormal video frame ordering: {} after {}; clearing caches",
                    format_timestamp(time),
                    format_timestamp(last)
                );
                self.clear_cache().await?;
                Ok(false)
            }
            Admission::Skipped => Ok(true),
            Admission::Queued {
                time,
                first,
                align_audio,
            } => {
                if align_audio {
                    let sink = self.audio();
                    if sink.head().is_some_and(|head| head < time) {
                        sink.shift_until(time).await?;
                    }
                }
                if first {
                    self.inner.events.emit(PlayerEvent::Playback { time });
                    self.request_present();
                }
                Ok(true)
            }
        }
    }
}

fn damp(previous: f64, sample: f64) -> f64 {
    previous * FETCH_DAMPING + sample * (1.0 - FETCH_DAMPING)
}
