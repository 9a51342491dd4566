//! Seeking and frame stepping
//!
//! Seeks run on a [`RestartableTask`](preview_common::sync::RestartableTask):
//! a burst of requests executes at most the running one and the newest.
//! A target already inside the video queue is served from the queue; any
//! other target goes through a coarse decoder seek followed by an exact
//! skip, stepping back to earlier keyframes when a stream comes up empty.

use super::core::{PlaybackEngine, SeekProgress};
use crate::error::{Error, Result};
use crate::playback::types::{SeekOptions, SeekRequest};
use preview_common::events::PlayerEvent;
use preview_common::sync::TaskOutcome;
use preview_common::time::{clamp_time, format_timestamp, frame_to_time, time_to_frame_ceil};
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Two times closer than this are the same frame boundary
const TIME_EPSILON: f64 = 1e-9;

impl PlaybackEngine {
    /// Seek to `time` seconds.
    ///
    /// The target is clamped to the media and rounded up to the next frame
    /// boundary. The request is queued when this is called; the returned
    /// future reports how it ended and may be dropped.
    pub fn seek(
        &self,
        time: f64,
        options: SeekOptions,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send + 'static {
        let time = clamp_time(time, self.duration());
        let index = time_to_frame_ceil(time, self.frame_rate());
        self.seek_to_frame(index, options)
    }

    /// Seek to frame `index`, clamped to the last frame
    pub fn seek_to_frame(
        &self,
        index: u64,
        options: SeekOptions,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send + 'static {
        let index = index.min(self.last_frame_index());
        let request = SeekRequest {
            time: frame_to_time(index, self.frame_rate()),
            imprecise: options.imprecise,
            force: false,
        };
        debug!("Seek requested: frame {} ({})", index, format_timestamp(request.time));
        self.inner.seek_task.request(request)
    }

    /// Show the next frame; no-op at end of stream
    pub async fn step_forward(&self) -> Result<()> {
        let (frame, play_eof) = {
            let state = self.lock_state();
            (state.frame, state.play_eof)
        };
        if play_eof || frame >= self.last_frame_index() {
            debug!("Step forward ignored at end of stream");
            return Ok(());
        }
        self.seek_to_frame(frame + 1, SeekOptions::default()).await?;
        Ok(())
    }

    /// Show the previous frame; no-op at the first frame
    pub async fn step_backward(&self) -> Result<()> {
        let frame = self.lock_state().frame;
        if frame == 0 {
            debug!("Step backward ignored at first frame");
            return Ok(());
        }
        self.seek_to_frame(frame - 1, SeekOptions::default()).await?;
        Ok(())
    }

    fn last_frame_index(&self) -> u64 {
        time_to_frame_ceil(self.duration(), self.frame_rate()).saturating_sub(1)
    }

    /// Seek executor
    pub(super) async fn run_seek(&self, request: SeekRequest, token: CancellationToken) -> Result<()> {
        if self.is_playing() {
            self.stop().await?;
        }
        if token.is_cancelled() {
            return Ok(());
        }

        let guard = self.inner.mutex.acquire().await;
        if token.is_cancelled() {
            return Ok(());
        }
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if !request.force && self.is_showing(request.time) {
            debug!("Already at {}", format_timestamp(request.time));
            return Ok(());
        }

        let started = Instant::now();
        let cached = match self.seek_in_cache(request.time).await {
            Ok(cached) => cached,
            Err(e) => {
                drop(guard);
                self.abandon_seek();
                return Err(e);
            }
        };
        if let Some(skipped_video) = cached {
            drop(guard);
            debug!(
                "Seek to {} served from cache ({} frames dropped)",
                format_timestamp(request.time),
                skipped_video
            );
            self.inner.events.emit(PlayerEvent::Seeked {
                time: request.time,
                cached: true,
                skipped_audio: 0,
                skipped_video,
            });
            self.ensure_decoding();
            self.request_present();
            return Ok(());
        }

        let outcome = self.seek_in_decoder(&request, &token).await;
        drop(guard);
        let progress = match outcome {
            Ok(Some(progress)) => progress,
            Ok(None) => {
                self.abandon_seek();
                return Ok(());
            }
            Err(e) => {
                warn!("Seek to {} failed: {}", format_timestamp(request.time), e);
                self.abandon_seek();
                return Err(e);
            }
        };

        let position = self.position();
        let (skipped_audio, skipped_video) = progress
            .map(|p| (p.skipped_audio, p.skipped_video))
            .unwrap_or((0, 0));
        info!(
            "Seek to {} settled at {} in {:.1}ms",
            format_timestamp(request.time),
            format_timestamp(position),
            started.elapsed().as_secs_f64() * 1000.0
        );
        self.inner.events.emit(PlayerEvent::Seeked {
            time: position,
            cached: false,
            skipped_audio,
            skipped_video,
        });
        self.ensure_decoding();
        self.request_present();
        Ok(())
    }

    /// Coarse seek plus exact skip, with the engine mutex held.
    ///
    /// Returns `None` when the request was cancelled part way. Retries only
    /// move the coarse decoder seek earlier; the skip target stays at the
    /// requested time.
    async fn seek_in_decoder(
        &self,
        request: &SeekRequest,
        token: &CancellationToken,
    ) -> Result<Option<Option<SeekProgress>>> {
        self.clear_cache().await?;
        let retries = self.inner.config.sync.seek_retry_attempts;
        let mut coarse = request.time;
        let mut attempt = 0;
        loop {
            self.lock_state().seek = (!request.imprecise).then(|| SeekProgress::new(request.time));
            self.inner.source.seek_video(coarse).await?;
            if request.imprecise {
                return Ok(Some(None));
            }
            if token.is_cancelled() {
                return Ok(None);
            }

            let batch = self.inner.source.skip_until(request.time, &self.inner.pool).await?;
            if token.is_cancelled() {
                return Ok(None);
            }
            let complete = !batch.audio.is_empty() && !batch.video.is_empty();
            self.receive_batch(batch, None).await?;
            let progress = self.lock_state().seek.take();

            if complete || attempt >= retries {
                return Ok(Some(progress));
            }
            let Some(earlier) = self.retry_target(coarse).await? else {
                return Ok(Some(progress));
            };
            attempt += 1;
            warn!(
                "Seek to {} found no frame in every stream; retrying from {} ({}/{})",
                format_timestamp(request.time),
                format_timestamp(earlier),
                attempt,
                retries
            );
            self.clear_cache().await?;
            coarse = earlier;
        }
    }

    /// Drop the seek filter and restart the loops after a seek that did not finish
    fn abandon_seek(&self) {
        self.lock_state().seek = None;
        self.ensure_decoding();
        self.request_present();
    }

    /// Whether the queue head is the frame at `time`
    fn is_showing(&self, time: f64) -> bool {
        let state = self.lock_state();
        state.seek.is_none()
            && (state.position - time).abs() < TIME_EPSILON
            && state
                .video
                .front()
                .is_some_and(|f| (f.time - time).abs() < TIME_EPSILON)
    }

    /// Trim the queue to `time` if it already holds that frame.
    ///
    /// Returns the number of video frames dropped, or `None` when the
    /// target is outside the queue.
    async fn seek_in_cache(&self, time: f64) -> Result<Option<usize>> {
        let (dropped, position) = {
            let mut state = self.lock_state();
            let (Some(first), Some(last)) = (
                state.video.front().map(|f| f.time),
                state.video.back().map(|f| f.time),
            ) else {
                return Ok(None);
            };
            if time < first - TIME_EPSILON || time > last + TIME_EPSILON {
                return Ok(None);
            }

            let mut dropped = 0;
            while state.video.len() > 1
                && state
                    .video
                    .front()
                    .is_some_and(|f| f.time < time - TIME_EPSILON)
            {
                state.video.pop_front();
                dropped += 1;
            }
            if let Some((front_time, front_index)) =
                state.video.front().map(|f| (f.time, f.position))
            {
                state.position = front_time;
                state.frame = front_index;
            }
            state.play_eof = false;
            (dropped, state.position)
        };

        self.audio().shift_until(time).await?;
        self.inner.events.emit(PlayerEvent::Playback { time: position });
        Ok(Some(dropped))
    }

    /// Earlier target for a seek that came up empty
    async fn retry_target(&self, target: f64) -> Result<Option<f64>> {
        if target <= 0.0 {
            return Ok(None);
        }
        let keyframe = self.inner.source.get_keyframe_before(target).await?;
        let earlier = keyframe
            .unwrap_or(target - self.inner.config.sync.seek_retry_step)
            .max(0.0);
        Ok((earlier < target).then_some(earlier))
    }
}
