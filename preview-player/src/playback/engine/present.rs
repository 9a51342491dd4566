//! Presentation loop
//!
//! One loop at a time displays frames against the audio clock. Anyone may
//! ask for a presentation pass; a request that arrives while the loop is
//! winding down restarts it instead of being lost.

use super::core::{PlayerState, PlaybackEngine};
use crate::audio::AudioFeedback;
use crate::error::Result;
use crate::playback::presenter::{frame_period, frames_to_drop, next_delay};
use crate::playback::types::{PresentStep, VideoFrame};
use crate::render::DebugOverlay;
use preview_common::events::PlayerEvent;
use preview_common::time::format_timestamp;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, trace, warn};

enum Plan {
    /// Nothing more to show until woken
    Idle,
    /// No frame or no clock yet; poll again in one frame period
    Wait,
    /// Last frame presented; stop playback
    Finished,
    Shown {
        time: f64,
        delay: Duration,
        moved: bool,
    },
}

impl PlaybackEngine {
    /// Ask for a presentation pass, starting the loop if it is idle
    pub(super) fn request_present(&self) {
        self.inner.present_requested.store(true, Ordering::Release);
        if self.inner.presenting.swap(true, Ordering::AcqRel) {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move { engine.present_loop().await });
    }

    async fn present_loop(self) {
        loop {
            self.inner.present_requested.store(false, Ordering::Release);
            let step = match self.present_next().await {
                Ok(step) => step,
                Err(e) => {
                    warn!("Presentation step failed: {}", e);
                    PresentStep::Stop
                }
            };
            match step {
                PresentStep::After(delay) => tokio::time::sleep(delay).await,
                PresentStep::Stop => {
                    self.inner.presenting.store(false, Ordering::Release);
                    let again = self.inner.present_requested.load(Ordering::Acquire)
                        && !self.inner.presenting.swap(true, Ordering::AcqRel);
                    if again {
                        continue;
                    }
                    break;
                }
            }
        }
    }

    async fn present_next(&self) -> Result<PresentStep> {
        let period = frame_period(self.inner.video.frame_rate);
        let feedback = self.audio().feedback();

        let plan = {
            let mut state = self.lock_state();
            if state.closed {
                Plan::Idle
            } else if !state.playing {
                self.present_paused(&mut state, &feedback)
            } else if state.video.is_empty() {
                if state.preload_eof {
                    state.play_eof = true;
                    Plan::Finished
                } else {
                    Plan::Wait
                }
            } else {
                // Audio that ends before the video leaves the picture free-running
                let clock = feedback
                    .head_time
                    .or_else(|| state.preload_eof.then(|| state.position + period));
                match clock {
                    None => Plan::Wait,
                    Some(clock) => self.present_playing(&mut state, &feedback, clock),
                }
            }
        };

        match plan {
            Plan::Idle => Ok(PresentStep::Stop),
            Plan::Wait => {
                self.ensure_decoding();
                Ok(PresentStep::After(Duration::from_secs_f64(period)))
            }
            Plan::Finished => {
                info!("End of stream presented");
                self.inner.events.emit(PlayerEvent::EndOfStream);
                self.stop().await?;
                Ok(PresentStep::Stop)
            }
            Plan::Shown { time, delay, moved } => {
                if moved {
                    self.inner.events.emit(PlayerEvent::Playback { time });
                }
                if self.lock_state().playing {
                    self.ensure_decoding();
                    Ok(PresentStep::After(delay))
                } else {
                    Ok(PresentStep::Stop)
                }
            }
        }
    }

    /// Draw the queue head, or the last frame once the stream has ended
    fn present_paused(&self, state: &mut PlayerState, feedback: &AudioFeedback) -> Plan {
        let frame = match state.video.front() {
            Some(frame) => frame,
            None if state.preload_eof => match state.last_frame.as_ref() {
                Some(frame) => frame,
                None => return Plan::Idle,
            },
            None => return Plan::Idle,
        };

        let overlay = self.debug_overlay(state, frame, feedback);
        self.inner.render.present(frame, &state.layout, overlay.as_ref());

        let (time, position) = (frame.time, frame.position);
        let moved = state.position != time;
        state.position = time;
        state.frame = position;
        Plan::Shown {
            time,
            delay: Duration::ZERO,
            moved,
        }
    }

    fn present_playing(&self, state: &mut PlayerState, feedback: &AudioFeedback, clock: f64) -> Plan {
        let dropped = frames_to_drop(state.video.iter().map(|f| f.time), clock);
        if dropped > 0 {
            trace!("Dropping {} late frames at {}", dropped, format_timestamp(clock));
            state.video.drain(..dropped);
        }
        let Some(frame) = state.video.pop_front() else {
            return Plan::Wait;
        };

        let overlay = self.debug_overlay(state, &frame, feedback);
        self.inner.render.present(&frame, &state.layout, overlay.as_ref());

        let time = frame.time;
        state.position = time;
        state.frame = frame.position;
        state.last_frame = Some(frame);

        let next = state.video.front().map(|f| f.time);
        Plan::Shown {
            time,
            delay: next_delay(next, clock, self.inner.video.frame_rate),
            moved: true,
        }
    }

    fn debug_overlay(
        &self,
        state: &PlayerState,
        frame: &VideoFrame,
        feedback: &AudioFeedback,
    ) -> Option<DebugOverlay> {
        if !self.inner.config.sync.show_debug {
            return None;
        }
        Some(DebugOverlay {
            frame_rate: self.inner.video.frame_rate,
            sample_rate: self.inner.source.audio().map(|a| a.sample_rate),
            audio_time: feedback.head_time,
            video_time: frame.time,
            latency: feedback.head_time.map(|head| frame.time - head),
            fetch_video_ms: state.fetch_video_ms,
            fetch_audio_ms: state.fetch_audio_ms,
            video_queue: state.video.len(),
            video_queue_bytes: state.video_queue_bytes(),
            audio_queue: feedback.buffer_length,
            audio_queue_bytes: feedback.buffer_size,
            decode_size: frame.size,
            display_size: state.layout.display_size,
        })
    }
}
