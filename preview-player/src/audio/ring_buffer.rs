//! Audio ring buffer living inside the render context
//!
//! An ordered queue of decoded [`AudioFrame`]s consumed incrementally by the
//! render callback. It shares no memory with the engine: requests arrive as
//! [`AudioRequest`] messages and every answer is an [`AudioReply`] carrying a
//! fresh [`AudioFeedback`] snapshot.
//!
//! # Real-time constraints
//!
//! [`render`](AudioRingBuffer::render) runs on the audio thread. It never
//! allocates, locks or logs; an empty queue while playing is reported as an
//! [`FeedbackKind::Underrun`] reply and the output is filled with silence.

use crate::audio::types::{AudioFeedback, AudioFrame, AudioInput, AudioReply, AudioRequest, FeedbackKind};
use std::collections::VecDeque;

/// Default perceptual volume exponent
pub const DEFAULT_VOLUME_EXPONENT: f32 = 3.0;

/// What happened during one render quantum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOutcome {
    /// Sample frames copied to the output
    pub frames_written: usize,
    /// Queued frames fully consumed and popped
    pub frames_consumed: usize,
    /// The queue ran dry during this quantum after having had data
    pub underrun: bool,
}

impl RenderOutcome {
    /// Feedback the render context should send for this quantum, if any
    pub fn reply_kind(&self) -> Option<FeedbackKind> {
        if self.underrun {
            Some(FeedbackKind::Underrun)
        } else if self.frames_consumed > 0 {
            Some(FeedbackKind::Playing)
        } else {
            None
        }
    }
}

/// Queue of decoded audio consumed by the render callback
#[derive(Debug)]
pub struct AudioRingBuffer {
    frames: VecDeque<AudioFrame>,
    /// Sample frames of the front frame already rendered
    cursor: usize,
    playing: bool,
    /// Set once an underrun was reported; cleared when data arrives
    starved: bool,
    volume: f32,
    gain: f32,
    volume_exponent: f32,
    sample_rate: u32,
    buffered_bytes: usize,
}

impl AudioRingBuffer {
    /// Create an empty, suspended buffer for a stream at `sample_rate`
    pub fn new(sample_rate: u32, volume_exponent: f32) -> Self {
        Self {
            frames: VecDeque::new(),
            cursor: 0,
            playing: false,
            starved: false,
            volume: 1.0,
            gain: 1.0,
            volume_exponent,
            sample_rate,
            buffered_bytes: 0,
        }
    }

    /// Apply a request and build its reply
    pub fn handle(&mut self, request: AudioRequest) -> AudioReply {
        match request.input {
            AudioInput::ClearBuffer => self.clear(),
            AudioInput::Suspend => self.playing = false,
            AudioInput::Play => self.playing = true,
            AudioInput::Query => {}
            AudioInput::ShiftUntil(time) => self.shift_until(time),
            AudioInput::Frame(frame) => self.push(frame),
            AudioInput::SetVolume(value) => self.set_volume(value),
        }
        self.reply(FeedbackKind::Ok { id: request.id })
    }

    /// Build a reply of `kind` with the current snapshot
    pub fn reply(&self, kind: FeedbackKind) -> AudioReply {
        AudioReply {
            kind,
            feedback: self.feedback(),
        }
    }

    /// Current state snapshot
    pub fn feedback(&self) -> AudioFeedback {
        AudioFeedback {
            is_playing: self.playing,
            buffer_length: self.frames.len(),
            buffer_size: self.buffered_bytes,
            head_time: self.head_time(),
            tail_time: self.frames.back().map(|f| f.time),
            volume: self.volume,
        }
    }

    /// Time of the next sample to be rendered
    pub fn head_time(&self) -> Option<f64> {
        let front = self.frames.front()?;
        if self.sample_rate == 0 {
            return Some(front.time);
        }
        Some(front.time + self.cursor as f64 / f64::from(self.sample_rate))
    }

    /// Fill `out` (interleaved, `out_channels` wide) from the queue.
    ///
    /// Outputs silence while suspended. Source channels are mapped onto
    /// output channels by index; a mono source is duplicated.
    pub fn render(&mut self, out: &mut [f32], out_channels: usize) -> RenderOutcome {
        out.fill(0.0);
        let mut outcome = RenderOutcome::default();
        if !self.playing || out_channels == 0 {
            return outcome;
        }

        let wanted = out.len() / out_channels;
        while outcome.frames_written < wanted {
            let Some(front) = self.frames.front() else {
                break;
            };
            let channels = usize::from(front.channels.max(1));
            let remaining = front.frame_count().saturating_sub(self.cursor);
            let n = remaining.min(wanted - outcome.frames_written);

            for i in 0..n {
                let src = (self.cursor + i) * channels;
                let dst = (outcome.frames_written + i) * out_channels;
                for c in 0..out_channels {
                    out[dst + c] = front.samples[src + c.min(channels - 1)] * self.gain;
                }
            }
            outcome.frames_written += n;
            self.cursor += n;

            if self.cursor >= front.frame_count() {
                self.pop_front();
                outcome.frames_consumed += 1;
            }
        }

        if outcome.frames_written < wanted && !self.starved {
            self.starved = true;
            outcome.underrun = true;
        }
        outcome
    }

    fn push(&mut self, frame: AudioFrame) {
        self.buffered_bytes += frame.byte_size();
        self.frames.push_back(frame);
        self.starved = false;
    }

    fn pop_front(&mut self) {
        if let Some(frame) = self.frames.pop_front() {
            self.buffered_bytes -= frame.byte_size();
        }
        self.cursor = 0;
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.cursor = 0;
        self.buffered_bytes = 0;
        self.starved = false;
    }

    /// Drop queued frames starting before `time`; never reorders the rest
    fn shift_until(&mut self, time: f64) {
        while self.frames.front().is_some_and(|f| f.time < time) {
            self.pop_front();
        }
    }

    fn set_volume(&mut self, value: f32) {
        self.volume = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.gain = self.volume.powf(self.volume_exponent);
    }
}
