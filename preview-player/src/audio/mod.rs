//! Audio path: ring buffer, render drivers and the async sink
//!
//! The ring buffer lives on a render thread and is reachable only through
//! messages; [`AudioSink`] is the engine-side handle.

pub mod output;
pub mod ring_buffer;
pub mod sink;
pub mod types;

pub use ring_buffer::AudioRingBuffer;
pub use sink::AudioSink;
pub use types::{AudioFeedback, AudioFrame, AudioInput, AudioReply, AudioRequest, FeedbackKind};
