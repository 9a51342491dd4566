//! Render sink: where presented frames go
//!
//! The engine hands each presented frame to a [`RenderSink`] while it still
//! owns the frame; the sink must copy what it needs before returning.

use crate::playback::layout::OutputLayout;
use crate::playback::types::VideoFrame;
use preview_common::time::format_timestamp;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Consumer of composed frames
pub trait RenderSink: Send + Sync {
    /// Draw `frame` into the display area described by `layout`
    fn present(&self, frame: &VideoFrame, layout: &OutputLayout, overlay: Option<&DebugOverlay>);
}

/// Diagnostic text drawn over the picture
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugOverlay {
    pub frame_rate: f64,
    pub sample_rate: Option<u32>,
    /// Audio clock (seconds)
    pub audio_time: Option<f64>,
    /// Time of the frame being drawn
    pub video_time: f64,
    /// Video time minus audio clock
    pub latency: Option<f64>,
    /// Damped decode-call durations (ms)
    pub fetch_video_ms: f64,
    pub fetch_audio_ms: f64,
    pub video_queue: usize,
    pub video_queue_bytes: usize,
    pub audio_queue: usize,
    pub audio_queue_bytes: usize,
    pub decode_size: (u32, u32),
    pub display_size: (u32, u32),
}

impl fmt::Display for DebugOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FPS {:.3}", self.frame_rate)?;
        match self.sample_rate {
            Some(rate) => writeln!(f, "SPR {}", rate)?,
            None => writeln!(f, "SPR -")?,
        }
        match self.audio_time {
            Some(time) => writeln!(f, "ATi {}", format_timestamp(time))?,
            None => writeln!(f, "ATi -")?,
        }
        writeln!(f, "VTi {}", format_timestamp(self.video_time))?;
        match self.latency {
            Some(latency) => writeln!(f, "LAT {:+.3}", latency)?,
            None => writeln!(f, "LAT -")?,
        }
        writeln!(f, "FVT {:.2}ms FAT {:.2}ms", self.fetch_video_ms, self.fetch_audio_ms)?;
        writeln!(
            f,
            "VBL {} ({:.1}MiB)",
            self.video_queue,
            self.video_queue_bytes as f64 / 1_048_576.0
        )?;
        writeln!(
            f,
            "ABL {} ({:.1}KiB)",
            self.audio_queue,
            self.audio_queue_bytes as f64 / 1024.0
        )?;
        write!(
            f,
            "RES {}x{} -> {}x{}",
            self.decode_size.0, self.decode_size.1, self.display_size.0, self.display_size.1
        )
    }
}

/// Discards frames
#[derive(Debug, Default)]
pub struct NullRenderSink;

impl RenderSink for NullRenderSink {
    fn present(&self, _frame: &VideoFrame, _layout: &OutputLayout, _overlay: Option<&DebugOverlay>) {}
}

/// Logs each presented frame at trace level and the overlay at debug level
#[derive(Debug, Default)]
pub struct TraceRenderSink {
    presented: AtomicU64,
}

impl TraceRenderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames presented so far
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl RenderSink for TraceRenderSink {
    fn present(&self, frame: &VideoFrame, layout: &OutputLayout, overlay: Option<&DebugOverlay>) {
        self.presented.fetch_add(1, Ordering::Relaxed);
        trace!(
            "present frame {} at {} ({}x{} drawn {}x{} at {:?})",
            frame.position,
            format_timestamp(frame.time),
            frame.size.0,
            frame.size.1,
            layout.display_size.0,
            layout.display_size.1,
            layout.offset
        );
        if let Some(overlay) = overlay {
            debug!("overlay:\n{}", overlay);
        }
    }
}
