//! Messages crossing the boundary between the engine and the render context

/// A block of decoded audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Channels interleaved in `samples`
    pub channels: u16,

    /// Presentation time of the first sample (seconds)
    pub time: f64,
}

impl AudioFrame {
    /// Number of sample frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Duration at `sample_rate`
    pub fn duration(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(sample_rate)
    }

    /// Size of the sample data in bytes
    pub fn byte_size(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

/// Requests understood by the ring buffer
#[derive(Debug, Clone, PartialEq)]
pub enum AudioInput {
    /// Drop every queued frame and reset the playhead
    ClearBuffer,
    /// Stop consuming samples
    Suspend,
    /// Start consuming samples
    Play,
    /// Feedback refresh only
    Query,
    /// Drop queued frames whose time is before the given time
    ShiftUntil(f64),
    /// Enqueue a frame
    Frame(AudioFrame),
    /// Linear volume in [0, 1]; shaped inside the render context
    SetVolume(f32),
}

impl AudioInput {
    /// Short name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            AudioInput::ClearBuffer => "clear_buffer",
            AudioInput::Suspend => "suspend",
            AudioInput::Play => "play",
            AudioInput::Query => "query",
            AudioInput::ShiftUntil(_) => "shift_until",
            AudioInput::Frame(_) => "frame",
            AudioInput::SetVolume(_) => "set_volume",
        }
    }
}

/// A request tagged with the id its reply will echo
#[derive(Debug, Clone, PartialEq)]
pub struct AudioRequest {
    pub id: u64,
    pub input: AudioInput,
}

/// Snapshot of ring buffer state; the only view the engine gets
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFeedback {
    pub is_playing: bool,
    /// Queued frames
    pub buffer_length: usize,
    /// Queued sample bytes
    pub buffer_size: usize,
    /// Time of the next sample to be rendered
    pub head_time: Option<f64>,
    /// Start time of the last queued frame
    pub tail_time: Option<f64>,
    /// Linear (unshaped) volume
    pub volume: f32,
}

impl AudioFeedback {
    /// Seconds of audio between head and the start of the last frame
    pub fn buffered_seconds(&self) -> f64 {
        match (self.head_time, self.tail_time) {
            (Some(head), Some(tail)) => (tail - head).max(0.0),
            _ => 0.0,
        }
    }
}

/// Why the render context sent feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    /// Reply to the request with this id
    Ok { id: u64 },
    /// A queued frame was fully consumed
    Playing,
    /// The queue ran dry while playing
    Underrun,
}

/// Feedback message sent from the render context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioReply {
    pub kind: FeedbackKind,
    pub feedback: AudioFeedback,
}
