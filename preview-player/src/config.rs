//! Configuration for the preview player
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--log-level`)
//! 2. Explicit `--config` file
//! 3. File named by the `PREVIEW_PLAYER_CONFIG` environment variable
//! 4. Platform config file (`<config_dir>/preview-player/config.toml`)
//! 5. Built-in defaults (code constants)
//!
//! Every field is optional in the TOML file; missing values take the
//! built-in default.

use crate::error::{Error, Result};
use preview_common::config::{load, resolve_config_source, ConfigSource};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "PREVIEW_PLAYER_CONFIG";

/// Application name used for the platform config directory
pub const APP_NAME: &str = "preview-player";

/// Complete player configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub buffering: BufferingConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Decode-ahead targets
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferingConfig {
    /// Video queue length the decode-ahead loop aims for
    pub video_frames: usize,

    /// Seconds of buffered audio the decode-ahead loop aims for
    pub audio_seconds: f64,

    /// Time budget handed to each `decode_automatic` call
    pub decode_budget_ms: u64,

    /// Pause before retrying when the decode mutex was busy
    pub busy_retry_ms: u64,

    /// Pool slots beyond the video target (last displayed frame, in-flight decode)
    pub pool_reserve: usize,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            video_frames: 8,
            audio_seconds: 0.2,
            decode_budget_ms: 10,
            busy_retry_ms: 2,
            pool_reserve: 4,
        }
    }
}

/// Which render driver feeds the audio ring buffer
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackend {
    /// Dedicated thread consuming samples at the stream rate; output discarded
    #[default]
    Headless,
    /// Default output device through cpal (feature `device-output`)
    Device,
}

/// Audio sink settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Round-trip timeout for a request to the render context
    pub request_timeout_ms: u64,

    /// Volume is applied as `volume.powf(volume_exponent)`
    pub volume_exponent: f32,

    /// Frames rendered per quantum by the headless driver
    pub quantum_frames: usize,

    pub backend: AudioBackend,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 1000,
            volume_exponent: 3.0,
            quantum_frames: 512,
            backend: AudioBackend::Headless,
        }
    }
}

/// Video decode settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    pub use_hwaccel: bool,

    /// Cap on decoded frame size in MiB (RGBA); 0 disables the cap
    pub limit_frame_size_mib: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            use_hwaccel: false,
            limit_frame_size_mib: 3.0,
        }
    }
}

/// Synchronisation and seek behaviour
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Log a warning when a mutex wait exceeds this; 0 disables
    pub mutex_stall_warning_ms: u64,

    /// Backward retries when a precise seek yields no frame
    pub seek_retry_attempts: u32,

    /// Seconds to step back per retry when no keyframe is known
    pub seek_retry_step: f64,

    /// Hand a debug overlay to the render sink
    pub show_debug: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mutex_stall_warning_ms: 1000,
            seek_retry_attempts: 3,
            seek_retry_step: 1.0,
            show_debug: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Resolve the config file and load it, then validate
    pub fn load(cli_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let source = resolve_config_source(cli_path, CONFIG_ENV_VAR, APP_NAME)?;
        let config: PlayerConfig = load(&source)?;
        config.validate()?;
        Ok((config, source))
    }

    /// Check every value is within its supported range
    pub fn validate(&self) -> Result<()> {
        let b = &self.buffering;
        if !(0.1..=10.0).contains(&b.audio_seconds) {
            return Err(Error::Config(format!(
                "buffering.audio_seconds must be within [0.1, 10], got {}",
                b.audio_seconds
            )));
        }
        if b.video_frames == 0 {
            return Err(Error::Config(
                "buffering.video_frames must be at least 1".to_string(),
            ));
        }
        if b.pool_reserve < 2 {
            return Err(Error::Config(format!(
                "buffering.pool_reserve must be at least 2, got {}",
                b.pool_reserve
            )));
        }
        if b.decode_budget_ms == 0 {
            return Err(Error::Config(
                "buffering.decode_budget_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=20.0).contains(&self.video.limit_frame_size_mib) {
            return Err(Error::Config(format!(
                "video.limit_frame_size_mib must be within [0, 20], got {}",
                self.video.limit_frame_size_mib
            )));
        }
        if !(self.audio.volume_exponent > 0.0) {
            return Err(Error::Config(format!(
                "audio.volume_exponent must be positive, got {}",
                self.audio.volume_exponent
            )));
        }
        if self.audio.quantum_frames == 0 {
            return Err(Error::Config(
                "audio.quantum_frames must be positive".to_string(),
            ));
        }
        if self.sync.seek_retry_attempts > 10 {
            return Err(Error::Config(format!(
                "sync.seek_retry_attempts must be at most 10, got {}",
                self.sync.seek_retry_attempts
            )));
        }
        if !(self.sync.seek_retry_step > 0.0) {
            return Err(Error::Config(format!(
                "sync.seek_retry_step must be positive, got {}",
                self.sync.seek_retry_step
            )));
        }
        Ok(())
    }

    /// Total number of frame pool slots
    pub fn pool_capacity(&self) -> usize {
        self.buffering.video_frames + self.buffering.pool_reserve
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.audio.request_timeout_ms)
    }

    pub fn decode_budget(&self) -> Duration {
        Duration::from_millis(self.buffering.decode_budget_ms)
    }

    pub fn busy_retry(&self) -> Duration {
        Duration::from_millis(self.buffering.busy_retry_ms)
    }

    pub fn mutex_stall_warning(&self) -> Duration {
        Duration::from_millis(self.sync.mutex_stall_warning_ms)
    }
}
