//! Audio stream selection, output size and volume

use super::core::PlaybackEngine;
use crate::audio::AudioSink;
use crate::error::{Error, Result};
use crate::playback::layout::{fit_output_size, frame_bytes, OutputLayout};
use crate::playback::types::SeekRequest;
use preview_common::events::PlayerEvent;
use preview_common::sync::TaskOutcome;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

impl PlaybackEngine {
    /// Switch to audio stream `index` and resume at the current position.
    ///
    /// The audio sink is recreated when the new stream's sample rate
    /// differs; the volume carries over.
    pub async fn set_audio_stream(&self, index: usize) -> Result<()> {
        if self.inner.source.audio().is_some_and(|a| a.index == index) {
            debug!("Audio stream {} already selected", index);
            return Ok(());
        }
        if self.is_playing() {
            self.stop().await?;
        }

        let (position, switched) = {
            let _guard = self.inner.mutex.acquire().await;
            if self.is_closed() {
                return Err(Error::Closed);
            }
            let previous_stream = self.inner.source.audio().map(|a| a.index);
            let status = self.inner.source.open_audio(index).await?;
            let switched = self.replace_sink(status.sample_rate).await;
            if switched.is_err() {
                if let Some(stream) = previous_stream {
                    self.inner.source.open_audio(stream).await?;
                }
            }
            self.clear_cache().await?;
            (self.position(), switched)
        };

        match &switched {
            Ok(()) => info!("Switched to audio stream {}", index),
            Err(e) => warn!("Audio stream {} unusable, keeping the current one: {}", index, e),
        }
        self.inner.seek_task.request(SeekRequest::forced(position)).await?;
        switched
    }

    /// Swap in a sink at `sample_rate` unless the current one already runs
    /// at it. The current sink stays in place if the new one fails to open.
    async fn replace_sink(&self, sample_rate: u32) -> Result<()> {
        let previous = self.audio();
        if sample_rate == previous.sample_rate() {
            return Ok(());
        }
        let sink = Arc::new(AudioSink::open(
            sample_rate,
            &self.inner.config,
            self.inner.events.clone(),
        )?);
        if let Err(e) = sink.set_volume(previous.volume()).await {
            sink.close().await;
            return Err(e);
        }
        *self
            .inner
            .audio
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = sink;
        previous.close().await;
        info!(
            "Audio sink recreated: {} Hz -> {} Hz",
            previous.sample_rate(),
            sample_rate
        );
        Ok(())
    }

    /// Fit the picture into a `width` x `height` display area and decode
    /// at the resulting size (subject to the frame-size limit)
    pub fn set_display_size(
        &self,
        width: u32,
        height: u32,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send + 'static {
        let video = &self.inner.video;
        let layout = fit_output_size(
            (width, height),
            video.size,
            video.sample_aspect_ratio,
            self.inner.config.video.limit_frame_size_mib,
        );
        debug!("Display {}x{} -> layout {:?}", width, height, layout);
        self.lock_state().layout = layout;
        self.request_present();
        self.resize(layout.decode_size.0, layout.decode_size.1)
    }

    /// Change the decoded frame size.
    ///
    /// Coalesces like seeks; a size equal to the current output is a no-op.
    pub fn resize(
        &self,
        width: u32,
        height: u32,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send + 'static {
        self.inner.resize_task.request((width, height))
    }

    /// Set the linear volume in [0, 1]
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.audio().set_volume(volume).await
    }

    pub fn volume(&self) -> f32 {
        self.audio().volume()
    }

    /// Resize executor
    pub(super) async fn run_resize(&self, size: (u32, u32), token: CancellationToken) -> Result<()> {
        let (width, height) = size;
        if width == 0 || height == 0 {
            return Err(Error::InvalidState(format!(
                "invalid output size {}x{}",
                width, height
            )));
        }
        if self.inner.source.output_size() == size {
            debug!("Output already {}x{}", width, height);
            return Ok(());
        }

        // Read under the mutex: decode-ahead may move it once released
        let position = {
            let _guard = self.inner.mutex.acquire().await;
            if token.is_cancelled() {
                return Ok(());
            }
            if self.is_closed() {
                return Err(Error::Closed);
            }
            self.clear_cache().await?;
            self.inner.source.set_video_size(width, height).await?;
            self.inner
                .pool
                .reserve(self.inner.config.pool_capacity(), frame_bytes(size))?;
            let mut state = self.lock_state();
            if state.layout.decode_size != size {
                state.layout = OutputLayout {
                    decode_size: size,
                    ..state.layout
                };
            }
            state.position
        };

        info!("Output size changed to {}x{}", width, height);
        self.inner.events.emit(PlayerEvent::Resized { width, height });

        if self.is_playing() {
            self.ensure_decoding();
        } else {
            // Registered on call; the outcome is reported by the seek itself
            drop(
                self.inner
                    .seek_task
                    .request(SeekRequest::forced(position)),
            );
        }
        Ok(())
    }
}
