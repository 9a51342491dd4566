//! Render drivers hosting the [`AudioRingBuffer`]
//!
//! A driver owns the ring buffer on its own OS thread. Requests arrive over a
//! `std::sync::mpsc` channel and replies leave over a tokio unbounded channel,
//! so neither side ever blocks on the other.
//!
//! - [`RenderDriver::spawn_headless`] consumes samples at the stream rate
//!   using a quantum clock and discards the output. Used for tests and for
//!   machines without an audio device.
//! - With the `device-output` feature, [`RenderDriver::spawn_device`] plays
//!   through the default cpal output device. The cpal stream is not `Send`,
//!   so it is built and kept on the driver thread.

use crate::audio::ring_buffer::AudioRingBuffer;
use crate::audio::types::{AudioReply, AudioRequest};
use crate::error::{Error, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

/// Output channel count of the headless driver
pub const HEADLESS_CHANNELS: usize = 2;

/// Quanta the headless clock may fall behind before it resynchronises
const MAX_CLOCK_LAG_QUANTA: u32 = 4;

/// Handle to a running render thread
#[derive(Debug)]
pub struct RenderDriver {
    name: &'static str,
    thread: Option<JoinHandle<()>>,
}

impl RenderDriver {
    /// Run `ring` on a thread clocked at `sample_rate`, `quantum_frames` per tick.
    ///
    /// The thread exits once the request sender is dropped or the reply
    /// receiver is gone.
    pub fn spawn_headless(
        mut ring: AudioRingBuffer,
        sample_rate: u32,
        quantum_frames: usize,
        requests: mpsc::Receiver<AudioRequest>,
        replies: UnboundedSender<AudioReply>,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::AudioOutput("sample rate must be positive".to_string()));
        }
        let quantum = Duration::from_secs_f64(quantum_frames as f64 / f64::from(sample_rate));

        let thread = std::thread::Builder::new()
            .name("audio-headless".to_string())
            .spawn(move || {
                let mut out = vec![0.0f32; quantum_frames * HEADLESS_CHANNELS];
                let mut next_tick = Instant::now() + quantum;
                loop {
                    let now = Instant::now();
                    if now >= next_tick {
                        let outcome = ring.render(&mut out, HEADLESS_CHANNELS);
                        if let Some(kind) = outcome.reply_kind() {
                            if replies.send(ring.reply(kind)).is_err() {
                                break;
                            }
                        }
                        next_tick += quantum;
                        if now > next_tick + quantum * MAX_CLOCK_LAG_QUANTA {
                            next_tick = now + quantum;
                        }
                        continue;
                    }

                    match requests.recv_timeout(next_tick - now) {
                        Ok(request) => {
                            if replies.send(ring.handle(request)).is_err() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        info!(
            "Headless audio driver started: {} Hz, {} frames per quantum",
            sample_rate, quantum_frames
        );
        Ok(Self {
            name: "headless",
            thread: Some(thread),
        })
    }

    /// Wait for the render thread to exit.
    ///
    /// The caller must have dropped the request sender first.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("{} audio driver thread panicked", self.name);
            } else {
                debug!("{} audio driver stopped", self.name);
            }
        }
    }
}

#[cfg(feature = "device-output")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::{error, warn};

    /// How often the owning thread checks whether the stream should stop
    const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

    impl RenderDriver {
        /// Run `ring` inside a cpal output callback on the default device.
        ///
        /// The device must accept `sample_rate` with f32 samples; resampling
        /// is not attempted.
        pub fn spawn_device(
            mut ring: AudioRingBuffer,
            sample_rate: u32,
            requests: mpsc::Receiver<AudioRequest>,
            replies: UnboundedSender<AudioReply>,
        ) -> Result<Self> {
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

            let thread = std::thread::Builder::new()
                .name("audio-device".to_string())
                .spawn(move || {
                    let host = cpal::default_host();
                    let Some(device) = host.default_output_device() else {
                        let _ = ready_tx.send(Err(Error::AudioOutput(
                            "No default output device found".to_string(),
                        )));
                        return;
                    };
                    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

                    let config = match find_config(&device, sample_rate) {
                        Ok(config) => config,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let channels = usize::from(config.channels);
                    let stopped = Arc::new(AtomicBool::new(false));
                    let stopped_cb = Arc::clone(&stopped);

                    let stream = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            loop {
                                match requests.try_recv() {
                                    Ok(request) => {
                                        let _ = replies.send(ring.handle(request));
                                    }
                                    Err(mpsc::TryRecvError::Empty) => break,
                                    Err(mpsc::TryRecvError::Disconnected) => {
                                        stopped_cb.store(true, Ordering::Release);
                                        break;
                                    }
                                }
                            }
                            let outcome = ring.render(data, channels);
                            if let Some(kind) = outcome.reply_kind() {
                                let _ = replies.send(ring.reply(kind));
                            }
                        },
                        move |err| {
                            error!("Audio stream error: {}", err);
                        },
                        None,
                    );
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(Error::AudioOutput(format!(
                                "Failed to build stream: {}",
                                e
                            ))));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(Error::AudioOutput(format!(
                            "Failed to start stream: {}",
                            e
                        ))));
                        return;
                    }

                    info!("Audio device {} started at {} Hz", name, sample_rate);
                    let _ = ready_tx.send(Ok(()));
                    while !stopped.load(Ordering::Acquire) {
                        std::thread::sleep(SHUTDOWN_POLL);
                    }
                    drop(stream);
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    name: "device",
                    thread: Some(thread),
                }),
                Ok(Err(e)) => {
                    let _ = thread.join();
                    Err(e)
                }
                Err(_) => {
                    warn!("Audio device thread exited during startup");
                    Err(Error::AudioOutput("device thread exited".to_string()))
                }
            }
        }
    }

    fn find_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
        let mut supported = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

        let found = supported.find(|config| {
            config.sample_format() == SampleFormat::F32
                && config.min_sample_rate().0 <= sample_rate
                && config.max_sample_rate().0 >= sample_rate
        });
        match found {
            Some(config) => Ok(config.with_sample_rate(cpal::SampleRate(sample_rate)).config()),
            None => Err(Error::AudioOutput(format!(
                "No f32 output configuration at {} Hz",
                sample_rate
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ring_buffer::DEFAULT_VOLUME_EXPONENT;
    use crate::audio::types::{AudioFrame, AudioInput, FeedbackKind};

    #[tokio::test]
    async fn test_headless_driver_answers_and_renders() {
        let ring = AudioRingBuffer::new(1000, DEFAULT_VOLUME_EXPONENT);
        let (req_tx, req_rx) = mpsc::channel();
        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();
        let driver = RenderDriver::spawn_headless(ring, 1000, 10, req_rx, reply_tx).unwrap();

        req_tx
            .send(AudioRequest {
                id: 1,
                input: AudioInput::Frame(AudioFrame {
                    samples: vec![0.1; 20],
                    channels: 1,
                    time: 0.0,
                }),
            })
            .unwrap();
        let reply = reply_rx.recv().await.unwrap();
        assert_eq!(reply.kind, FeedbackKind::Ok { id: 1 });
        assert_eq!(reply.feedback.buffer_length, 1);

        req_tx
            .send(AudioRequest {
                id: 2,
                input: AudioInput::Play,
            })
            .unwrap();

        // Two 10-frame quanta drain the frame, then the queue runs dry
        let mut saw_underrun = false;
        while let Some(reply) = reply_rx.recv().await {
            if reply.kind == FeedbackKind::Underrun {
                assert_eq!(reply.feedback.buffer_length, 0);
                saw_underrun = true;
                break;
            }
        }
        assert!(saw_underrun);

        drop(req_tx);
        tokio::task::spawn_blocking(move || driver.join()).await.unwrap();
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let ring = AudioRingBuffer::new(0, DEFAULT_VOLUME_EXPONENT);
        let (_req_tx, req_rx) = mpsc::channel();
        let (reply_tx, _reply_rx) = tokio::sync::mpsc::unbounded_channel();
        assert!(matches!(
            RenderDriver::spawn_headless(ring, 0, 10, req_rx, reply_tx),
            Err(Error::AudioOutput(_))
        ));
    }
}
