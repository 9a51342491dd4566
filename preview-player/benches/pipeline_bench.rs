//! Pipeline hot-path benchmarks
//!
//! Measures frame pool lease/return and the audio render quantum, the two
//! operations that run once per video frame and once per audio callback.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use preview_player::audio::ring_buffer::DEFAULT_VOLUME_EXPONENT;
use preview_player::audio::{AudioFrame, AudioInput, AudioRequest, AudioRingBuffer};
use preview_player::playback::presenter::{frames_to_drop, next_delay};
use preview_player::playback::FramePool;

const RATE: u32 = 48_000;

fn bench_frame_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_pool");

    group.bench_function("allocate_release_720p", |b| {
        let pool = FramePool::new(12, 1280 * 720 * 4);
        b.iter(|| {
            let buffer = pool.allocate(black_box(1280 * 720 * 4)).unwrap();
            black_box(buffer.len());
        });
    });

    group.bench_function("fill_and_drain", |b| {
        let pool = FramePool::new(12, 320 * 180 * 4);
        b.iter(|| {
            let leased: Vec<_> = (0..12).map(|_| pool.allocate(320 * 180 * 4).unwrap()).collect();
            black_box(leased.len());
        });
    });

    group.finish();
}

fn bench_audio_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_render");

    group.bench_function("render_quantum_512", |b| {
        let mut ring = AudioRingBuffer::new(RATE, DEFAULT_VOLUME_EXPONENT);
        ring.handle(AudioRequest {
            id: 1,
            input: AudioInput::Play,
        });
        let mut out = vec![0.0f32; 512 * 2];
        let mut time = 0.0;
        let mut id = 2;

        b.iter(|| {
            if ring.feedback().buffer_length < 4 {
                ring.handle(AudioRequest {
                    id,
                    input: AudioInput::Frame(AudioFrame {
                        samples: vec![0.25; 1024 * 2],
                        channels: 2,
                        time,
                    }),
                });
                id += 1;
                time += 1024.0 / f64::from(RATE);
            }
            let outcome = ring.render(black_box(&mut out), 2);
            black_box(outcome);
        });
    });

    group.finish();
}

fn bench_presenter(c: &mut Criterion) {
    let queue: Vec<f64> = (0..8).map(|i| 10.0 + f64::from(i) * 0.04).collect();

    c.bench_function("select_frame", |b| {
        b.iter(|| {
            let dropped = frames_to_drop(queue.iter().copied(), black_box(10.1));
            black_box(next_delay(queue.get(dropped + 1).copied(), 10.1, 25.0))
        });
    });
}

criterion_group!(benches, bench_frame_pool, bench_audio_render, bench_presenter);
criterion_main!(benches);
