//! Triggered recording example for the acquisition pool
//!
//! This example demonstrates:
//! 1. Building a pipeline for triggered recording
//! 2. Handing the consumer to a background recorder writing raw sample files
//! 3. Feeding simulated ADC samples from the acquisition loop
//! 4. Raising triggers through a latch when the signal crosses a threshold
//!
//! The simulated signal is low-level noise with two loud bursts. Each burst
//! produces one output file holding a short pretrigger history and at least
//! half a second of signal. Files go to a temporary directory which is
//! removed at the end.

use acquisition_pool::{
    main_tick, spawn_recorder, Mode, Pipeline, PoolLayout, RawSampleFiles, Recorder,
    RecorderConfig, RecordingSettings, Sample,
};
use std::thread;
use std::time::Duration;

const SAMPLE_RATE: u32 = 48_000;
const CHUNK: usize = 256;
const THRESHOLD: Sample = 8_000;

fn main() {
    let layout = PoolLayout::new(16, 1024);
    let settings = RecordingSettings {
        pretrigger_seconds: 0.25,
        min_recording_seconds: 0.5,
        ..Default::default()
    };

    let mut pipeline = Pipeline::new(layout, settings).expect("valid pipeline configuration");
    pipeline.reset(Mode::Triggered, SAMPLE_RATE);
    println!(
        "{} buffers of {} samples, {} buffers per second",
        layout.pool_size,
        layout.buffer_capacity,
        pipeline.producer().buffers_per_second()
    );

    let out_dir = std::env::temp_dir().join("acquisition_pool_demo");
    std::fs::create_dir_all(&out_dir).expect("create output directory");

    let (mut producer, consumer) = pipeline.into_split();
    let recorder = Recorder::new(
        consumer,
        RawSampleFiles::new(&out_dir, "burst"),
        RecorderConfig::default(),
    );
    let handle = spawn_recorder(recorder).expect("spawn recorder thread");
    let latch = producer.trigger_latch();

    // Three seconds of signal with bursts at 1.0 s and 2.0 s
    let total = SAMPLE_RATE as usize * 3;
    let chunk_time = Duration::from_micros(CHUNK as u64 * 1_000_000 / SAMPLE_RATE as u64);
    let mut noise: u32 = 0x1234_5678;
    let mut position = 0;

    while position < total {
        let chunk: Vec<Sample> = (position..position + CHUNK)
            .map(|n| {
                // xorshift noise, about +-500
                noise ^= noise << 13;
                noise ^= noise >> 17;
                noise ^= noise << 5;
                let floor = (noise % 1000) as i32 - 500;

                let t = n as f32 / SAMPLE_RATE as f32;
                let burst = [1.0f32, 2.0].iter().any(|start| (*start..start + 0.1).contains(&t));
                let tone = if burst {
                    (t * 2.0 * std::f32::consts::PI * 1_000.0).sin() * 20_000.0
                } else {
                    0.0
                };
                (floor + tone as i32).clamp(Sample::MIN as i32, Sample::MAX as i32) as Sample
            })
            .collect();

        // On the device detection runs in its own interrupt; here it shares
        // the loop and goes through the latch the same way
        if chunk.iter().any(|s| s.saturating_abs() > THRESHOLD) {
            latch.raise(main_tick());
        }

        if let Err(e) = producer.append(&chunk) {
            eprintln!("Acquisition error: {}", e);
        }

        position += CHUNK;
        thread::sleep(chunk_time);
    }

    // Let the last window close and drain
    thread::sleep(Duration::from_millis(600));
    let stats = producer.stats();

    let recorder = handle.stop().expect("recorder stopped cleanly");
    println!(
        "{} buffers completed, {} triggers accepted, {} spans written",
        stats.buffers_completed,
        stats.triggers_accepted,
        recorder.spans_opened()
    );
    for path in recorder.writer().paths() {
        let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("  {:?}: {} samples", path, bytes / 2);
    }

    std::fs::remove_dir_all(&out_dir).ok();
}
