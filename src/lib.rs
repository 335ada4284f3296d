//! Acquisition Pool - a fixed buffer pool and recording-sequence pipeline
//! for continuous sample acquisition.
//!
//! # Overview
//!
//! A hardware source (DMA on the device, a sampling thread elsewhere) pushes
//! samples into a ring of equal-sized buffers. Storage, running in a slower
//! context, writes some of those buffers out. The two sides never block each
//! other and share nothing but atomics:
//!
//! 1. A pool of `P` buffers of `C` samples, aged by a monotonic fill counter
//! 2. A bounded single-producer/single-consumer FIFO of recording tokens
//!    (`Start`, buffer index, `End`) describing what storage should write
//!
//! # Key Features
//!
//! - Continuous mode, queueing every buffer
//! - Triggered mode with a pretrigger block and a minimum recording length
//! - Gated recording: acquisition pauses while storage drains the pool,
//!   for storage media too noisy to run during acquisition
//! - Stale references are detected and dropped, never written
//! - Split producer/consumer handles that can live on different threads
//! - A background recorder driving any [`SpanWriter`]
//!
//! # Usage
//!
//! 1. Build a [`Pipeline`] from a [`PoolLayout`] and [`RecordingSettings`]
//! 2. `reset` it with the recording [`Mode`] and the sample rate
//! 3. Feed samples with `append`, trigger events with `on_trigger_event`
//! 4. Drain with `get_next`, or hand the consumer to a [`Recorder`]
//!
//! See the `demos` directory for a full example.

#![deny(missing_docs)]

mod config;
mod error;
pub mod pool;
pub mod sequence;
mod pipeline;
mod recording;
mod recorder;

pub use config::{buffers_for, Mode, PoolLayout, RecordingSettings, Sample};
pub use error::{ConfigError, PipelineError, Result, SequenceError};
pub use pipeline::{Pipeline, PipelineStats};
pub use pool::buffers::BufferRef;
pub use pool::slot_of;
pub use recorder::{
    spawn_recorder, PollOutcome, RawSampleFiles, Recorder, RecorderConfig, RecorderError,
    RecorderHandle, SpanWriter,
};
pub use recording::{Producer, TriggerLatch, TriggerState};
pub use sequence::fifo::{FifoReader, FifoWriter, SequenceFifo};
pub use sequence::reader::{Consumer, Next};
pub use sequence::Token;

use once_cell::sync::Lazy;
use std::time::Instant;

/// Length of one main tick in milliseconds
pub const TICK_MS: u64 = 20;

/// Process-wide epoch that ticks are counted from
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Current main tick
///
/// Ticks count [`TICK_MS`] periods since first use and wrap after about
/// two and a half years. This is the clock the background recorder reports
/// gate releases with; feed the same clock to `on_trigger_event` so the
/// cooldown is measured consistently.
pub fn main_tick() -> u32 {
    (EPOCH.elapsed().as_millis() / TICK_MS as u128) as u32
}
