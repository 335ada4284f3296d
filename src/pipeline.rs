//! The pipeline: one buffer pool, one sequence FIFO, and the two handles
//! that drive them
//!
//! `Producer` runs in the acquisition context (DMA completion interrupt on
//! hardware, a sampling thread elsewhere). `Consumer` runs in the storage
//! context. Both hold an `Arc` to the same `Shared` block, and everything
//! in it that both sides touch is atomic.
//!
//! `Pipeline` owns both handles. Operations that need both contexts quiet,
//! such as `reset`, are only available on it, so holding `&mut Pipeline` is
//! the proof that neither side is running.

use crate::config::{Mode, PoolLayout, RecordingSettings, Sample};
use crate::error::{PipelineError, Result};
use crate::pool::buffers::BufferPool;
use crate::recording::Producer;
use crate::sequence::fifo::SequenceFifo;
use crate::sequence::reader::{Consumer, Next};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

/// State shared by the producer and the consumer
pub(crate) struct Shared {
    pub layout: PoolLayout,
    pub pool: BufferPool,
    pub gate: Gate,
    pub stats: StatsCells,
}

/// Gating flags
///
/// Only the producer sets or clears `gated`. The consumer asks for a
/// release through `request_release`; the producer applies it at the start
/// of its next call, so the FIFO keeps a single writer.
pub(crate) struct Gate {
    gated: CachePadded<AtomicBool>,
    release_requested: CachePadded<AtomicBool>,
    release_tick: AtomicU32,
}

impl Gate {
    fn new() -> Self {
        Self {
            gated: CachePadded::new(AtomicBool::new(false)),
            release_requested: CachePadded::new(AtomicBool::new(false)),
            release_tick: AtomicU32::new(0),
        }
    }

    pub fn is_gated(&self) -> bool {
        self.gated.load(Ordering::Acquire)
    }

    /// Producer only. Release makes the end token queued just before
    /// visible to a consumer that sees the gate closed.
    pub fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::Release);
    }

    /// Consumer side: storage has finished draining
    pub fn request_release(&self, tick: u32) {
        self.release_tick.store(tick, Ordering::Relaxed);
        self.release_requested.store(true, Ordering::Release);
    }

    /// Producer side: take a pending release request and its tick
    pub fn take_release(&self) -> Option<u32> {
        if self.release_requested.swap(false, Ordering::Acquire) {
            Some(self.release_tick.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    fn reset(&self) {
        self.gated.store(false, Ordering::Release);
        self.release_requested.store(false, Ordering::Release);
        self.release_tick.store(0, Ordering::Relaxed);
    }
}

/// Event counters, relaxed since they are only read for diagnostics
#[derive(Default)]
pub(crate) struct StatsCells {
    pub buffers_completed: AtomicU32,
    pub triggers_accepted: AtomicU32,
    pub triggers_ignored: AtomicU32,
    pub tokens_dropped: AtomicU32,
    pub expired_discarded: AtomicU32,
    pub future_discarded: AtomicU32,
}

impl StatsCells {
    pub fn bump(cell: &AtomicU32) {
        cell.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            buffers_completed: self.buffers_completed.load(Ordering::Relaxed),
            triggers_accepted: self.triggers_accepted.load(Ordering::Relaxed),
            triggers_ignored: self.triggers_ignored.load(Ordering::Relaxed),
            tokens_dropped: self.tokens_dropped.load(Ordering::Relaxed),
            expired_discarded: self.expired_discarded.load(Ordering::Relaxed),
            future_discarded: self.future_discarded.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for cell in [
            &self.buffers_completed,
            &self.triggers_accepted,
            &self.triggers_ignored,
            &self.tokens_dropped,
            &self.expired_discarded,
            &self.future_discarded,
        ] {
            cell.store(0, Ordering::Relaxed);
        }
    }
}

impl Shared {
    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }
}

/// Counters since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Buffers filled by the producer
    pub buffers_completed: u32,
    /// Trigger events that started or extended a window
    pub triggers_accepted: u32,
    /// Trigger events ignored because of gating, cooldown or mode
    pub triggers_ignored: u32,
    /// Tokens refused by a full sequence FIFO
    pub tokens_dropped: u32,
    /// Data tokens the consumer discarded as already overwritten
    pub expired_discarded: u32,
    /// Data tokens the consumer discarded as not yet complete
    pub future_discarded: u32,
}

/// Owner of a connected producer/consumer pair
pub struct Pipeline {
    producer: Producer,
    consumer: Consumer,
}

impl Pipeline {
    /// Build a pipeline, starting out in triggered mode with no sample rate
    ///
    /// Call [`reset`](Self::reset) with the real mode and rate before
    /// feeding samples.
    pub fn new(layout: PoolLayout, settings: RecordingSettings) -> Result<Self> {
        settings.validate()?;
        layout.validate(&settings)?;

        let shared = Arc::new(Shared {
            layout,
            pool: BufferPool::new(layout.pool_size, layout.buffer_capacity),
            gate: Gate::new(),
            stats: StatsCells::default(),
        });
        let (writer, reader) = SequenceFifo::new(layout.fifo_capacity);

        let mut pipeline = Self {
            producer: Producer::new(shared.clone(), writer, settings),
            consumer: Consumer::new(shared, reader, settings),
        };
        pipeline.reset(Mode::Triggered, 0);
        Ok(pipeline)
    }

    /// Put back together halves previously taken apart with
    /// [`into_split`](Self::into_split)
    ///
    /// # Errors
    ///
    /// `PipelineError::MismatchedHalves` if they come from different
    /// pipelines.
    pub fn join(producer: Producer, consumer: Consumer) -> Result<Self> {
        if !producer.is_paired_with(&consumer) {
            return Err(PipelineError::MismatchedHalves);
        }
        Ok(Self { producer, consumer })
    }

    /// Discard all state and start over in `mode` at the given sample rate
    ///
    /// Counters, cursors, the trigger window, the gate and the FIFO are all
    /// cleared. Sample contents are left as they are; nothing reads a slot
    /// before it has been written again.
    pub fn reset(&mut self, mode: Mode, samples_per_second: u32) {
        let shared = self.producer.shared();
        shared.pool.filled().reset();
        shared.gate.reset();
        shared.stats.reset();

        self.consumer.reset(self.producer.staged_settings());
        self.producer.reset(mode, samples_per_second, &mut self.consumer);

        info!(
            ?mode,
            samples_per_second,
            buffers_per_second = self.producer.buffers_per_second(),
            "acquisition pipeline reset"
        );
    }

    /// Replace the recording settings, see [`Producer::set_settings`]
    pub fn set_settings(&mut self, settings: RecordingSettings) -> Result<()> {
        self.producer.set_settings(settings)
    }

    /// Borrow both halves at once, for driving them from one context
    pub fn split(&mut self) -> (&mut Producer, &mut Consumer) {
        (&mut self.producer, &mut self.consumer)
    }

    /// Hand the halves to their own contexts
    pub fn into_split(self) -> (Producer, Consumer) {
        (self.producer, self.consumer)
    }

    /// Producer half
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Consumer half
    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    /// Pool layout
    pub fn layout(&self) -> PoolLayout {
        self.producer.shared().layout
    }

    /// Settings currently in effect
    pub fn settings(&self) -> RecordingSettings {
        self.producer.settings()
    }

    /// Counters since the last reset
    pub fn stats(&self) -> PipelineStats {
        self.producer.shared().stats()
    }

    /// See [`Producer::append`]
    pub fn append(&mut self, samples: &[Sample]) -> Result<()> {
        self.producer.append(samples)
    }

    /// See [`Producer::on_trigger_event`]
    pub fn on_trigger_event(&mut self, now: u32) -> Result<()> {
        self.producer.on_trigger_event(now)
    }

    /// See [`Consumer::get_next`]
    pub fn get_next(&mut self) -> Next<'_> {
        self.consumer.get_next()
    }

    /// See [`Consumer::recording_complete`]
    pub fn on_recording_complete(&mut self, now: u32) {
        self.consumer.recording_complete(now);
    }
}
