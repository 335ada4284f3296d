//! Producer side: sample ingestion and the recording state machine
//!
//! Everything in here runs in the acquisition context and never blocks.
//! Work per call is bounded by the chunk length plus, on a new trigger, one
//! pretrigger block of at most `pool_size` tokens.
//!
//! The state machine has two inputs:
//!
//! - `on_trigger_event`, from the external detector (directly, or through a
//!   [`TriggerLatch`] raised from another context)
//! - buffer completion, raised internally by `append`
//!
//! and one orthogonal flag, the gate, which pauses ingestion while storage
//! drains the pool in gated recording.

use crate::config::{buffers_for, Mode, RecordingSettings, Sample};
use crate::error::{PipelineError, Result};
use crate::pipeline::{PipelineStats, Shared, StatsCells};
use crate::pool::buffers::WriterCursor;
use crate::sequence::fifo::FifoWriter;
use crate::sequence::reader::Consumer;
use crate::sequence::Token;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Trigger window state, only meaningful in triggered mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// No window open, completed buffers are not queued
    Idle,
    /// A window is open
    Triggered {
        /// Fill count when the window opened
        start: u32,
        /// Last unwrapped index that still belongs to the window
        end_target: u32,
    },
}

/// Trigger flag that any context can raise
///
/// The producer consumes it at the start of its next `append` and handles
/// it as a trigger event at the tick it was raised with. Raising it again
/// before then just moves the tick.
#[derive(Clone, Default)]
pub struct TriggerLatch {
    inner: Arc<LatchInner>,
}

#[derive(Default)]
struct LatchInner {
    raised: AtomicBool,
    tick: AtomicU32,
}

impl TriggerLatch {
    /// Signal a detection at `tick`
    pub fn raise(&self, tick: u32) {
        self.inner.tick.store(tick, Ordering::Relaxed);
        self.inner.raised.store(true, Ordering::Release);
    }

    /// Whether a detection is waiting for the producer
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    fn take(&self) -> Option<u32> {
        if self.inner.raised.swap(false, Ordering::Acquire) {
            Some(self.inner.tick.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// Acquisition-side handle
pub struct Producer {
    shared: Arc<Shared>,
    fifo: FifoWriter,
    cursor: WriterCursor,
    mode: Mode,
    settings: RecordingSettings,
    staged: RecordingSettings,
    buffers_per_second: u32,
    state: TriggerState,
    gate_release_tick: Option<u32>,
    latch: TriggerLatch,
    // Tokens refused by the FIFO during the current call
    dropped: u32,
}

impl Producer {
    pub(crate) fn new(shared: Arc<Shared>, fifo: FifoWriter, settings: RecordingSettings) -> Self {
        Self {
            shared,
            fifo,
            cursor: WriterCursor::new(),
            mode: Mode::Triggered,
            settings,
            staged: settings,
            buffers_per_second: 0,
            state: TriggerState::Idle,
            gate_release_tick: None,
            latch: TriggerLatch::default(),
            dropped: 0,
        }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn is_paired_with(&self, consumer: &Consumer) -> bool {
        consumer.is_paired_with(&self.shared, &self.fifo)
    }

    pub(crate) fn staged_settings(&self) -> RecordingSettings {
        self.staged
    }

    /// Replace the recording settings
    ///
    /// `pretrigger_seconds` and `min_recording_seconds` are picked up by the
    /// next trigger event. Everything else, `gated_recording` included,
    /// waits for the next `Pipeline::reset`, since the consumer has to
    /// switch over at the same moment.
    ///
    /// # Errors
    ///
    /// `PipelineError::Config` if the settings are invalid for this pool.
    pub fn set_settings(&mut self, settings: RecordingSettings) -> Result<()> {
        settings.validate()?;
        self.shared.layout.validate(&settings)?;
        self.staged = settings;
        Ok(())
    }

    /// Called by `Pipeline::reset` after the shared counters and gate have
    /// been cleared
    pub(crate) fn reset(&mut self, mode: Mode, samples_per_second: u32, consumer: &mut Consumer) {
        self.fifo.reset(consumer.fifo_mut());
        self.settings = self.staged;
        self.mode = mode;
        self.buffers_per_second = samples_per_second / self.shared.layout.buffer_capacity as u32;
        self.cursor = WriterCursor::new();
        self.state = TriggerState::Idle;
        self.gate_release_tick = None;
        self.latch.take();
        self.dropped = 0;

        // Every gated continuous drain opens with a start token, including
        // the first one, so a full drain never reaches back into the slot
        // being written.
        if mode == Mode::Continuous && self.settings.gated_recording {
            self.push(Token::StartOfSequence);
            self.dropped = 0;
        }
    }

    /// Append samples from the hardware source
    ///
    /// Samples are copied into the active buffer; every time it fills up
    /// the buffer is completed, the recording state machine decides whether
    /// to queue it, and copying continues in the next slot. While the gate
    /// is closed the samples are dropped, including the rest of a chunk
    /// whose completion closed it.
    ///
    /// # Errors
    ///
    /// `PipelineError::SequenceOverflow` if the sequence FIFO refused any
    /// token during this call. The samples themselves were still taken.
    pub fn append(&mut self, samples: &[Sample]) -> Result<()> {
        self.dropped = 0;
        self.apply_release();
        if let Some(tick) = self.latch.take() {
            self.handle_trigger(tick);
        }

        if self.shared.gate.is_gated() {
            return self.finish_call();
        }

        let mut rest = samples;
        while !rest.is_empty() {
            let taken = self.cursor.fill(&self.shared.pool, rest);
            rest = &rest[taken..];

            if self.cursor.is_full(&self.shared.pool) {
                let index = self.shared.pool.filled().complete();
                StatsCells::bump(&self.shared.stats.buffers_completed);
                self.on_buffer_completed(index);
                self.cursor.advance(&self.shared.pool);

                if self.shared.gate.is_gated() {
                    if !rest.is_empty() {
                        trace!(dropped = rest.len(), "gate closed mid-chunk");
                    }
                    break;
                }
            }
        }

        self.finish_call()
    }

    /// Handle a detection reported at `now` (in caller ticks)
    ///
    /// # Errors
    ///
    /// `PipelineError::SequenceOverflow` if the pretrigger block did not fit
    /// in the sequence FIFO.
    pub fn on_trigger_event(&mut self, now: u32) -> Result<()> {
        self.dropped = 0;
        self.apply_release();
        self.handle_trigger(now);
        self.finish_call()
    }

    /// Latch that feeds trigger events into this producer from elsewhere
    pub fn trigger_latch(&self) -> TriggerLatch {
        self.latch.clone()
    }

    /// Whether ingestion is paused for a drain
    pub fn is_gated(&self) -> bool {
        self.shared.gate.is_gated()
    }

    /// Buffers completed since the last reset
    pub fn unwrapped_count(&self) -> u32 {
        self.shared.pool.filled().load()
    }

    /// Current trigger window
    pub fn trigger_state(&self) -> TriggerState {
        self.state
    }

    /// Recording policy in effect
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Settings in effect
    pub fn settings(&self) -> RecordingSettings {
        self.settings
    }

    /// Whole buffers filled per second at the current sample rate
    pub fn buffers_per_second(&self) -> u32 {
        self.buffers_per_second
    }

    /// Slot currently being filled
    pub fn active_slot(&self) -> usize {
        self.cursor.active_slot()
    }

    /// Samples already in the active slot
    pub fn entries_written(&self) -> usize {
        self.cursor.entries_written()
    }

    /// Tokens queued and not yet taken by the consumer
    pub fn pending_tokens(&self) -> usize {
        self.fifo.len()
    }

    /// Counters since the last reset
    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    fn finish_call(&mut self) -> Result<()> {
        match self.dropped {
            0 => Ok(()),
            dropped => Err(PipelineError::SequenceOverflow { dropped }),
        }
    }

    fn min_recording_buffers(&self) -> u32 {
        buffers_for(self.buffers_per_second, self.settings.min_recording_seconds)
    }

    fn in_cooldown(&self, now: u32) -> bool {
        match self.gate_release_tick {
            Some(released) => now.wrapping_sub(released) < self.settings.trigger_cooldown_ticks,
            None => false,
        }
    }

    fn handle_trigger(&mut self, now: u32) {
        self.settings.pretrigger_seconds = self.staged.pretrigger_seconds;
        self.settings.min_recording_seconds = self.staged.min_recording_seconds;

        // Triggers during or just after a drain are most likely the storage
        // medium's own noise.
        if self.mode != Mode::Triggered || self.shared.gate.is_gated() || self.in_cooldown(now) {
            StatsCells::bump(&self.shared.stats.triggers_ignored);
            debug!(now, mode = ?self.mode, "trigger ignored");
            return;
        }
        StatsCells::bump(&self.shared.stats.triggers_accepted);

        let count = self.unwrapped_count();
        let end_target = count.saturating_add(self.min_recording_buffers());

        match self.state {
            TriggerState::Triggered { start, end_target: current } => {
                self.state = TriggerState::Triggered {
                    start,
                    end_target: current.max(end_target),
                };
                debug!(now, count, end_target, "retrigger, window extended");
            }
            TriggerState::Idle => {
                let layout = self.shared.layout;
                let unexpired = (layout.pool_size - self.settings.buffer_delta).min(count as usize) as u32;
                let pretrigger =
                    buffers_for(self.buffers_per_second, self.settings.pretrigger_seconds).min(unexpired);

                self.push(Token::StartOfSequence);
                for index in count - pretrigger..count {
                    self.push(Token::Data(index));
                }
                self.state = TriggerState::Triggered { start: count, end_target };
                debug!(now, count, pretrigger, end_target, "trigger, window opened");
            }
        }
    }

    /// Queue (or not) the buffer that just completed
    ///
    /// When a gated window reaches the drain depth mid-window, the completed
    /// buffer is queued before the end token. The firmware queued only the
    /// end token there and lost that buffer; here the drain depth already
    /// counts it, so it still fits in the pool.
    fn on_buffer_completed(&mut self, index: u32) {
        let gated_recording = self.settings.gated_recording;

        match (self.mode, self.state) {
            (Mode::Continuous, _) => {
                self.push(Token::Data(index));
                if gated_recording && self.drain_due() {
                    self.close_gate(index);
                }
            }
            (Mode::Triggered, TriggerState::Triggered { end_target, .. }) => {
                if index > end_target {
                    self.state = TriggerState::Idle;
                    debug!(index, "trigger window closed");
                    if gated_recording {
                        self.close_gate(index);
                    } else {
                        self.push(Token::EndOfSequence);
                    }
                } else {
                    self.push(Token::Data(index));
                    if gated_recording && self.drain_due() {
                        self.close_gate(index);
                    }
                }
            }
            (Mode::Triggered, TriggerState::Idle) => {}
        }
    }

    // The pool can hold at most P-1 readable buffers, which with the leading
    // start token makes P pending entries.
    fn drain_due(&self) -> bool {
        self.fifo.len() >= self.shared.layout.pool_size
    }

    fn close_gate(&mut self, index: u32) {
        self.push(Token::EndOfSequence);
        self.shared.gate.set_gated(true);
        info!(index, pending = self.fifo.len(), "gate closed, draining pool");
    }

    fn apply_release(&mut self) {
        let Some(tick) = self.shared.gate.take_release() else {
            return;
        };
        if !self.shared.gate.is_gated() {
            debug!(tick, "release requested while not gated, ignored");
            return;
        }

        self.shared.gate.set_gated(false);
        self.gate_release_tick = Some(tick);

        match (self.mode, self.state) {
            (Mode::Continuous, _) => self.push(Token::StartOfSequence),
            (Mode::Triggered, TriggerState::Triggered { start, end_target }) => {
                // The follow-on span is at least the minimum length
                let minimum = self
                    .unwrapped_count()
                    .saturating_add(self.min_recording_buffers());
                self.state = TriggerState::Triggered {
                    start,
                    end_target: end_target.max(minimum),
                };
                self.push(Token::StartOfSequence);
            }
            (Mode::Triggered, TriggerState::Idle) => {}
        }
        info!(tick, "gate released");
    }

    fn push(&mut self, token: Token) {
        match self.fifo.put(token) {
            Ok(()) => trace!(?token, "queued"),
            Err(error) => {
                self.dropped += 1;
                StatsCells::bump(&self.shared.stats.tokens_dropped);
                warn!(?token, %error, "token dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolLayout;
    use crate::pipeline::Pipeline;
    use crate::sequence::reader::Next;

    // 4 buffers of 4 samples at 40 samples/s: 10 buffers per second
    fn pipeline(mode: Mode, settings: RecordingSettings) -> Pipeline {
        let mut pipeline = Pipeline::new(PoolLayout::new(4, 4), settings).unwrap();
        pipeline.reset(mode, 40);
        pipeline
    }

    fn fast_settings() -> RecordingSettings {
        RecordingSettings {
            pretrigger_seconds: 0.1,
            min_recording_seconds: 0.2,
            max_read_lead: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_buffers_per_second() {
        let pipeline = pipeline(Mode::Triggered, fast_settings());
        assert_eq!(pipeline.producer().buffers_per_second(), 10);
    }

    #[test]
    fn test_append_splits_across_buffers() {
        let mut pipeline = pipeline(Mode::Continuous, fast_settings());
        pipeline.append(&[1, 2, 3]).unwrap();
        pipeline.append(&[4, 5, 6, 7, 8, 9, 10, 11, 12, 13]).unwrap();

        let producer = pipeline.producer();
        assert_eq!(producer.unwrapped_count(), 3);
        assert_eq!(producer.active_slot(), 3);
        assert_eq!(producer.entries_written(), 1);
    }

    #[test]
    fn test_idle_trigger_mode_queues_nothing() {
        let mut pipeline = pipeline(Mode::Triggered, fast_settings());
        pipeline.append(&[0; 16]).unwrap();
        assert_eq!(pipeline.producer().pending_tokens(), 0);
        assert_eq!(pipeline.producer().trigger_state(), TriggerState::Idle);
    }

    #[test]
    fn test_trigger_opens_window() {
        let mut pipeline = pipeline(Mode::Triggered, fast_settings());
        pipeline.append(&[0; 8]).unwrap();
        pipeline.on_trigger_event(100).unwrap();

        // 0.1 s = 1 pretrigger buffer, 0.2 s = 2 buffers minimum
        assert_eq!(
            pipeline.producer().trigger_state(),
            TriggerState::Triggered { start: 2, end_target: 4 }
        );
        assert_eq!(pipeline.producer().pending_tokens(), 2);
        assert_eq!(pipeline.stats().triggers_accepted, 1);
    }

    #[test]
    fn test_window_closes_after_end_target() {
        let mut pipeline = pipeline(Mode::Triggered, fast_settings());
        pipeline.on_trigger_event(0).unwrap();
        // end_target = 2: buffers 0, 1 and 2 belong to the window
        pipeline.append(&[0; 12]).unwrap();

        let mut seen = Vec::new();
        while let Next::Buffer(buffer) = pipeline.get_next() {
            seen.push(buffer.index());
        }
        assert_eq!(seen, vec![0, 1, 2]);

        // Buffer 3 is past the target and closes the window
        pipeline.append(&[0; 4]).unwrap();
        assert_eq!(pipeline.producer().trigger_state(), TriggerState::Idle);
        assert!(matches!(pipeline.get_next(), Next::CloseFile));
        assert!(matches!(pipeline.get_next(), Next::Idle));
    }

    #[test]
    fn test_continuous_ignores_triggers() {
        let mut pipeline = pipeline(Mode::Continuous, fast_settings());
        pipeline.on_trigger_event(5).unwrap();
        assert_eq!(pipeline.producer().trigger_state(), TriggerState::Idle);
        assert_eq!(pipeline.stats().triggers_ignored, 1);
        assert_eq!(pipeline.producer().pending_tokens(), 0);
    }

    #[test]
    fn test_latch_is_applied_on_append() {
        let mut pipeline = pipeline(Mode::Triggered, fast_settings());
        let latch = pipeline.producer().trigger_latch();
        pipeline.append(&[0; 8]).unwrap();

        latch.raise(42);
        assert!(latch.is_raised());
        pipeline.append(&[0; 2]).unwrap();
        assert!(!latch.is_raised());
        assert!(matches!(
            pipeline.producer().trigger_state(),
            TriggerState::Triggered { start: 2, .. }
        ));
    }

    #[test]
    fn test_huge_minimum_saturates_window_end() {
        let settings = RecordingSettings {
            min_recording_seconds: 1.0e12,
            ..fast_settings()
        };
        let mut pipeline = pipeline(Mode::Triggered, settings);
        pipeline.append(&[0; 4]).unwrap();
        pipeline.on_trigger_event(0).unwrap();

        assert_eq!(
            pipeline.producer().trigger_state(),
            TriggerState::Triggered { start: 1, end_target: u32::MAX }
        );
        // The window stays open instead of wrapping shut
        pipeline.append(&[0; 8]).unwrap();
        assert!(matches!(
            pipeline.producer().trigger_state(),
            TriggerState::Triggered { .. }
        ));
    }

    #[test]
    fn test_trigger_picks_up_new_durations() {
        let mut pipeline = pipeline(Mode::Triggered, fast_settings());
        let (producer, _) = pipeline.split();
        let longer = RecordingSettings {
            min_recording_seconds: 0.5,
            gated_recording: true,
            ..fast_settings()
        };
        producer.set_settings(longer).unwrap();

        producer.on_trigger_event(0).unwrap();
        assert_eq!(
            producer.trigger_state(),
            TriggerState::Triggered { start: 0, end_target: 5 }
        );
        // Gating only switches at reset
        assert!(!producer.settings().gated_recording);

        let bad = RecordingSettings { max_read_lead: 0, ..fast_settings() };
        assert!(producer.set_settings(bad).is_err());
    }

    #[test]
    fn test_overflow_is_reported() {
        let layout = PoolLayout::new(4, 1).with_fifo_capacity(5);
        let mut pipeline = Pipeline::new(layout, fast_settings()).unwrap();
        pipeline.reset(Mode::Continuous, 10);

        pipeline.append(&[0; 5]).unwrap();
        let err = pipeline.append(&[0; 3]).unwrap_err();
        assert_eq!(err, PipelineError::SequenceOverflow { dropped: 3 });
        assert_eq!(pipeline.stats().tokens_dropped, 3);
        // Samples were still taken
        assert_eq!(pipeline.producer().unwrapped_count(), 8);
    }
}
