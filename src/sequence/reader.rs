//! Storage-side reader
//!
//! Turns the token stream into buffers to write. Stale tokens are dropped
//! here rather than trusted: a `Data` token whose slot has already been
//! reused, or that points past the fill count, is consumed and discarded.
//!
//! Outside gated recording the first buffer of a fresh sequence is held back
//! until the writer is within `max_read_lead` slots of overwriting it, so
//! storage starts a new span with one large burst instead of trickling.

use crate::config::{PoolLayout, RecordingSettings};
use crate::pipeline::{Shared, StatsCells};
use crate::pool::buffers::BufferRef;
use crate::pool::{lead, oldest_unexpired, slot_of};
use crate::sequence::fifo::{FifoReader, FifoWriter};
use crate::sequence::Token;
use std::sync::Arc;
use tracing::{trace, warn};

/// Result of one [`Consumer::get_next`] call
#[derive(Debug)]
pub enum Next<'a> {
    /// Nothing to do right now
    Idle,
    /// Write this buffer to the current span
    Buffer(BufferRef<'a>),
    /// The current span is finished, close it
    CloseFile,
}

/// Storage-side handle
pub struct Consumer {
    shared: Arc<Shared>,
    fifo: FifoReader,
    settings: RecordingSettings,
    new_sequence: bool,
}

impl Consumer {
    pub(crate) fn new(shared: Arc<Shared>, fifo: FifoReader, settings: RecordingSettings) -> Self {
        Self {
            shared,
            fifo,
            settings,
            new_sequence: false,
        }
    }

    pub(crate) fn is_paired_with(&self, shared: &Arc<Shared>, writer: &FifoWriter) -> bool {
        Arc::ptr_eq(&self.shared, shared) && writer.same_queue(&self.fifo)
    }

    pub(crate) fn fifo_mut(&mut self) -> &mut FifoReader {
        &mut self.fifo
    }

    pub(crate) fn reset(&mut self, settings: RecordingSettings) {
        self.settings = settings;
        self.new_sequence = false;
    }

    /// Next thing storage should do
    ///
    /// Never blocks. In gated recording nothing is returned until the
    /// producer has closed the gate, after which the whole drain comes out
    /// back to back.
    pub fn get_next(&mut self) -> Next<'_> {
        let shared = &*self.shared;
        if self.settings.gated_recording && !shared.gate.is_gated() {
            return Next::Idle;
        }

        let pool_size = shared.layout.pool_size;

        while let Some(token) = self.fifo.peek() {
            let index = match token {
                Token::EndOfSequence => {
                    self.fifo.get();
                    self.new_sequence = false;
                    return Next::CloseFile;
                }
                Token::StartOfSequence => {
                    self.fifo.get();
                    self.new_sequence = true;
                    continue;
                }
                Token::Data(index) => index,
            };

            let count = shared.pool.filled().load();

            if index < oldest_unexpired(count, pool_size) {
                self.fifo.get();
                StatsCells::bump(&shared.stats.expired_discarded);
                warn!(index, count, "discarding overwritten buffer");
                continue;
            }
            if index >= count {
                self.fifo.get();
                StatsCells::bump(&shared.stats.future_discarded);
                warn!(index, count, "discarding buffer past the fill count");
                continue;
            }

            if !self.settings.gated_recording && self.new_sequence {
                let lead = lead(slot_of(index, pool_size), slot_of(count, pool_size), pool_size);
                if lead >= self.settings.max_read_lead {
                    trace!(index, lead, "deferring start of sequence");
                    return Next::Idle;
                }
            }

            self.fifo.get();
            self.new_sequence = false;
            return Next::Buffer(BufferRef::new(&shared.pool, index));
        }

        Next::Idle
    }

    /// Storage has finished writing a gated drain at tick `now`
    ///
    /// The producer reopens the gate at the start of its next call. Ignored
    /// outside gated recording.
    pub fn recording_complete(&self, now: u32) {
        if self.settings.gated_recording {
            self.shared.gate.request_release(now);
        }
    }

    /// Whether gated recording is in effect
    pub fn gated_recording(&self) -> bool {
        self.settings.gated_recording
    }

    /// Whether the producer has paused ingestion for a drain
    pub fn is_gated(&self) -> bool {
        self.shared.gate.is_gated()
    }

    /// Pool layout
    pub fn layout(&self) -> PoolLayout {
        self.shared.layout
    }

    /// Tokens waiting in the sequence FIFO
    pub fn pending(&self) -> usize {
        self.fifo.len()
    }
}
