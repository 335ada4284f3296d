//! Buffer storage and the producer's writer cursor
//!
//! The pool is one contiguous allocation of `pool_size * buffer_capacity`
//! samples, sliced into equal buffers. Nothing is ever reallocated or moved;
//! a slot is only overwritten in place once the fill counter has moved far
//! enough that its previous content counts as expired.
//!
//! Samples are stored as relaxed atomics. On the targets we care about these
//! compile to plain loads and stores, and they make a read that races with
//! the producer reusing a slot well-defined: the reader gets a torn copy and
//! notices afterwards through the fill counter, instead of undefined
//! behaviour.

use crate::config::Sample;
use crate::error::{PipelineError, Result};
use crate::pool::{oldest_unexpired, slot_of, FillCounter};
use std::sync::atomic::{fence, AtomicI16, Ordering};

/// Fixed ring of sample buffers plus the fill counter that ages them
pub(crate) struct BufferPool {
    samples: Box<[AtomicI16]>,
    pool_size: usize,
    capacity: usize,
    filled: FillCounter,
}

impl BufferPool {
    /// Allocate `pool_size` buffers of `capacity` samples each
    pub fn new(pool_size: usize, capacity: usize) -> Self {
        let samples = (0..pool_size * capacity)
            .map(|_| AtomicI16::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            samples,
            pool_size,
            capacity,
            filled: FillCounter::new(),
        }
    }

    pub fn filled(&self) -> &FillCounter {
        &self.filled
    }

    fn slot(&self, slot: usize) -> &[AtomicI16] {
        let start = slot * self.capacity;
        &self.samples[start..start + self.capacity]
    }
}

/// Which slot the producer is filling and how far it has got
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WriterCursor {
    active_slot: usize,
    entries_written: usize,
}

impl WriterCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_slot(&self) -> usize {
        self.active_slot
    }

    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    /// Copy as many samples as fit into the active slot
    ///
    /// Returns how many samples were taken from the front of `samples`.
    pub fn fill(&mut self, pool: &BufferPool, samples: &[Sample]) -> usize {
        let free = pool.capacity - self.entries_written;
        let taken = free.min(samples.len());
        let dest = &pool.slot(self.active_slot)[self.entries_written..self.entries_written + taken];

        for (cell, &sample) in dest.iter().zip(&samples[..taken]) {
            cell.store(sample, Ordering::Relaxed);
        }

        self.entries_written += taken;
        taken
    }

    pub fn is_full(&self, pool: &BufferPool) -> bool {
        self.entries_written >= pool.capacity
    }

    /// Move on to the next physical slot
    pub fn advance(&mut self, pool: &BufferPool) {
        self.active_slot += 1;
        if self.active_slot >= pool.pool_size {
            self.active_slot = 0;
        }
        self.entries_written = 0;
    }
}

/// A completed buffer released to the storage side
///
/// The reference stays valid only until the producer laps the pool, so the
/// samples are copied out with [`BufferRef::copy_to`], which re-checks the
/// fill counter afterwards and reports a buffer that was overwritten during
/// the copy.
pub struct BufferRef<'a> {
    pool: &'a BufferPool,
    index: u32,
}

impl<'a> BufferRef<'a> {
    pub(crate) fn new(pool: &'a BufferPool, index: u32) -> Self {
        Self { pool, index }
    }

    /// Unwrapped index of this buffer
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Physical slot the buffer lives in
    pub fn slot(&self) -> usize {
        slot_of(self.index, self.pool.pool_size)
    }

    /// Number of samples in the buffer (always the full capacity)
    pub fn len(&self) -> usize {
        self.pool.capacity
    }

    /// Always false, completed buffers are full
    pub fn is_empty(&self) -> bool {
        self.pool.capacity == 0
    }

    /// Whether the slot still holds this buffer's samples
    pub fn is_intact(&self) -> bool {
        self.index >= oldest_unexpired(self.pool.filled.load(), self.pool.pool_size)
    }

    /// Copy the buffer's samples into `out`
    ///
    /// # Errors
    ///
    /// `PipelineError::Expired` if the producer started reusing the slot
    /// before the copy finished. `out` then holds a mix of old and new
    /// samples and must be discarded.
    ///
    /// # Panics
    ///
    /// Panics if `out` is not exactly [`len`](Self::len) samples long.
    pub fn copy_to(&self, out: &mut [Sample]) -> Result<()> {
        assert_eq!(out.len(), self.len(), "output must hold exactly one buffer");

        for (dst, src) in out.iter_mut().zip(self.pool.slot(self.slot())) {
            *dst = src.load(Ordering::Relaxed);
        }

        // Pairs with the fence in FillCounter::complete: if any sample above
        // came from the next lap, the counter read below has moved on too.
        fence(Ordering::Acquire);

        if self.is_intact() {
            Ok(())
        } else {
            Err(PipelineError::Expired { index: self.index })
        }
    }

    /// Copy the buffer into a new vector
    pub fn to_vec(&self) -> Result<Vec<Sample>> {
        let mut out = vec![0; self.len()];
        self.copy_to(&mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for BufferRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferRef")
            .field("index", &self.index)
            .field("slot", &self.slot())
            .finish()
    }
}
