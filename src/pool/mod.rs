//! Sample buffer pool shared between the acquisition producer and the
//! storage consumer
//!
//! This module provides the pieces both sides agree on:
//!
//! - `slot_of` translating an unwrapped buffer index into a physical slot
//! - `FillCounter`, the monotonic count of completed buffers
//! - the buffer storage itself and the producer's writer cursor (in `buffers`)
//!
//! Buffers are identified by their unwrapped index, the value of the fill
//! counter when they became full. The index never wraps back, so the
//! consumer can always tell whether the physical slot behind a reference
//! has since been reused.

pub mod buffers;

use crossbeam_utils::CachePadded;
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Physical slot holding the buffer with the given unwrapped index
#[inline]
pub fn slot_of(unwrapped_index: u32, pool_size: usize) -> usize {
    unwrapped_index as usize % pool_size
}

/// Number of slots the read position is ahead of the write position
///
/// Ranges over `1..=pool_size`; a read slot equal to the write slot is a
/// full lap ahead.
#[inline]
pub fn lead(read_slot: usize, write_slot: usize, pool_size: usize) -> usize {
    if read_slot > write_slot {
        read_slot - write_slot
    } else {
        read_slot + pool_size - write_slot
    }
}

/// Oldest unwrapped index whose slot has not been reused, given the current
/// fill count
///
/// The slot at `count % pool_size` is the one being written, so the buffer
/// that previously lived there is already gone.
#[inline]
pub fn oldest_unexpired(count: u32, pool_size: usize) -> u32 {
    count.saturating_add(1).saturating_sub(pool_size as u32)
}

/// Monotonic count of completed buffers, written by the producer only
pub(crate) struct FillCounter {
    value: CachePadded<AtomicU32>,
}

impl FillCounter {
    pub fn new() -> Self {
        Self {
            value: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Current count. Acquire pairs with `complete` so that the samples of
    /// every buffer below the count are visible.
    pub fn load(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Mark one more buffer complete and return its unwrapped index
    ///
    /// The trailing release fence keeps the next slot's sample writes from
    /// becoming visible before the new count, which is what lets a reader
    /// detect that a slot it was copying got reused.
    pub fn complete(&self) -> u32 {
        let index = self.value.fetch_add(1, Ordering::Release);
        fence(Ordering::Release);
        index
    }

    /// Back to zero. Only valid while neither side is running.
    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }
}
