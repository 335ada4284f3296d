//! Bounded single-producer/single-consumer token queue
//!
//! The queue is split into a `FifoWriter`, owned by the acquisition
//! producer, and a `FifoReader`, owned by the storage consumer. Each side
//! keeps its own cursor; the only state both touch is the pending count.
//!
//! Ordering rule:
//!
//! - the writer stores the token, then increments the count (release)
//! - the reader loads the count (acquire), then reads the token
//! - the reader advances past a token, then decrements the count (release)
//! - the writer checks the count (acquire) before reusing a slot
//!
//! Nothing blocks. A full queue is reported to the writer instead of
//! overwriting the oldest unread token.

use crate::error::SequenceError;
use crate::sequence::Token;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    slots: Box<[AtomicU32]>,
    count: CachePadded<AtomicUsize>,
}

/// Constructor for a connected writer/reader pair
pub struct SequenceFifo;

impl SequenceFifo {
    /// Create a queue holding up to `capacity` tokens
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize) -> (FifoWriter, FifoReader) {
        assert!(capacity > 0, "FIFO capacity must be non-zero");

        let shared = Arc::new(Shared {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            count: CachePadded::new(AtomicUsize::new(0)),
        });

        (
            FifoWriter { shared: shared.clone(), next_write: 0 },
            FifoReader { shared, next_read: 0 },
        )
    }
}

/// Producer half of the sequence FIFO
pub struct FifoWriter {
    shared: Arc<Shared>,
    next_write: usize,
}

impl FifoWriter {
    /// Append a token
    ///
    /// # Errors
    ///
    /// `SequenceError::Full` if every slot still holds an unread token. The
    /// token is not queued.
    pub fn put(&mut self, token: Token) -> Result<(), SequenceError> {
        let capacity = self.shared.slots.len();
        if self.shared.count.load(Ordering::Acquire) >= capacity {
            return Err(SequenceError::Full { capacity });
        }

        self.shared.slots[self.next_write].store(token.encode(), Ordering::Relaxed);
        self.next_write = wrap_next(self.next_write, capacity);
        self.shared.count.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Tokens queued but not yet taken by the reader
    pub fn len(&self) -> usize {
        self.shared.count.load(Ordering::Acquire)
    }

    /// True when the reader has taken everything
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of pending tokens
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    pub(crate) fn same_queue(&self, reader: &FifoReader) -> bool {
        Arc::ptr_eq(&self.shared, &reader.shared)
    }

    /// Empty the queue. Caller must hold both halves exclusively.
    pub(crate) fn reset(&mut self, reader: &mut FifoReader) {
        self.next_write = 0;
        reader.next_read = 0;
        self.shared.count.store(0, Ordering::Release);
    }
}

/// Consumer half of the sequence FIFO
pub struct FifoReader {
    shared: Arc<Shared>,
    next_read: usize,
}

impl FifoReader {
    /// Look at the oldest token without taking it
    pub fn peek(&self) -> Option<Token> {
        if self.shared.count.load(Ordering::Acquire) > 0 {
            Some(Token::decode(self.shared.slots[self.next_read].load(Ordering::Relaxed)))
        } else {
            None
        }
    }

    /// Take the oldest token
    pub fn get(&mut self) -> Option<Token> {
        let token = self.peek()?;
        self.next_read = wrap_next(self.next_read, self.shared.slots.len());
        self.shared.count.fetch_sub(1, Ordering::Release);
        Some(token)
    }

    /// Tokens waiting to be read
    pub fn len(&self) -> usize {
        self.shared.count.load(Ordering::Acquire)
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn wrap_next(i: usize, modulo: usize) -> usize {
    let next = i + 1;
    if next >= modulo {
        0
    } else {
        next
    }
}
