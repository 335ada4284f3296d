//! Error types for the acquisition pipeline
//!
//! The producer path has no I/O, so almost nothing here is fatal. Errors
//! exist for three reasons:
//!
//! - rejecting a pool layout or recording settings that cannot work
//! - surfacing a sequence FIFO that was too small for the configured bounds
//!   instead of silently overwriting unread tokens
//! - telling the storage side that a buffer it was copying got overwritten

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Invalid pool layout or recording settings
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Pool must hold more buffers than the pretrigger safety margin
    #[error("pool size {pool_size} must be greater than buffer delta {buffer_delta}")]
    PoolTooSmall {
        /// Configured number of buffers
        pool_size: usize,
        /// Configured safety margin
        buffer_delta: usize,
    },

    /// Buffers must hold at least one sample
    #[error("buffer capacity must be non-zero")]
    ZeroCapacity,

    /// The FIFO cannot even hold one full gated drain
    #[error("sequence FIFO capacity {fifo_capacity} must be at least {minimum}")]
    FifoTooSmall {
        /// Configured FIFO capacity
        fifo_capacity: usize,
        /// Smallest usable capacity for this pool
        minimum: usize,
    },

    /// A duration setting is negative or not finite
    #[error("{name} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration {
        /// Setting name
        name: &'static str,
        /// Rejected value
        value: f32,
    },

    /// The writer is always at least one slot behind a readable buffer, so
    /// a read lead below 2 would never release the start of a sequence
    #[error("max read lead must be at least 2 (got {max_read_lead})")]
    ReadLeadTooSmall {
        /// Rejected value
        max_read_lead: usize,
    },
}

/// Errors raised by the sequence FIFO
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceError {
    /// Every slot holds an unread token
    #[error("sequence FIFO is full ({capacity} pending tokens)")]
    Full {
        /// FIFO capacity
        capacity: usize,
    },
}

/// Top-level pipeline error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Layout or settings were rejected
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Tokens were dropped because the sequence FIFO was full
    #[error("sequence FIFO overflowed, {dropped} token(s) dropped")]
    SequenceOverflow {
        /// Tokens dropped during the call that reported the error
        dropped: u32,
    },

    /// A buffer was overwritten by the producer while it was being read
    #[error("buffer {index} expired while it was being read")]
    Expired {
        /// Unwrapped index of the buffer
        index: u32,
    },

    /// `Pipeline::join` was given halves of two different pipelines
    #[error("producer and consumer belong to different pipelines")]
    MismatchedHalves,
}
