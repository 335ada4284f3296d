//! Pool layout and recording settings
//!
//! The layout is fixed when the pipeline is built. Settings are copied into
//! the producer and consumer at every [`Pipeline::reset`](crate::Pipeline::reset).

use crate::error::ConfigError;

/// Samples are 16-bit signed values straight from the ADC
pub type Sample = i16;

/// Recording policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every completed buffer is queued for storage
    Continuous,
    /// Only buffers around trigger events are queued
    Triggered,
}

/// Shape of the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    /// Number of buffers in the ring (P)
    pub pool_size: usize,
    /// Samples per buffer (C)
    pub buffer_capacity: usize,
    /// Number of tokens the sequence FIFO can hold
    pub fifo_capacity: usize,
}

impl PoolLayout {
    /// Layout with the reference FIFO sizing of five tokens per buffer
    pub fn new(pool_size: usize, buffer_capacity: usize) -> Self {
        Self {
            pool_size,
            buffer_capacity,
            fifo_capacity: pool_size * 5,
        }
    }

    /// Override the FIFO capacity
    pub fn with_fifo_capacity(mut self, fifo_capacity: usize) -> Self {
        self.fifo_capacity = fifo_capacity;
        self
    }

    /// Check the layout against the settings that will run on it
    pub fn validate(&self, settings: &RecordingSettings) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.pool_size <= settings.buffer_delta || self.pool_size < 2 {
            return Err(ConfigError::PoolTooSmall {
                pool_size: self.pool_size,
                buffer_delta: settings.buffer_delta,
            });
        }
        // A gated drain holds a start token plus up to P-1 data tokens and
        // the closing end token.
        let minimum = self.pool_size + 1;
        if self.fifo_capacity < minimum {
            return Err(ConfigError::FifoTooSmall {
                fifo_capacity: self.fifo_capacity,
                minimum,
            });
        }
        Ok(())
    }
}

impl Default for PoolLayout {
    fn default() -> Self {
        // 37 buffers of 32 KiB, the largest pool that fits alongside the
        // rest of the firmware in SRAM.
        Self::new(37, 32768 / std::mem::size_of::<Sample>())
    }
}

/// Trigger and gating policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingSettings {
    /// History to include before a trigger, in seconds
    pub pretrigger_seconds: f32,
    /// Minimum time recorded after a trigger or retrigger, in seconds
    pub min_recording_seconds: f32,
    /// Pause ingestion while the pool is drained to storage
    pub gated_recording: bool,
    /// Ticks after a gate release during which triggers are ignored
    pub trigger_cooldown_ticks: u32,
    /// A fresh sequence is held back until its oldest buffer is fewer than
    /// this many slots ahead of the write position
    pub max_read_lead: usize,
    /// Buffers kept clear of the write cursor when choosing pretrigger history
    pub buffer_delta: usize,
}

impl RecordingSettings {
    /// Reject durations that cannot be turned into buffer counts, and a read
    /// lead that would hold every fresh sequence back forever
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_read_lead < 2 {
            return Err(ConfigError::ReadLeadTooSmall {
                max_read_lead: self.max_read_lead,
            });
        }
        for (name, value) in [
            ("pretrigger_seconds", self.pretrigger_seconds),
            ("min_recording_seconds", self.min_recording_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidDuration { name, value });
            }
        }
        Ok(())
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            pretrigger_seconds: 0.5,
            min_recording_seconds: 2.0,
            gated_recording: false,
            trigger_cooldown_ticks: 10,
            max_read_lead: 12,
            buffer_delta: 2,
        }
    }
}

/// Whole buffers covering `seconds` at the given rate, rounded down
pub fn buffers_for(buffers_per_second: u32, seconds: f32) -> u32 {
    (buffers_per_second as f32 * seconds) as u32
}
