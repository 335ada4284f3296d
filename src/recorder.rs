//! Storage driver on top of the consumer
//!
//! `Recorder` turns what [`Consumer::get_next`] hands out into calls on a
//! [`SpanWriter`]: spans are opened lazily on the first buffer, rotated once
//! they hold `max_buffers_per_span` buffers, and closed on end of sequence.
//! In gated recording closing a span is also what reopens the producer's
//! gate.
//!
//! [`spawn_recorder`] runs the poll loop on its own thread.

use crate::config::Sample;
use crate::sequence::reader::{Consumer, Next};
use parking_lot::{Condvar, Mutex};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Destination for recorded spans
///
/// A span is one contiguous stretch of buffers, typically one output file.
pub trait SpanWriter {
    /// Error reported by the storage backend
    type Error: std::error::Error + 'static;

    /// Start span number `span` (counted from zero since the recorder was
    /// built)
    fn open_span(&mut self, span: u32) -> Result<(), Self::Error>;

    /// Append one full buffer to the open span
    fn write_buffer(&mut self, index: u32, samples: &[Sample]) -> Result<(), Self::Error>;

    /// Finish the open span
    fn close_span(&mut self) -> Result<(), Self::Error>;
}

/// Recorder failures
#[derive(Error, Debug)]
pub enum RecorderError<E: std::error::Error + 'static> {
    /// The span writer failed
    #[error("span writer failed: {0}")]
    Writer(#[source] E),

    /// The recorder thread panicked
    #[error("recorder thread panicked")]
    Panicked,
}

/// Configuration for the recorder and its background thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderConfig {
    /// How long the background thread sleeps when there is nothing to write
    pub poll_interval_ms: u64,
    /// Rotate to a new span after this many buffers; `None` never rotates
    pub max_buffers_per_span: Option<usize>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            // About a minute at 384 kHz with 16K-sample buffers
            max_buffers_per_span: Some(1_400),
        }
    }
}

/// What a single [`Recorder::poll`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to write
    Idle,
    /// Buffer written to the open span
    Wrote {
        /// Unwrapped buffer index
        index: u32,
    },
    /// Buffer was overwritten while being copied and was left out
    Skipped {
        /// Unwrapped buffer index
        index: u32,
    },
    /// End of sequence reached
    Closed,
}

/// Drives a [`Consumer`] into a [`SpanWriter`]
pub struct Recorder<W: SpanWriter> {
    consumer: Consumer,
    writer: W,
    config: RecorderConfig,
    scratch: Vec<Sample>,
    span_open: bool,
    span_buffers: usize,
    spans_opened: u32,
}

impl<W: SpanWriter> Recorder<W> {
    /// Create a recorder reading from `consumer`
    pub fn new(consumer: Consumer, writer: W, config: RecorderConfig) -> Self {
        let capacity = consumer.layout().buffer_capacity;
        Self {
            consumer,
            writer,
            config,
            scratch: vec![0; capacity],
            span_open: false,
            span_buffers: 0,
            spans_opened: 0,
        }
    }

    /// Handle at most one buffer or end of sequence
    ///
    /// `now` is the current tick, passed on as the gate release time when a
    /// gated drain has been written.
    pub fn poll(&mut self, now: u32) -> Result<PollOutcome, RecorderError<W::Error>> {
        // Copy out first so the consumer borrow ends before the writer runs
        let index = match self.consumer.get_next() {
            Next::Idle => return Ok(PollOutcome::Idle),
            Next::CloseFile => None,
            Next::Buffer(buffer) => {
                let index = buffer.index();
                if let Err(err) = buffer.copy_to(&mut self.scratch) {
                    warn!(index, %err, "buffer overwritten during copy, skipped");
                    return Ok(PollOutcome::Skipped { index });
                }
                Some(index)
            }
        };

        match index {
            Some(index) => {
                self.write(index)?;
                Ok(PollOutcome::Wrote { index })
            }
            None => {
                self.close()?;
                if self.consumer.gated_recording() {
                    self.consumer.recording_complete(now);
                }
                Ok(PollOutcome::Closed)
            }
        }
    }

    /// Close any open span
    pub fn finish(&mut self) -> Result<(), RecorderError<W::Error>> {
        self.close()
    }

    /// Spans opened so far
    pub fn spans_opened(&self) -> u32 {
        self.spans_opened
    }

    /// Whether a span is currently open
    pub fn is_span_open(&self) -> bool {
        self.span_open
    }

    /// Recorder configuration
    pub fn config(&self) -> RecorderConfig {
        self.config
    }

    /// The storage backend
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Take the recorder apart, closing nothing
    pub fn into_parts(self) -> (Consumer, W) {
        (self.consumer, self.writer)
    }

    fn write(&mut self, index: u32) -> Result<(), RecorderError<W::Error>> {
        let full = self
            .config
            .max_buffers_per_span
            .is_some_and(|max| self.span_buffers >= max);
        if self.span_open && full {
            debug!(span = self.spans_opened - 1, "span full, rotating");
            self.close()?;
        }

        if !self.span_open {
            let span = self.spans_opened;
            self.writer.open_span(span).map_err(RecorderError::Writer)?;
            self.spans_opened += 1;
            self.span_open = true;
            self.span_buffers = 0;
            debug!(span, first = index, "span opened");
        }

        self.writer
            .write_buffer(index, &self.scratch)
            .map_err(RecorderError::Writer)?;
        self.span_buffers += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), RecorderError<W::Error>> {
        if self.span_open {
            self.span_open = false;
            self.writer.close_span().map_err(RecorderError::Writer)?;
            debug!(buffers = self.span_buffers, "span closed");
        }
        Ok(())
    }
}

/// Writes every span to its own file of raw little-endian samples
///
/// Files are named `<prefix>-<span>.raw` inside the target directory.
pub struct RawSampleFiles {
    dir: PathBuf,
    prefix: String,
    file: Option<BufWriter<File>>,
    written: Vec<PathBuf>,
}

impl RawSampleFiles {
    /// Write spans into `dir`, which must exist
    pub fn new<P: AsRef<Path>>(dir: P, prefix: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_string(),
            file: None,
            written: Vec::new(),
        }
    }

    /// Paths of every span file created so far, in order
    pub fn paths(&self) -> &[PathBuf] {
        &self.written
    }
}

impl SpanWriter for RawSampleFiles {
    type Error = io::Error;

    fn open_span(&mut self, span: u32) -> io::Result<()> {
        let path = self.dir.join(format!("{}-{:05}.raw", self.prefix, span));
        self.file = Some(BufWriter::new(File::create(&path)?));
        self.written.push(path);
        Ok(())
    }

    fn write_buffer(&mut self, _index: u32, samples: &[Sample]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no span open"))?;
        for sample in samples {
            file.write_all(&sample.to_le_bytes())?;
        }
        Ok(())
    }

    fn close_span(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => {
                file.flush()?;
                file.get_ref().sync_all()
            }
            None => Ok(()),
        }
    }
}

struct Shutdown {
    stop: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a recorder running on a background thread
pub struct RecorderHandle<W: SpanWriter> {
    shutdown: Arc<Shutdown>,
    thread: thread::JoinHandle<Result<Recorder<W>, RecorderError<W::Error>>>,
}

impl<W: SpanWriter> RecorderHandle<W> {
    /// Whether the thread has already exited (on a writer error)
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the thread and get the recorder back
    ///
    /// Any open span is closed first. Buffers still queued are left to the
    /// consumer.
    ///
    /// # Errors
    ///
    /// The writer error that stopped the thread early, or
    /// `RecorderError::Panicked`.
    pub fn stop(self) -> Result<Recorder<W>, RecorderError<W::Error>> {
        *self.shutdown.stop.lock() = true;
        self.shutdown.wake.notify_one();
        self.thread.join().map_err(|_| RecorderError::Panicked)?
    }
}

/// Run `recorder` on a named background thread
///
/// The thread polls as fast as there is work and otherwise sleeps for
/// `poll_interval_ms`. Ticks come from [`main_tick`](crate::main_tick).
pub fn spawn_recorder<W>(mut recorder: Recorder<W>) -> io::Result<RecorderHandle<W>>
where
    W: SpanWriter + Send + 'static,
    W::Error: Send,
{
    let shutdown = Arc::new(Shutdown {
        stop: Mutex::new(false),
        wake: Condvar::new(),
    });
    let signal = shutdown.clone();
    let interval = Duration::from_millis(recorder.config.poll_interval_ms);

    let thread = thread::Builder::new()
        .name("acquisition-recorder".to_string())
        .spawn(move || {
            info!("recorder started");
            loop {
                if *signal.stop.lock() {
                    break;
                }

                match recorder.poll(crate::main_tick()) {
                    Ok(PollOutcome::Idle) => {
                        let mut stop = signal.stop.lock();
                        if !*stop {
                            signal.wake.wait_for(&mut stop, interval);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(%err, "recorder stopped");
                        return Err(err);
                    }
                }
            }

            recorder.finish()?;
            info!(spans = recorder.spans_opened, "recorder stopped");
            Ok(recorder)
        })?;

    Ok(RecorderHandle { shutdown, thread })
}
