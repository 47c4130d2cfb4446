//! Component contracts and the capability probe used at bind time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::{SampleBuffer, StreamSpec};
use crate::error::StageError;

/// Stable identity used to address deferred parameters at one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Allocates a fresh process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component-{}", self.0)
    }
}

/// Identity of one assembled pipe, passed to every bind and hook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(u64);

impl PipeId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe-{}", self.0)
    }
}

/// Lifecycle hooks a component opts into.
///
/// Probed exactly once when the component is bound into a pipe; the runner
/// keeps the resolved set and never re-probes on the hot path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `reset` runs once before the first buffer of each run.
    pub reset: bool,
    /// `flush` runs once after orderly end-of-stream.
    pub flush: bool,
    /// `interrupt` runs once when a run is cancelled externally.
    pub interrupt: bool,
}

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_reset(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn with_flush(mut self) -> Self {
        self.flush = true;
        self
    }

    pub fn with_interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }
}

/// Base contract shared by pumps, processors and sinks.
///
/// The default hook bodies are never invoked unless the matching
/// [`Capabilities`] flag is reported, so components only override what they
/// opted into.
pub trait Component: Send {
    fn id(&self) -> ComponentId;

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    fn reset(&mut self, pipe: PipeId) -> Result<(), StageError> {
        let _ = pipe;
        Ok(())
    }

    fn flush(&mut self, pipe: PipeId) -> Result<(), StageError> {
        let _ = pipe;
        Ok(())
    }

    fn interrupt(&mut self, pipe: PipeId) -> Result<(), StageError> {
        let _ = pipe;
        Ok(())
    }
}

/// Head of a pipe: produces buffers on demand.
pub trait Pump: Component {
    /// Binds the pump to a pipe and discovers the stream shape.
    fn bind(&mut self, pipe: PipeId) -> Result<StreamSpec, StageError>;

    /// Produces the next buffer of at most `buffer_size` frames.
    ///
    /// Returns [`StageError::EndOfStream`] once the source is exhausted;
    /// the buffer preceding it may be shorter than `buffer_size`.
    fn produce(&mut self, buffer_size: usize) -> Result<SampleBuffer, StageError>;
}

/// Mid-pipe transformer. May change the frame count of a buffer but never
/// its channel count.
pub trait Processor: Component {
    fn bind(&mut self, pipe: PipeId, spec: StreamSpec) -> Result<(), StageError>;

    fn process(&mut self, input: SampleBuffer) -> Result<SampleBuffer, StageError>;
}

/// Terminal stage: consumes buffers.
pub trait Sink: Component {
    fn bind(&mut self, pipe: PipeId, spec: StreamSpec) -> Result<(), StageError>;

    fn receive(&mut self, buffer: &SampleBuffer) -> Result<(), StageError>;
}
