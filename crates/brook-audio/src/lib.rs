//! Streaming audio pipeline engine.
//!
//! Wires one pump, any number of processors and one or more sinks into a
//! linear dataflow pipe, then drives fixed-size sample buffers through it
//! under a pause/resume/interrupt control plane with per-pipe parameter
//! injection. Component contracts live in `brook-core`; this crate owns the
//! stage runners, the pipe assembly, the supervisor and the track mixer.

#![deny(clippy::wildcard_imports)]

pub mod control;
pub mod error;
pub mod message;
pub mod metric;
pub mod pipe;
mod runner;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{Driver, Handle, Reply, StartedRun};
pub use error::Error;
pub use message::Message;
pub use metric::{Metric, MeterSnapshot};
pub use pipe::{Pipe, PipeBuilder};
pub use track::{Asset, Clip, Track};
