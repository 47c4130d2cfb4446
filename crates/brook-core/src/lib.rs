//! Carrier types and component contracts for the brook pipeline engine.
//!
//! This crate holds everything a component author needs: the sample buffer,
//! deferred parameter sets, the pump/processor/sink traits with their
//! optional lifecycle capabilities, and the cancel latch observed by every
//! stage suspension point. The runtime that drives components lives in
//! `brook-audio`.

#![deny(clippy::wildcard_imports)]

pub mod buffer;
pub mod component;
pub mod error;
pub mod latch;
pub mod params;

pub use buffer::{SampleBuffer, StreamSpec};
pub use component::{Capabilities, Component, ComponentId, PipeId, Processor, Pump, Sink};
pub use error::StageError;
pub use latch::{Gate, Latch};
pub use params::{Param, Params};
