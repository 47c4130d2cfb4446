//! Stage runners: one worker thread per bound component.
//!
//! Each runner drives its component through the shared lifecycle: reset
//! hook, work loop, then exactly one of flush (orderly end-of-stream) or
//! interrupt (external cancellation). Every suspension point pairs the
//! channel operation with the run's cancel gate in a single `select!`, so a
//! tripped latch is observed wherever a runner can block. Hook errors go to
//! the stage error channel without aborting the remaining exit path; a
//! fatal functional error is published and ends the stage with no hook.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::debug;

use brook_core::{Capabilities, Component, Gate, PipeId, Processor, Pump, Sink, StageError};

use crate::message::Message;
use crate::metric::Meter;

/// Capacity of the message channel between adjacent stages.
const STAGE_CHANNEL_CAPACITY: usize = 1;

/// How a runner left its work loop.
enum Exit {
    /// Upstream exhausted; run the flush hook.
    Flushed,
    /// Cancelled externally or a neighbour stage vanished; run the
    /// interrupt hook.
    Interrupted,
    /// The functional core failed; no hook.
    Failed(StageError),
}

fn call_hook(
    result: Result<(), StageError>,
    errors: &Sender<StageError>,
) {
    if let Err(err) = result {
        let _ = errors.send(err);
    }
}

pub(crate) struct PumpRunner {
    pump: Box<dyn Pump>,
    caps: Capabilities,
    meter: Meter,
}

impl PumpRunner {
    pub(crate) fn new(pump: Box<dyn Pump>, meter: Meter) -> Self {
        let caps = pump.capabilities();
        Self { pump, caps, meter }
    }

    fn run(
        &mut self,
        pipe: PipeId,
        buffer_size: usize,
        gate: Gate,
        provide: Sender<PipeId>,
        consume: Receiver<Message>,
        out: Sender<Message>,
        errors: Sender<StageError>,
    ) {
        let id = self.pump.id();
        if self.caps.reset {
            call_hook(self.pump.reset(pipe), &errors);
        }
        self.meter.mark();

        let exit = loop {
            // request the next prepared message
            select! {
                send(provide, pipe) -> res => {
                    if res.is_err() {
                        break Exit::Interrupted;
                    }
                }
                recv(gate.channel()) -> _ => break Exit::Interrupted,
            }

            // receive it
            let mut message = select! {
                recv(consume) -> msg => match msg {
                    Ok(message) => message,
                    Err(_) => break Exit::Interrupted,
                },
                recv(gate.channel()) -> _ => break Exit::Interrupted,
            };

            message.params.apply_to(id);
            match self.pump.produce(buffer_size) {
                Ok(buffer) => {
                    self.meter.record(&buffer);
                    message.feedback.apply_to(id);
                    message.buffer = buffer;
                    select! {
                        send(out, message) -> res => {
                            if res.is_err() {
                                break Exit::Interrupted;
                            }
                        }
                        recv(gate.channel()) -> _ => break Exit::Interrupted,
                    }
                }
                Err(err) if err.is_end_of_stream() => break Exit::Flushed,
                Err(err) => break Exit::Failed(err),
            }
        };

        self.finish(pipe, exit, &errors);
    }

    fn finish(&mut self, pipe: PipeId, exit: Exit, errors: &Sender<StageError>) {
        match exit {
            Exit::Flushed => {
                if self.caps.flush {
                    call_hook(self.pump.flush(pipe), errors);
                }
            }
            Exit::Interrupted => {
                if self.caps.interrupt {
                    call_hook(self.pump.interrupt(pipe), errors);
                }
            }
            Exit::Failed(err) => {
                let _ = errors.send(err);
            }
        }
    }
}

/// Spawns the pump stage. Returns its downstream channel, its error channel
/// and the worker's join handle.
pub(crate) fn start_pump(
    runner: Arc<Mutex<PumpRunner>>,
    pipe: PipeId,
    buffer_size: usize,
    gate: Gate,
    provide: Sender<PipeId>,
    consume: Receiver<Message>,
) -> (Receiver<Message>, Receiver<StageError>, JoinHandle<()>) {
    let (out_tx, out_rx) = bounded(STAGE_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = bounded(1);
    let join = thread::Builder::new()
        .name(format!("brook-{pipe}-pump"))
        .spawn(move || {
            let mut runner = runner.lock().expect("pump runner mutex poisoned");
            runner.run(pipe, buffer_size, gate, provide, consume, out_tx, err_tx);
            debug!(%pipe, "pump runner finished");
        })
        .expect("failed to spawn pump thread");
    (out_rx, err_rx, join)
}

pub(crate) struct ProcessRunner {
    processor: Box<dyn Processor>,
    caps: Capabilities,
    meter: Meter,
}

impl ProcessRunner {
    pub(crate) fn new(processor: Box<dyn Processor>, meter: Meter) -> Self {
        let caps = processor.capabilities();
        Self {
            processor,
            caps,
            meter,
        }
    }

    fn run(
        &mut self,
        pipe: PipeId,
        gate: Gate,
        input: Receiver<Message>,
        out: Sender<Message>,
        errors: Sender<StageError>,
    ) {
        let id = self.processor.id();
        if self.caps.reset {
            call_hook(self.processor.reset(pipe), &errors);
        }
        self.meter.mark();

        let exit = loop {
            let mut message = select! {
                recv(input) -> msg => match msg {
                    Ok(message) => message,
                    Err(_) => break Exit::Flushed,
                },
                recv(gate.channel()) -> _ => break Exit::Interrupted,
            };

            message.params.apply_to(id);
            let buffer = std::mem::take(&mut message.buffer);
            match self.processor.process(buffer) {
                Ok(buffer) => {
                    self.meter.record(&buffer);
                    message.feedback.apply_to(id);
                    message.buffer = buffer;
                    select! {
                        send(out, message) -> res => {
                            if res.is_err() {
                                break Exit::Interrupted;
                            }
                        }
                        recv(gate.channel()) -> _ => break Exit::Interrupted,
                    }
                }
                Err(err) => break Exit::Failed(err),
            }
        };

        match exit {
            Exit::Flushed => {
                if self.caps.flush {
                    call_hook(self.processor.flush(pipe), &errors);
                }
            }
            Exit::Interrupted => {
                if self.caps.interrupt {
                    call_hook(self.processor.interrupt(pipe), &errors);
                }
            }
            Exit::Failed(err) => {
                let _ = errors.send(err);
            }
        }
    }
}

pub(crate) fn start_processor(
    runner: Arc<Mutex<ProcessRunner>>,
    pipe: PipeId,
    index: usize,
    gate: Gate,
    input: Receiver<Message>,
) -> (Receiver<Message>, Receiver<StageError>, JoinHandle<()>) {
    let (out_tx, out_rx) = bounded(STAGE_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = bounded(1);
    let join = thread::Builder::new()
        .name(format!("brook-{pipe}-processor-{index}"))
        .spawn(move || {
            let mut runner = runner.lock().expect("processor runner mutex poisoned");
            runner.run(pipe, gate, input, out_tx, err_tx);
            debug!(%pipe, index, "processor runner finished");
        })
        .expect("failed to spawn processor thread");
    (out_rx, err_rx, join)
}

pub(crate) struct SinkRunner {
    sink: Box<dyn Sink>,
    caps: Capabilities,
    meter: Meter,
}

impl SinkRunner {
    pub(crate) fn new(sink: Box<dyn Sink>, meter: Meter) -> Self {
        let caps = sink.capabilities();
        Self { sink, caps, meter }
    }

    fn run(
        &mut self,
        pipe: PipeId,
        gate: Gate,
        input: Receiver<Message>,
        errors: Sender<StageError>,
    ) {
        let id = self.sink.id();
        if self.caps.reset {
            call_hook(self.sink.reset(pipe), &errors);
        }
        self.meter.mark();

        let exit = loop {
            let mut message = select! {
                recv(input) -> msg => match msg {
                    Ok(message) => message,
                    Err(_) => break Exit::Flushed,
                },
                recv(gate.channel()) -> _ => break Exit::Interrupted,
            };

            message.params.apply_to(id);
            match self.sink.receive(&message.buffer) {
                Ok(()) => {
                    self.meter.record(&message.buffer);
                    message.feedback.apply_to(id);
                }
                Err(err) => break Exit::Failed(err),
            }
        };

        match exit {
            Exit::Flushed => {
                if self.caps.flush {
                    call_hook(self.sink.flush(pipe), &errors);
                }
            }
            Exit::Interrupted => {
                if self.caps.interrupt {
                    call_hook(self.sink.interrupt(pipe), &errors);
                }
            }
            Exit::Failed(err) => {
                let _ = errors.send(err);
            }
        }
    }
}

pub(crate) fn start_sink(
    runner: Arc<Mutex<SinkRunner>>,
    pipe: PipeId,
    index: usize,
    gate: Gate,
    input: Receiver<Message>,
) -> (Receiver<StageError>, JoinHandle<()>) {
    let (err_tx, err_rx) = bounded(1);
    let join = thread::Builder::new()
        .name(format!("brook-{pipe}-sink-{index}"))
        .spawn(move || {
            let mut runner = runner.lock().expect("sink runner mutex poisoned");
            runner.run(pipe, gate, input, err_tx);
            debug!(%pipe, index, "sink runner finished");
        })
        .expect("failed to spawn sink thread");
    (err_rx, join)
}
