//! Linear pipe assembly.
//!
//! A pipe is one pump, any number of processors in series and at least one
//! sink, all sharing the stream shape the pump discovers at bind time.
//! Binding is leaves-first and eager: the pump first, then each processor
//! in order, then each sink, and the first rejection aborts construction
//! before any later stage sees a lifecycle call. The built pipe owns its
//! supervisor and stays immutable until dropped.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};

use brook_core::{
    Component, ComponentId, Gate, Params, PipeId, Processor, Pump, Sink, StreamSpec,
};

use crate::control::{Driver, Handle, Reply, StartedRun};
use crate::error::Error;
use crate::message::Message;
use crate::metric::Metric;
use crate::runner::{
    start_processor, start_pump, start_sink, ProcessRunner, PumpRunner, SinkRunner,
};

/// An assembled, immutable pipeline with its control handle.
#[derive(Debug)]
pub struct Pipe {
    id: PipeId,
    spec: StreamSpec,
    metric: Metric,
    handle: Handle,
}

impl Pipe {
    pub fn builder(pump: impl Pump + 'static) -> PipeBuilder {
        PipeBuilder {
            pump: Box::new(pump),
            processors: Vec::new(),
            sinks: Vec::new(),
            metric: None,
        }
    }

    pub fn id(&self) -> PipeId {
        self.id
    }

    /// Stream shape shared by every stage of this pipe.
    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn run(&self, buffer_size: usize) -> Reply {
        self.handle.run(buffer_size)
    }

    pub fn run_with_cancel(&self, buffer_size: usize, cancel: Gate) -> Reply {
        self.handle.run_with_cancel(buffer_size, cancel)
    }

    pub fn pause(&self) -> Reply {
        self.handle.pause()
    }

    pub fn resume(&self) -> Reply {
        self.handle.resume()
    }

    pub fn interrupt(&self) -> Reply {
        self.handle.interrupt()
    }

    pub fn push(&self, params: Params) {
        self.handle.push(params)
    }
}

/// Collects stages for one [`Pipe`].
pub struct PipeBuilder {
    pump: Box<dyn Pump>,
    processors: Vec<Box<dyn Processor>>,
    sinks: Vec<Box<dyn Sink>>,
    metric: Option<Metric>,
}

impl PipeBuilder {
    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Shares an externally owned metric instead of a fresh one.
    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Binds every stage and spawns the supervisor.
    pub fn build(mut self) -> Result<Pipe, Error> {
        let id = PipeId::next();
        if self.sinks.is_empty() {
            return Err(Error::NoSink);
        }

        let spec = self
            .pump
            .bind(id)
            .and_then(StreamSpec::validate)
            .map_err(|source| Error::Bind { pipe: id, source })?;
        for processor in &mut self.processors {
            processor
                .bind(id, spec)
                .map_err(|source| Error::Bind { pipe: id, source })?;
        }
        for sink in &mut self.sinks {
            sink.bind(id, spec)
                .map_err(|source| Error::Bind { pipe: id, source })?;
        }

        let metric = self.metric.unwrap_or_default();
        let pump_id = self.pump.id();
        let pump = Arc::new(Mutex::new(PumpRunner::new(self.pump, metric.meter(pump_id))));
        let processors = self
            .processors
            .into_iter()
            .map(|processor| {
                let meter = metric.meter(processor.id());
                Arc::new(Mutex::new(ProcessRunner::new(processor, meter)))
            })
            .collect();
        let sink_ids: Vec<ComponentId> = self.sinks.iter().map(|sink| sink.id()).collect();
        let sinks = self
            .sinks
            .into_iter()
            .map(|sink| {
                let meter = metric.meter(sink.id());
                Arc::new(Mutex::new(SinkRunner::new(sink, meter)))
            })
            .collect();

        let driver = PipeDriver {
            id,
            pump,
            processors,
            sinks,
            sink_ids,
            metric: metric.clone(),
        };
        let handle = Handle::new(id, driver);
        Ok(Pipe {
            id,
            spec,
            metric,
            handle,
        })
    }
}

/// Capacity of the supervisor → pump prepared-message channel. One token
/// is in flight at a time, so a single slot never blocks the supervisor.
const CONSUME_CAPACITY: usize = 1;

struct PipeDriver {
    id: PipeId,
    pump: Arc<Mutex<PumpRunner>>,
    processors: Vec<Arc<Mutex<ProcessRunner>>>,
    sinks: Vec<Arc<Mutex<SinkRunner>>>,
    sink_ids: Vec<ComponentId>,
    metric: Metric,
}

impl Driver for PipeDriver {
    fn start(&mut self, buffer_size: usize, gate: Gate, provide: Sender<PipeId>) -> StartedRun {
        let (consume_tx, consume_rx) = bounded(CONSUME_CAPACITY);
        let mut errors = Vec::new();
        let mut joins = Vec::new();

        let (mut stream, stage_errors, join) = start_pump(
            Arc::clone(&self.pump),
            self.id,
            buffer_size,
            gate.clone(),
            provide,
            consume_rx,
        );
        errors.push(stage_errors);
        joins.push(join);

        for (index, processor) in self.processors.iter().enumerate() {
            let (next, stage_errors, join) =
                start_processor(Arc::clone(processor), self.id, index, gate.clone(), stream);
            stream = next;
            errors.push(stage_errors);
            joins.push(join);
        }

        let streams = if self.sinks.len() == 1 {
            vec![stream]
        } else {
            let (streams, join) =
                start_fan_out(self.id, gate.clone(), stream, self.sink_ids.clone());
            joins.push(join);
            streams
        };
        for (index, (sink, stream)) in self.sinks.iter().zip(streams).enumerate() {
            let (stage_errors, join) =
                start_sink(Arc::clone(sink), self.id, index, gate.clone(), stream);
            errors.push(stage_errors);
            joins.push(join);
        }

        StartedRun {
            consume: consume_tx,
            errors,
            joins,
        }
    }

    fn new_message(&mut self) -> Message {
        self.metric.stamp_message();
        Message::new()
    }
}

/// Duplicates the message stream for parallel sinks: the buffer is cloned
/// per sink and the parameter payloads are split by sink id, so every sink
/// still drains exactly its own entries.
fn start_fan_out(
    pipe: PipeId,
    gate: Gate,
    input: Receiver<Message>,
    sink_ids: Vec<ComponentId>,
) -> (Vec<Receiver<Message>>, JoinHandle<()>) {
    let mut outputs = Vec::with_capacity(sink_ids.len());
    let mut senders: Vec<Option<Sender<Message>>> = Vec::with_capacity(sink_ids.len());
    for _ in &sink_ids {
        let (tx, rx) = bounded(1);
        senders.push(Some(tx));
        outputs.push(rx);
    }

    let join = thread::Builder::new()
        .name(format!("brook-{pipe}-fan-out"))
        .spawn(move || loop {
            let mut message = select! {
                recv(input) -> msg => match msg {
                    Ok(message) => message,
                    Err(_) => return,
                },
                recv(gate.channel()) -> _ => return,
            };

            for (index, id) in sink_ids.iter().enumerate() {
                let Some(tx) = senders[index].take() else {
                    continue;
                };
                let copy = Message {
                    buffer: message.buffer.clone(),
                    params: message.params.split_off(*id),
                    feedback: message.feedback.split_off(*id),
                };
                let mut delivered = false;
                select! {
                    send(tx, copy) -> res => delivered = res.is_ok(),
                    recv(gate.channel()) -> _ => return,
                }
                if delivered {
                    senders[index] = Some(tx);
                }
            }
            if senders.iter().all(Option::is_none) {
                return;
            }
        })
        .expect("failed to spawn fan-out thread");
    (outputs, join)
}
