//! Control plane: the per-pipe supervisor and its handle.
//!
//! The supervisor is a single-owner event loop on a dedicated thread.
//! External callers never touch its state directly; every operation is a
//! command carrying a reply sender, and the reply channel delivers exactly
//! one error or closes as success. While a run is live the supervisor
//! multiplexes the command inbox, the pump's provide tokens, the merged
//! stage error channels and an optional external cancel gate.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Select, Sender};
use tracing::{debug, info, warn};

use brook_core::{Gate, Latch, Params, PipeId, StageError};

use crate::error::Error;
use crate::message::Message;

/// Everything a driver hands back when a run starts.
pub struct StartedRun {
    /// Delivery side of the pump's prepared-message channel.
    pub consume: Sender<Message>,
    /// Per-stage error channels; each closes when its stage finishes.
    pub errors: Vec<Receiver<StageError>>,
    /// Join handles for every worker spawned for the run.
    pub joins: Vec<JoinHandle<()>>,
}

/// The supervisor's view of the pipe it governs.
///
/// Implemented by the pipe assembly; kept as a trait so the state machine
/// can be exercised against synthetic drivers.
pub trait Driver: Send + 'static {
    /// Wires stage channels and spawns one worker per stage.
    fn start(&mut self, buffer_size: usize, gate: Gate, provide: Sender<PipeId>) -> StartedRun;

    /// Stamps a fresh message. The observable side effect (the pipe's
    /// message counter) advances here; the supervisor fills in the
    /// accumulated parameters afterwards.
    fn new_message(&mut self) -> Message;
}

enum Command {
    Run {
        buffer_size: usize,
        cancel: Gate,
        reply: Sender<Error>,
    },
    Pause {
        reply: Sender<Error>,
    },
    Resume {
        reply: Sender<Error>,
    },
    Interrupt {
        reply: Sender<Error>,
    },
    Push {
        params: Params,
    },
}

/// Outcome channel of one control command.
///
/// Yields at most one error and then closes; closing without a value is
/// success. `Run` replies are answered only once the run has fully wound
/// down, so waiting on one observes the run result.
#[must_use]
pub struct Reply {
    rx: Receiver<Error>,
}

impl Reply {
    fn pair() -> (Sender<Error>, Reply) {
        let (tx, rx) = bounded(1);
        (tx, Reply { rx })
    }

    fn rejected() -> Reply {
        let (tx, reply) = Reply::pair();
        let _ = tx.send(Error::InvalidState);
        reply
    }

    /// Blocks until the command outcome is known.
    pub fn wait(self) -> Result<(), Error> {
        match self.rx.recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}

/// Cloneable front door of one supervisor.
#[derive(Debug, Clone)]
pub struct Handle {
    commands: Sender<Command>,
}

impl Handle {
    /// Spawns the supervisor thread for `driver`.
    pub fn new(pipe: PipeId, driver: impl Driver) -> Handle {
        let (commands, inbox) = unbounded();
        thread::Builder::new()
            .name(format!("brook-{pipe}-supervisor"))
            .spawn(move || Supervisor::new(pipe, driver, inbox).run_loop())
            .expect("failed to spawn supervisor thread");
        Handle { commands }
    }

    pub fn run(&self, buffer_size: usize) -> Reply {
        self.run_with_cancel(buffer_size, Gate::open())
    }

    /// Starts a run that additionally terminates when `cancel` trips.
    pub fn run_with_cancel(&self, buffer_size: usize, cancel: Gate) -> Reply {
        let (reply_tx, reply) = Reply::pair();
        match self.commands.send(Command::Run {
            buffer_size,
            cancel,
            reply: reply_tx,
        }) {
            Ok(()) => reply,
            Err(_) => Reply::rejected(),
        }
    }

    pub fn pause(&self) -> Reply {
        self.command(|reply| Command::Pause { reply })
    }

    pub fn resume(&self) -> Reply {
        self.command(|reply| Command::Resume { reply })
    }

    pub fn interrupt(&self) -> Reply {
        self.command(|reply| Command::Interrupt { reply })
    }

    /// Queues parameters for the next prepared message.
    pub fn push(&self, params: Params) {
        let _ = self.commands.send(Command::Push { params });
    }

    fn command(&self, make: impl FnOnce(Sender<Error>) -> Command) -> Reply {
        let (reply_tx, reply) = Reply::pair();
        match self.commands.send(make(reply_tx)) {
            Ok(()) => reply,
            Err(_) => Reply::rejected(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Running,
    Paused,
    Done,
}

struct ActiveRun {
    latch: Option<Latch>,
    cancel: Gate,
    provide: Receiver<PipeId>,
    provide_open: bool,
    consume: Sender<Message>,
    errors: Receiver<StageError>,
    joins: Vec<JoinHandle<()>>,
    run_reply: Sender<Error>,
    interrupt_reply: Option<Sender<Error>>,
    shutting_down: bool,
    first_error: Option<StageError>,
}

struct Supervisor<D> {
    pipe: PipeId,
    driver: D,
    commands: Receiver<Command>,
    commands_open: bool,
    params: Params,
    phase: Phase,
    active: Option<ActiveRun>,
}

/// Closes the reply as success.
fn accept(_reply: Sender<Error>) {}

fn reject(reply: Sender<Error>) {
    let _ = reply.send(Error::InvalidState);
}

impl<D: Driver> Supervisor<D> {
    fn new(pipe: PipeId, driver: D, commands: Receiver<Command>) -> Self {
        Self {
            pipe,
            driver,
            commands,
            commands_open: true,
            params: Params::new(),
            phase: Phase::Ready,
            active: None,
        }
    }

    fn run_loop(mut self) {
        info!(pipe = %self.pipe, "supervisor started");
        loop {
            if self.active.is_none() {
                if !self.commands_open {
                    break;
                }
                match self.commands.recv() {
                    Ok(command) => self.on_command(command),
                    Err(_) => break,
                }
                continue;
            }

            let commands = if self.commands_open {
                self.commands.clone()
            } else {
                never()
            };
            let (provide, errors, cancel) = {
                let run = self.active.as_ref().expect("active run present");
                let provide = if self.phase == Phase::Running
                    && run.provide_open
                    && !run.shutting_down
                {
                    run.provide.clone()
                } else {
                    never()
                };
                (provide, run.errors.clone(), run.cancel.channel().clone())
            };

            select! {
                recv(commands) -> command => match command {
                    Ok(command) => self.on_command(command),
                    Err(_) => {
                        // every handle is gone; wind the run down and exit
                        self.commands_open = false;
                        self.begin_shutdown();
                    }
                },
                recv(provide) -> token => match token {
                    Ok(_) => self.on_provide(),
                    Err(_) => {
                        if let Some(run) = self.active.as_mut() {
                            run.provide_open = false;
                        }
                    }
                },
                recv(errors) -> event => match event {
                    Ok(err) => self.on_stage_error(err),
                    Err(_) => self.on_run_complete(),
                },
                recv(cancel) -> _ => self.on_external_cancel(),
            }
        }
        info!(pipe = %self.pipe, "supervisor exited");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Push { params } => self.params.merge(params),
            Command::Run {
                buffer_size,
                cancel,
                reply,
            } => match self.phase {
                Phase::Ready => self.start_run(buffer_size, cancel, reply),
                _ => reject(reply),
            },
            // a run that is winding down already behaves as done, so
            // pause/resume are rejected as soon as shutdown begins, not
            // only once the phase flips after teardown
            Command::Pause { reply } => match self.phase {
                Phase::Running if !self.shutting_down() => {
                    self.phase = Phase::Paused;
                    debug!(pipe = %self.pipe, "paused");
                    accept(reply);
                }
                _ => reject(reply),
            },
            Command::Resume { reply } => match self.phase {
                Phase::Paused if !self.shutting_down() => {
                    self.phase = Phase::Running;
                    debug!(pipe = %self.pipe, "resumed");
                    accept(reply);
                }
                _ => reject(reply),
            },
            Command::Interrupt { reply } => match self.phase {
                Phase::Ready => {
                    self.phase = Phase::Done;
                    accept(reply);
                }
                Phase::Done => accept(reply),
                Phase::Running | Phase::Paused => {
                    let run = self.active.as_mut().expect("active run while running");
                    if run.interrupt_reply.is_some() {
                        accept(reply);
                    } else {
                        run.interrupt_reply = Some(reply);
                        self.begin_shutdown();
                    }
                }
            },
        }
    }

    fn start_run(&mut self, buffer_size: usize, cancel: Gate, reply: Sender<Error>) {
        let (latch, gate) = Latch::new();
        let (provide_tx, provide_rx) = bounded(1);
        let StartedRun {
            consume,
            errors,
            mut joins,
        } = self.driver.start(buffer_size, gate, provide_tx);
        let (errors, merge_join) = merge_errors(self.pipe, errors);
        joins.push(merge_join);
        self.active = Some(ActiveRun {
            latch: Some(latch),
            cancel,
            provide: provide_rx,
            provide_open: true,
            consume,
            errors,
            joins,
            run_reply: reply,
            interrupt_reply: None,
            shutting_down: false,
            first_error: None,
        });
        self.phase = Phase::Running;
        debug!(pipe = %self.pipe, buffer_size, "run started");
    }

    /// Answers one provide token with a prepared message carrying the
    /// parameters accumulated since the previous one.
    fn on_provide(&mut self) {
        let mut message = self.driver.new_message();
        message.params = self.params.take();
        let Some(run) = self.active.as_mut() else {
            return;
        };
        if let Err(failed) = run.consume.try_send(message) {
            // the pump vanished mid-request; keep the parameters queued
            let message = failed.into_inner();
            self.params.merge(message.params);
        }
    }

    fn on_stage_error(&mut self, err: StageError) {
        let Some(run) = self.active.as_mut() else {
            return;
        };
        if run.first_error.is_none() {
            debug!(pipe = %self.pipe, error = %err, "stage failed, cancelling run");
            run.first_error = Some(err);
            self.begin_shutdown();
        } else {
            warn!(pipe = %self.pipe, error = %err, "suppressing secondary stage error");
        }
    }

    fn on_external_cancel(&mut self) {
        debug!(pipe = %self.pipe, "external cancellation observed");
        if let Some(run) = self.active.as_mut() {
            // the disconnected gate would keep firing; silence it
            run.cancel = Gate::open();
        }
        self.begin_shutdown();
    }

    fn shutting_down(&self) -> bool {
        self.active.as_ref().map_or(false, |run| run.shutting_down)
    }

    fn begin_shutdown(&mut self) {
        let Some(run) = self.active.as_mut() else {
            return;
        };
        if run.shutting_down {
            return;
        }
        run.shutting_down = true;
        run.provide_open = false;
        if let Some(latch) = run.latch.take() {
            latch.trip();
        }
    }

    /// All stage error channels closed: the run is over. Joins every
    /// worker before answering, so no task outlives the run.
    fn on_run_complete(&mut self) {
        let Some(run) = self.active.take() else {
            return;
        };
        let ActiveRun {
            latch,
            provide,
            consume,
            joins,
            run_reply,
            interrupt_reply,
            first_error,
            ..
        } = run;
        drop(latch);
        drop(provide);
        drop(consume);
        for join in joins {
            let _ = join.join();
        }

        match first_error {
            Some(source) => {
                let _ = run_reply.send(Error::Failed {
                    pipe: self.pipe,
                    source,
                });
            }
            None => accept(run_reply),
        }
        if let Some(reply) = interrupt_reply {
            accept(reply);
        }
        self.phase = Phase::Done;
        debug!(pipe = %self.pipe, "run finished");
    }
}

/// Fans the per-stage error channels into one stream that closes once
/// every stage has finished.
fn merge_errors(
    pipe: PipeId,
    inputs: Vec<Receiver<StageError>>,
) -> (Receiver<StageError>, JoinHandle<()>) {
    let (tx, rx) = unbounded();
    let join = thread::Builder::new()
        .name(format!("brook-{pipe}-errors"))
        .spawn(move || {
            let mut inputs = inputs;
            while !inputs.is_empty() {
                let mut select = Select::new();
                for input in &inputs {
                    select.recv(input);
                }
                let op = select.select();
                let index = op.index();
                match op.recv(&inputs[index]) {
                    Ok(err) => {
                        if tx.send(err).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        inputs.swap_remove(index);
                    }
                }
            }
        })
        .expect("failed to spawn error fan-in thread");
    (rx, join)
}

#[cfg(test)]
#[path = "tests/control.rs"]
mod tests;
