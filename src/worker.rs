//! Parallel execution engine
//!
//! A fixed pool of scoped threads drains a shared crossbeam queue. Each work item may emit any
//! number of outputs; outputs are buffered by the item's queue position and flattened back in
//! input order, so results never depend on scheduling.
//!
//! Structured failures ([`WorkError::Rejected`]) are reported and collected while the pool keeps
//! going. Internal faults and panics ([`WorkError::Fault`]) are collected too and abort the run
//! once the queue is drained.

use crossbeam_channel::unbounded;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostic;

/// Failure of a single work item
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("{} violation(s) reported", .0.len())]
    Rejected(Vec<Diagnostic>),

    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl From<Diagnostic> for WorkError {
    fn from(diagnostic: Diagnostic) -> Self {
        Self::Rejected(vec![diagnostic])
    }
}

/// Failure of a whole run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{} violation(s) reported", .0.len())]
    Rejected(Vec<Diagnostic>),

    #[error("{} internal fault(s)", .0.len())]
    Aborted(Vec<anyhow::Error>),
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub workers: usize,
    /// Stop handing out queued items after the first failure
    pub halt_on_first_failure: bool,
}

impl WorkerOptions {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            halt_on_first_failure: false,
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        Self::new(config.worker_count())
    }

    pub fn halting(mut self) -> Self {
        self.halt_on_first_failure = true;
        self
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&CompilerConfig::default())
    }
}

/// One unit-of-work kind processed by [`run`]
pub trait ParallelWorker: Sync {
    type Input: Send;
    type Output: Send;

    /// Stage name used in progress logs
    fn name(&self) -> &str;

    fn work(&self, input: Self::Input, output: &mut Vec<Self::Output>) -> Result<(), WorkError>;
}

/// Adapter turning a closure into a [`ParallelWorker`]
pub struct FnWorker<I, O, F> {
    name: String,
    f: F,
    _marker: PhantomData<fn(I, &mut Vec<O>)>,
}

impl<I, O, F> FnWorker<I, O, F>
where
    F: Fn(I, &mut Vec<O>) -> Result<(), WorkError> + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> ParallelWorker for FnWorker<I, O, F>
where
    I: Send,
    O: Send,
    F: Fn(I, &mut Vec<O>) -> Result<(), WorkError> + Sync,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    fn work(&self, input: I, output: &mut Vec<O>) -> Result<(), WorkError> {
        (self.f)(input, output)
    }
}

type Outcome<O> = (usize, Result<Vec<O>, WorkError>);

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Process every input on the pool and return all outputs in input order
pub fn run<W: ParallelWorker>(
    worker: &W,
    inputs: Vec<W::Input>,
    options: &WorkerOptions,
) -> Result<Vec<W::Output>, RunError> {
    let total = inputs.len();
    if total == 0 {
        return Ok(vec![]);
    }

    let (sender, receiver) = unbounded();
    for item in inputs.into_iter().enumerate() {
        if sender.send(item).is_err() {
            return Err(RunError::Aborted(vec![anyhow::anyhow!(
                "{}: work queue closed",
                worker.name()
            )]));
        }
    }
    drop(sender);

    let workers = options.workers.clamp(1, total);
    let finished = AtomicUsize::new(0);
    let halted = AtomicBool::new(false);

    let mut outcomes: Vec<Outcome<W::Output>> = Vec::with_capacity(total);
    let mut faults: Vec<anyhow::Error> = Vec::new();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let receiver = receiver.clone();
                let finished = &finished;
                let halted = &halted;
                scope.spawn(move || {
                    let mut local: Vec<Outcome<W::Output>> = Vec::new();
                    while let Ok((index, item)) = receiver.recv() {
                        if halted.load(Ordering::Relaxed) {
                            break;
                        }

                        let mut output = Vec::new();
                        let result =
                            panic::catch_unwind(AssertUnwindSafe(|| worker.work(item, &mut output)));
                        let outcome = match result {
                            Ok(Ok(())) => Ok(output),
                            Ok(Err(e)) => Err(e),
                            Err(payload) => Err(WorkError::Fault(anyhow::anyhow!(
                                "{}: work item {} panicked: {}",
                                worker.name(),
                                index,
                                panic_message(payload.as_ref())
                            ))),
                        };
                        if outcome.is_err() && options.halt_on_first_failure {
                            halted.store(true, Ordering::Relaxed);
                        }

                        let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!(
                            stage = worker.name(),
                            progress = done * 100 / total,
                            "work item {} finished",
                            index
                        );
                        local.push((index, outcome));
                    }
                    local
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(local) => outcomes.extend(local),
                Err(payload) => faults.push(anyhow::anyhow!(
                    "{}: worker thread died: {}",
                    worker.name(),
                    panic_message(payload.as_ref())
                )),
            }
        }
    });

    outcomes.sort_by_key(|(index, _)| *index);

    let mut outputs = Vec::new();
    let mut diagnostics = Vec::new();
    for (_, outcome) in outcomes {
        match outcome {
            Ok(items) => outputs.extend(items),
            Err(WorkError::Rejected(reported)) => {
                for diagnostic in &reported {
                    error!(
                        stage = worker.name(),
                        location = %diagnostic
                            .location
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        "{}",
                        diagnostic.message()
                    );
                }
                diagnostics.extend(reported);
            }
            Err(WorkError::Fault(fault)) => {
                error!(stage = worker.name(), "internal fault: {:#}", fault);
                faults.push(fault);
            }
        }
    }

    if !faults.is_empty() {
        return Err(RunError::Aborted(faults));
    }
    if !diagnostics.is_empty() {
        return Err(RunError::Rejected(diagnostics));
    }
    Ok(outputs)
}
