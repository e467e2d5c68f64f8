//! Worklist scheduler for iterative resolution.
//!
//! Every recovered edge exposes a new address that may itself be obfuscated, but the
//! host has to re-analyze the patched function before that address can be examined. The
//! [`Scheduler`] drives this loop:
//!
//! 1. A [`Settled`] signal arrives for a function whose analysis has converged
//! 2. The oldest pending address of that function is popped; an empty queue ends the
//!    chain for the function
//! 3. A new settled watch is registered, whatever the outcome of this step
//! 4. A fresh snapshot is taken and the [`Engine`] resolves the address; a recovered
//!    target is queued
//!
//! Queues live in a [`DashMap`] so that hosts may queue addresses from other threads
//! while [`Scheduler::run`] owns dispatch.

use crossbeam_channel::Receiver;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::{
    analysis::{FunctionId, IlFunction},
    binary::{Assembler, BinaryView},
    deobfuscation::{
        engine::Engine,
        events::{EventKind, EventLog},
        queue::TargetQueue,
    },
    Error, Result,
};

/// Notification that the host's analysis of a function has converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Settled {
    /// The function that settled.
    pub function: FunctionId,
}

/// The analysis host the scheduler runs against.
pub trait AnalysisHost {
    /// The host's lifted function type.
    type Function: IlFunction;

    /// A consistent snapshot of the current IL of `function`.
    ///
    /// # Errors
    ///
    /// Returns an error if the function is unknown to the host.
    fn snapshot(&self, function: FunctionId) -> Result<Self::Function>;

    /// The binary's bytes.
    fn view_mut(&mut self) -> &mut dyn BinaryView;

    /// Requests one [`Settled`] signal once `function` has been re-analyzed.
    fn watch_settled(&mut self, function: FunctionId);
}

/// Result of handling one settled signal.
#[derive(Debug)]
pub enum Step {
    /// An edge was recovered and its target queued.
    Resolved {
        /// The address that was resolved.
        address: u64,
        /// The recovered target.
        target: u64,
    },
    /// The popped address could not be resolved.
    Failed {
        /// The address that was attempted.
        address: u64,
        /// Why it failed.
        error: Error,
    },
    /// Nothing was pending for the function.
    Drained,
}

/// Counters of a [`Scheduler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Settled signals received.
    pub signals: usize,
    /// Edges recovered.
    pub resolved: usize,
    /// Failed attempts.
    pub failed: usize,
    /// Signals that found an empty queue.
    pub drained: usize,
}

/// Per-function worklists driven by settled signals.
pub struct Scheduler {
    engine: Engine,
    assembler: Box<dyn Assembler + Send + Sync>,
    queues: DashMap<FunctionId, TargetQueue>,
}

impl Scheduler {
    /// Creates a scheduler using an assembler derived from the engine's configuration.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        let assembler = engine.config().assembler();
        Self {
            engine,
            assembler: Box::new(assembler),
            queues: DashMap::new(),
        }
    }

    /// Replaces the assembler.
    #[must_use]
    pub fn with_assembler(mut self, assembler: Box<dyn Assembler + Send + Sync>) -> Self {
        self.assembler = assembler;
        self
    }

    /// The engine dispatching resolutions.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Events recorded by the engine and the scheduler.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        self.engine.events()
    }

    /// Queues `target` for `function`. Empty and previously seen targets are skipped.
    /// Returns true if the address was accepted.
    pub fn enqueue(&self, function: FunctionId, target: Option<u64>) -> bool {
        let accepted = self.queues.entry(function).or_default().push(target);

        match (accepted, target) {
            (true, Some(address)) => {
                debug!("{function}: queued 0x{address:x}");
                self.events()
                    .record(EventKind::TargetQueued)
                    .at(function, address);
            }
            (false, Some(address)) => {
                debug!("{function}: 0x{address:x} already seen");
                self.events()
                    .record(EventKind::TargetSkipped)
                    .at(function, address)
                    .message("already seen");
            }
            (_, None) => {
                self.events()
                    .record(EventKind::TargetSkipped)
                    .function(function)
                    .message("no target");
            }
        }
        accepted
    }

    /// Number of addresses pending for `function`.
    #[must_use]
    pub fn pending(&self, function: FunctionId) -> usize {
        self.queues.get(&function).map_or(0, |queue| queue.len())
    }

    /// Returns true if no function has pending addresses.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queues.iter().all(|entry| entry.value().is_empty())
    }

    /// Handles one settled signal for `function`.
    ///
    /// Failures are logged and recorded but never propagated; a failed address is not
    /// retried.
    pub fn on_settled<H: AnalysisHost>(&self, host: &mut H, function: FunctionId) -> Step {
        let next = self
            .queues
            .get_mut(&function)
            .and_then(|mut queue| queue.pop());
        let Some(address) = next else {
            debug!("{function}: queue drained");
            self.events()
                .record(EventKind::QueueDrained)
                .function(function);
            return Step::Drained;
        };

        // Every popped address yields one more signal, failed snapshots included.
        host.watch_settled(function);
        let snapshot = match host.snapshot(function) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!("{function}: no snapshot for 0x{address:x}: {error}");
                self.events()
                    .record(EventKind::ResolutionFailed)
                    .at(function, address)
                    .message(error.to_string());
                return Step::Failed { address, error };
            }
        };

        match self
            .engine
            .resolve_at(&snapshot, host.view_mut(), self.assembler.as_ref(), address)
        {
            Ok(target) => {
                self.enqueue(function, Some(target));
                Step::Resolved { address, target }
            }
            Err(error) => Step::Failed { address, error },
        }
    }

    /// Processes settled signals until the channel closes or every queue is drained.
    pub fn run<H: AnalysisHost>(&self, host: &mut H, signals: &Receiver<Settled>) -> RunSummary {
        let mut summary = RunSummary::default();

        while let Ok(signal) = signals.recv() {
            summary.signals += 1;
            match self.on_settled(host, signal.function) {
                Step::Resolved { .. } => summary.resolved += 1,
                Step::Failed { .. } => summary.failed += 1,
                Step::Drained => {
                    summary.drained += 1;
                    if self.is_idle() {
                        break;
                    }
                }
            }
        }

        info!(
            "scheduler finished: {} resolved, {} failed ({})",
            summary.resolved,
            summary.failed,
            self.events().summary()
        );
        summary
    }
}
