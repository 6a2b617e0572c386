//! Cross-thread event relay.
//!
//! The worker publishes everything it observes (lines, output chunks,
//! errors, state changes) into one channel so the controller sees events in
//! exactly the order they happened. Sends never block the worker.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::debugger::DebugState;

/// One event flowing from the execution worker to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    ExecutionStarted,
    ExecutionFinished,
    /// A statement on this (1-based) script line is about to execute.
    LineExecuted(u32),
    /// A chunk written to the interpreter's stdout/stderr.
    OutputReceived(String),
    ErrorOccurred(String),
    DebugStateChanged(DebugState),
}

/// Cloneable publishing half of the relay, handed to the worker and the
/// instrumentation hook.
#[derive(Clone)]
pub struct EventRelay {
    tx: Sender<EngineEvent>,
}

impl EventRelay {
    pub fn publish(&self, event: EngineEvent) {
        // A dropped controller receiver only means nobody is listening any
        // more; the worker must keep draining its session regardless.
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped: controller receiver is gone");
        }
    }
}

/// Create a relay and the controller-side receiver that drains it.
pub fn channel() -> (EventRelay, Receiver<EngineEvent>) {
    let (tx, rx) = mpsc::channel();
    (EventRelay { tx }, rx)
}
