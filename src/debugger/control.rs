//! The debug controller: a small state machine shared between the
//! controller thread (which issues commands) and the execution worker
//! (which consults it on every traced line and parks on it while paused).
//!
//! Commands never take effect immediately; they are queued as a pending
//! `StepRequest` and materialized by the worker at its next trace callback,
//! where the current call depth is known. While parked the worker keeps the
//! interpreter lock, so nothing here may ever touch interpreter state.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::debugger::{BreakpointSet, DebugState, StepRequest};
use crate::events::{EngineEvent, EventRelay};
use crate::executor::CancelToken;

/// What the instrumentation hook should do after consulting the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TraceVerdict {
    /// Keep executing; the hook returns its neutral status.
    Continue,
    /// Cancellation observed; the hook raises the interruption condition.
    Interrupt,
}

struct ControlInner {
    state: DebugState,
    breakpoints: BreakpointSet,
    pending: Option<StepRequest>,
}

pub struct DebugControl {
    inner: Mutex<ControlInner>,
    resume: Condvar,
}

impl Default for DebugControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugControl {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ControlInner {
                state: DebugState::Running,
                breakpoints: BreakpointSet::new(),
                pending: None,
            }),
            resume: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> DebugState {
        self.lock().state
    }

    /// Replace the whole breakpoint set (the editor owns it; we only test
    /// membership).
    pub fn set_breakpoints(&self, lines: HashSet<u32>) {
        self.lock().breakpoints.replace(lines);
    }

    pub fn continue_execution(&self) {
        self.request(StepRequest::Continue);
    }

    pub fn step_into(&self) {
        self.request(StepRequest::StepInto);
    }

    pub fn step_over(&self) {
        self.request(StepRequest::StepOver);
    }

    pub fn step_out(&self) {
        self.request(StepRequest::StepOut);
    }

    /// Queue a resume command and wake a parked worker. Takes effect at the
    /// next trace callback.
    pub fn request(&self, request: StepRequest) {
        let mut inner = self.lock();
        tracing::debug!(?request, state = ?inner.state, "debug command queued");
        inner.pending = Some(request);
        drop(inner);
        self.resume.notify_all();
    }

    /// True while one of the step modes is active (used for step pacing).
    pub(crate) fn is_step_active(&self) -> bool {
        self.lock().state.is_stepping()
    }

    /// Reset the state machine for a fresh session. A command queued while
    /// idle is kept: it applies to the first statement of the next run,
    /// which is how a front-end asks to stop on entry.
    pub(crate) fn reset_for_run(&self) {
        self.lock().state = DebugState::Running;
    }

    /// Wake a parked worker without queueing a command; pair with a set
    /// cancellation token so the wait loop observes the abort. The lock is
    /// taken before notifying: the cancellation flag lives outside the
    /// mutex, and notifying between the worker's flag check and its wait
    /// would otherwise lose the wakeup.
    pub(crate) fn wake_all(&self) {
        let _inner = self.lock();
        self.resume.notify_all();
    }

    /// Worker-side entry point, called from the instrumentation hook for
    /// every traced script line. May block (while `Paused`) until a resume
    /// command arrives or the session is cancelled.
    pub(crate) fn on_line(
        &self,
        line: u32,
        depth: u32,
        relay: &EventRelay,
        cancel: &CancelToken,
    ) -> TraceVerdict {
        let mut inner = self.lock();

        if let Some(request) = inner.pending.take() {
            inner.state = request.materialize(depth);
            relay.publish(EngineEvent::DebugStateChanged(inner.state));
        }

        if !inner.state.should_pause(line, depth, &inner.breakpoints) {
            if inner.state == DebugState::Running {
                relay.publish(EngineEvent::LineExecuted(line));
            }
            return TraceVerdict::Continue;
        }

        relay.publish(EngineEvent::LineExecuted(line));
        inner.state = DebugState::Paused;
        relay.publish(EngineEvent::DebugStateChanged(DebugState::Paused));
        tracing::debug!(line, depth, "paused");

        loop {
            if cancel.is_cancelled() {
                return TraceVerdict::Interrupt;
            }
            if let Some(request) = inner.pending.take() {
                inner.state = request.materialize(depth);
                relay.publish(EngineEvent::DebugStateChanged(inner.state));
                tracing::debug!(state = ?inner.state, "resumed");
                return TraceVerdict::Continue;
            }
            inner = self
                .resume
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}
