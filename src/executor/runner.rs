//! The execution engine: schedules code onto the worker thread, owns session
//! admission and cancellation, and guarantees the event envelope
//! (`ExecutionStarted` first, exactly one `ExecutionFinished` last) on every
//! path.
//!
//! Concurrency shape: one long-lived worker thread, reused across sessions,
//! running at most one session at a time. There is no session queue;
//! overlapping run requests are refused, not buffered. The interpreter lock
//! is held for the whole duration of a session, including while parked at a
//! pause point; nothing else may touch interpreter state meanwhile, which
//! is exactly the property a paused script needs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use pyo3::exceptions::PyKeyboardInterrupt;
use pyo3::prelude::*;
use tracing::{debug, error, info, warn};

use crate::debugger::{DebugControl, DebugState};
use crate::error::{ExecError, RunnerError};
use crate::events::{self, EngineEvent, EventRelay};
use crate::executor::bridge::LineTracer;
use crate::executor::CancelToken;
use crate::interpreter::{self, Interpreter, OutputSink};

/// One accepted run request; alive from acceptance until its
/// `ExecutionFinished` has been published.
struct ExecutionSession {
    code: String,
}

struct ExecutingFlagGuard<'a>(&'a AtomicBool);

impl Drop for ExecutingFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CodeRunner {
    interpreter: Arc<Interpreter>,
    control: Arc<DebugControl>,
    executing: Arc<AtomicBool>,
    cancel: CancelToken,
    delay_ms: Arc<AtomicU64>,
    current_line: Arc<AtomicU32>,
    requests: Option<Sender<ExecutionSession>>,
    worker: Option<JoinHandle<()>>,
}

impl CodeRunner {
    /// Create the runner and spawn its single reusable worker thread. The
    /// returned receiver is the controller's end of the event relay.
    pub fn new(
        interpreter: Arc<Interpreter>,
        control: Arc<DebugControl>,
    ) -> (Self, Receiver<EngineEvent>) {
        let (relay, events_rx) = events::channel();
        let (tx, rx) = mpsc::channel::<ExecutionSession>();
        let executing = Arc::new(AtomicBool::new(false));
        let cancel = CancelToken::new();
        let delay_ms = Arc::new(AtomicU64::new(0));
        let current_line = Arc::new(AtomicU32::new(0));

        let worker = {
            let interpreter = interpreter.clone();
            let control = control.clone();
            let executing = executing.clone();
            let cancel = cancel.clone();
            let delay_ms = delay_ms.clone();
            let current_line = current_line.clone();
            std::thread::Builder::new()
                .name("py-exec-worker".into())
                .spawn(move || {
                    while let Ok(session) = rx.recv() {
                        // Cleared on drop so the flag cannot stay stuck even
                        // if a session panics the worker.
                        let _clear = ExecutingFlagGuard(&executing);
                        run_session(
                            &interpreter,
                            &control,
                            &relay,
                            &cancel,
                            &delay_ms,
                            &current_line,
                            session,
                        );
                    }
                    debug!("execution worker shutting down");
                })
                .expect("failed to spawn execution worker")
        };

        (
            Self {
                interpreter,
                control,
                executing,
                cancel,
                delay_ms,
                current_line,
                requests: Some(tx),
                worker: Some(worker),
            },
            events_rx,
        )
    }

    /// Schedule `code` to run on the worker thread; returns immediately.
    /// Refused while a session is active or the interpreter is down.
    pub fn run_code(&self, code: &str) -> Result<(), RunnerError> {
        if !self.interpreter.is_initialized() {
            warn!("run request refused: interpreter not initialized");
            return Err(RunnerError::NotInitialized);
        }
        if self
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("run request refused: code execution already in progress");
            return Err(RunnerError::Busy);
        }

        self.cancel.reset();
        self.control.reset_for_run();
        self.current_line.store(0, Ordering::Relaxed);

        let accepted = self
            .requests
            .as_ref()
            .map(|tx| {
                tx.send(ExecutionSession {
                    code: code.to_owned(),
                })
                .is_ok()
            })
            .unwrap_or(false);
        if !accepted {
            self.executing.store(false, Ordering::SeqCst);
            error!("run request refused: execution worker is gone");
            return Err(RunnerError::WorkerUnavailable);
        }
        Ok(())
    }

    /// Request cooperative cancellation of the active session. Observed at
    /// the next traced line (or the completion boundary); also wakes a
    /// worker parked at a pause point. No-op when nothing is running.
    pub fn abort_execution(&self) {
        self.cancel.cancel();
        self.control.wake_all();
    }

    /// Per-line pacing for the step modes, in milliseconds.
    pub fn set_execution_delay(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::Relaxed);
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    /// Script line of the most recent trace event in the active session.
    pub fn current_line(&self) -> Option<u32> {
        match self.current_line.load(Ordering::Relaxed) {
            0 => None,
            line => Some(line),
        }
    }

    pub fn debug_state(&self) -> DebugState {
        self.control.state()
    }

    pub fn set_breakpoints(&self, lines: HashSet<u32>) {
        self.control.set_breakpoints(lines);
    }

    pub fn continue_execution(&self) {
        self.control.continue_execution();
    }

    pub fn step_into(&self) {
        self.control.step_into();
    }

    pub fn step_over(&self) {
        self.control.step_over();
    }

    pub fn step_out(&self) {
        self.control.step_out();
    }
}

impl Drop for CodeRunner {
    fn drop(&mut self) {
        // Unblock a session parked at a pause point, close the request
        // channel, then wait the worker out.
        self.cancel.cancel();
        self.control.wake_all();
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("execution worker panicked during shutdown");
            }
        }
    }
}

/// Worker-side session envelope: publishes `ExecutionStarted`, runs the
/// code, relays at most one error, and always publishes exactly one
/// `ExecutionFinished`.
fn run_session(
    interpreter: &Interpreter,
    control: &Arc<DebugControl>,
    relay: &EventRelay,
    cancel: &CancelToken,
    delay_ms: &Arc<AtomicU64>,
    current_line: &Arc<AtomicU32>,
    session: ExecutionSession,
) {
    relay.publish(EngineEvent::ExecutionStarted);
    relay.publish(EngineEvent::DebugStateChanged(control.state()));
    debug!(bytes = session.code.len(), "session started");

    let outcome = execute_python_code_safely(
        interpreter,
        control,
        relay,
        cancel,
        delay_ms,
        current_line,
        &session.code,
    );

    match outcome {
        Ok(()) => info!("session completed"),
        Err(ExecError::Interrupted) => {
            info!("session aborted by user");
            relay.publish(EngineEvent::ErrorOccurred(
                ExecError::Interrupted.to_string(),
            ));
        }
        Err(ExecError::Python { message }) => {
            warn!("session failed with python error");
            relay.publish(EngineEvent::ErrorOccurred(message));
        }
        Err(other) => {
            warn!(%other, "session failed");
            relay.publish(EngineEvent::ErrorOccurred(other.to_string()));
        }
    }

    relay.publish(EngineEvent::ExecutionFinished);
}

/// The body of one session, entirely inside one scoped lock acquisition.
/// The trace hook and stream redirection are uninstalled on every exit path
/// before the lock is released; no error propagates past this function.
fn execute_python_code_safely(
    interpreter: &Interpreter,
    control: &Arc<DebugControl>,
    relay: &EventRelay,
    cancel: &CancelToken,
    delay_ms: &Arc<AtomicU64>,
    current_line: &Arc<AtomicU32>,
    code: &str,
) -> Result<(), ExecError> {
    interpreter.ensure_initialized()?;

    Python::attach(|py| {
        let sys = py.import("sys").map_err(|e| python_error(py, e))?;
        let settrace = sys.getattr("settrace").map_err(|e| python_error(py, e))?;

        let tracer = Py::new(
            py,
            LineTracer::new(
                control.clone(),
                relay.clone(),
                cancel.clone(),
                delay_ms.clone(),
                current_line.clone(),
            ),
        )
        .map_err(|e| python_error(py, e))?;
        settrace
            .call1((tracer,))
            .map_err(|e| python_error(py, e))?;

        let redirect = match interpreter::install_redirect(py, output_sink(relay.clone())) {
            Ok(guard) => guard,
            Err(e) => {
                let _ = settrace.call1((py.None(),));
                return Err(python_error(py, e));
            }
        };

        let result = interpreter::run_source(py, code, None, None);

        let _ = settrace.call1((py.None(),));
        redirect.restore(py);

        match result {
            Ok(()) => {
                if cancel.is_cancelled() {
                    Err(ExecError::Interrupted)
                } else {
                    Ok(())
                }
            }
            Err(err) => {
                if cancel.is_cancelled() && err.is_instance_of::<PyKeyboardInterrupt>(py) {
                    Err(ExecError::Interrupted)
                } else {
                    Err(python_error(py, err))
                }
            }
        }
    })
}

fn python_error(py: Python<'_>, err: PyErr) -> ExecError {
    ExecError::Python {
        message: interpreter::render_python_error(py, &err),
    }
}

fn output_sink(relay: EventRelay) -> OutputSink {
    Box::new(move |text| relay.publish(EngineEvent::OutputReceived(text)))
}
