//! The instrumentation bridge: a trace object registered with
//! `sys.settrace` for the duration of one session.
//!
//! CPython invokes it on the worker thread for every `call`/`line`/`return`
//! event. `call` and `return` maintain the call-depth counter; `line` events
//! from the user's script are handed to the debug controller, which decides
//! whether to pause the worker. The hook's contract with the interpreter is
//! strict: it returns itself (keeping tracing installed for nested frames)
//! or raises `KeyboardInterrupt`, and nothing else, ever.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pyo3::exceptions::PyKeyboardInterrupt;
use pyo3::prelude::*;

use crate::debugger::{DebugControl, TraceVerdict};
use crate::events::EventRelay;
use crate::executor::CancelToken;

/// Filename CPython assigns to code compiled from submitted source text.
/// Frames from any other file (imported modules) move the depth counter but
/// never pause and never produce line events.
pub(crate) const SCRIPT_FILENAME: &str = "<string>";

pub(crate) const ABORT_MESSAGE: &str = "user aborted execution";

#[pyclass]
pub(crate) struct LineTracer {
    control: Arc<DebugControl>,
    relay: EventRelay,
    cancel: CancelToken,
    delay_ms: Arc<AtomicU64>,
    current_line: Arc<AtomicU32>,
    depth: AtomicU32,
}

impl LineTracer {
    pub(crate) fn new(
        control: Arc<DebugControl>,
        relay: EventRelay,
        cancel: CancelToken,
        delay_ms: Arc<AtomicU64>,
        current_line: Arc<AtomicU32>,
    ) -> Self {
        Self {
            control,
            relay,
            cancel,
            delay_ms,
            current_line,
            depth: AtomicU32::new(0),
        }
    }

    fn handle_line(&self, frame: &Bound<'_, PyAny>) -> PyResult<()> {
        // Abort check comes first and must not block.
        if self.cancel.is_cancelled() {
            return Err(PyKeyboardInterrupt::new_err(ABORT_MESSAGE));
        }

        let filename: String = frame.getattr("f_code")?.getattr("co_filename")?.extract()?;
        if filename != SCRIPT_FILENAME {
            return Ok(());
        }

        let line: u32 = frame.getattr("f_lineno")?.extract()?;
        self.current_line.store(line, Ordering::Relaxed);
        let depth = self.depth.load(Ordering::Relaxed);

        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 && self.control.is_step_active() {
            std::thread::sleep(Duration::from_millis(delay));
        }

        match self.control.on_line(line, depth, &self.relay, &self.cancel) {
            TraceVerdict::Continue => Ok(()),
            TraceVerdict::Interrupt => Err(PyKeyboardInterrupt::new_err(ABORT_MESSAGE)),
        }
    }
}

#[pymethods]
impl LineTracer {
    /// Trace protocol entry point: `tracer(frame, event, arg)`.
    fn __call__<'py>(
        slf: PyRef<'py, Self>,
        frame: Bound<'py, PyAny>,
        event: &str,
        _arg: Bound<'py, PyAny>,
    ) -> PyResult<PyRef<'py, Self>> {
        match event {
            "call" => {
                slf.depth.fetch_add(1, Ordering::Relaxed);
            }
            "return" => {
                let _ = slf
                    .depth
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                        Some(d.saturating_sub(1))
                    });
            }
            "line" => slf.handle_line(&frame)?,
            _ => {}
        }
        Ok(slf)
    }
}
