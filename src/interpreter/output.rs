//! Redirection of the interpreter's standard streams to a host callback.

use std::sync::Arc;

use pyo3::prelude::*;

/// Host-side sink receiving every chunk written to stdout/stderr.
pub type OutputSink = Box<dyn Fn(String) + Send + Sync>;

/// Minimal file-like object installed as `sys.stdout`/`sys.stderr`.
///
/// Only `write` and `flush` exist; that is the whole protocol `print` and
/// traceback rendering need. The sink closure is the only host reference the
/// interpreter side ever holds.
#[pyclass]
struct StreamRedirector {
    sink: Arc<dyn Fn(String) + Send + Sync>,
}

#[pymethods]
impl StreamRedirector {
    fn write(&self, text: &str) -> usize {
        (self.sink)(text.to_owned());
        text.chars().count()
    }

    fn flush(&self) {}
}

/// Previous stream objects, to be put back when the session ends.
pub(crate) struct RedirectGuard {
    saved_stdout: Py<PyAny>,
    saved_stderr: Py<PyAny>,
}

impl RedirectGuard {
    /// Reinstall the saved streams. Must run on every session exit path,
    /// while the interpreter lock is still held.
    pub(crate) fn restore(self, py: Python<'_>) {
        if let Ok(sys) = py.import("sys") {
            let _ = sys.setattr("stdout", self.saved_stdout);
            let _ = sys.setattr("stderr", self.saved_stderr);
        }
    }

    /// Leave the redirector installed permanently (manager-level redirect).
    pub(crate) fn persist(self) {}
}

/// Point both standard streams at `sink`, returning a guard holding the
/// previous stream objects. One shared redirector instance serves both
/// streams, matching how interleaved stdout/stderr output should arrive at
/// the controller as one ordered sequence.
pub(crate) fn install_redirect(py: Python<'_>, sink: OutputSink) -> PyResult<RedirectGuard> {
    let sys = py.import("sys")?;
    let saved_stdout = sys.getattr("stdout")?.unbind();
    let saved_stderr = sys.getattr("stderr")?.unbind();

    let redirector = Py::new(
        py,
        StreamRedirector {
            sink: Arc::from(sink),
        },
    )?;
    sys.setattr("stdout", redirector.clone_ref(py))?;
    sys.setattr("stderr", redirector)?;

    Ok(RedirectGuard {
        saved_stdout,
        saved_stderr,
    })
}
