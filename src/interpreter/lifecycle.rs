//! Interpreter lifecycle management.
//!
//! One `Interpreter` handle owns process-wide interpreter state: bring-up,
//! environment preparation, embedded-module installation, teardown, and the
//! scoped-lock `execute_code` entry point. The GIL itself is managed by
//! pyo3: after `Python::initialize()` no thread holds it, and every touch of
//! interpreter state below happens inside a `Python::attach` scope, which
//! guarantees release on all exit paths.
//!
//! `initialize` and `cleanup` mutate process-wide state and must be
//! serialized by the caller (in practice: called only from the controller
//! thread, never while a session is executing).

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::{debug, info, warn};

use crate::config::PythonConfig;
use crate::error::{ExecError, InitError};
use crate::interpreter::embedded::{ModuleFactory, ModuleRegistry};
use crate::interpreter::output::{self, OutputSink};

struct InterpreterState {
    initialized: bool,
    config: PythonConfig,
    modules: ModuleRegistry,
}

/// Process-scoped interpreter handle. Construct one at assembly time and
/// share it (`Arc`) with the execution engine; "one interpreter per process"
/// is a property of the underlying runtime, not of this type.
pub struct Interpreter {
    state: Mutex<InterpreterState>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InterpreterState {
                initialized: false,
                config: PythonConfig::default(),
                modules: ModuleRegistry::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InterpreterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), ExecError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ExecError::NotInitialized)
        }
    }

    /// Bring the interpreter up using the configuration at `config_file`
    /// (or defaults when `None`). Idempotent: a second call returns success
    /// without reinitializing. On failure the handle stays uninitialized and
    /// the call may be retried.
    pub fn initialize(&self, config_file: Option<&Path>) -> Result<(), InitError> {
        let config = match config_file {
            Some(path) => PythonConfig::load(path)?,
            None => PythonConfig::default(),
        };
        self.initialize_with(config)
    }

    pub fn initialize_with(&self, config: PythonConfig) -> Result<(), InitError> {
        let mut state = self.lock();
        if state.initialized {
            debug!("python interpreter already initialized");
            return Ok(());
        }

        if config.python_home.is_some() {
            state.config.python_home = config.python_home;
        }
        for path in config.python_paths {
            state.config.add_python_path(path);
        }

        prepare_environment(&state.config)?;
        Python::initialize();

        let version = Python::attach(|py| -> PyResult<String> {
            state.modules.install_all(py)?;
            extend_sys_path(py, &state.config.python_paths)?;
            py.import("sys")?.getattr("version")?.extract::<String>()
        })
        .map_err(|err| {
            InitError::Interpreter(Python::attach(|py| render_python_error(py, &err)))
        })?;

        state.initialized = true;
        info!(%version, "python interpreter initialized");
        Ok(())
    }

    /// Tear down this handle's interpreter state. Idempotent; a no-op when
    /// not initialized. pyo3 cannot safely finalize an embedded runtime, so
    /// the runtime itself stays resident: teardown restores the default
    /// standard streams and drops our bookkeeping, which is everything a
    /// later `initialize` needs to start clean.
    pub fn cleanup(&self) {
        let mut state = self.lock();
        if !state.initialized {
            return;
        }

        let restored = Python::attach(|py| -> PyResult<()> {
            let sys = py.import("sys")?;
            sys.setattr("stdout", sys.getattr("__stdout__")?)?;
            sys.setattr("stderr", sys.getattr("__stderr__")?)?;
            Ok(())
        });
        if restored.is_err() {
            warn!("could not restore default interpreter streams");
        }

        state.initialized = false;
        info!("python interpreter shut down (runtime stays resident for this process)");
    }

    /// Run `code` in the interpreter under a scoped lock acquisition.
    /// `globals`/`locals` select the namespace; both `None` executes in the
    /// `__main__` module namespace.
    pub fn execute_code(
        &self,
        code: &str,
        globals: Option<&Py<PyDict>>,
        locals: Option<&Py<PyDict>>,
    ) -> Result<(), ExecError> {
        self.ensure_initialized()?;
        Python::attach(|py| {
            let globals = globals.map(|g| g.bind(py));
            let locals = locals.map(|l| l.bind(py));
            run_source(py, code, globals, locals).map_err(|err| {
                let message = render_python_error(py, &err);
                tracing::error!(%message, "python execution error");
                ExecError::Python { message }
            })
        })
    }

    /// Permanently point the interpreter's stdout/stderr at `sink`.
    /// Re-installable at any time; each call captures a fresh sink.
    pub fn redirect_output(&self, sink: OutputSink) -> Result<(), ExecError> {
        self.ensure_initialized()?;
        Python::attach(|py| match output::install_redirect(py, sink) {
            Ok(guard) => {
                guard.persist();
                Ok(())
            }
            Err(err) => Err(ExecError::Python {
                message: render_python_error(py, &err),
            }),
        })
    }

    /// Make a host capability importable as `name`. Takes effect at the
    /// next interpreter bring-up.
    pub fn register_embedded_module(&self, name: &str, factory: ModuleFactory) {
        let mut state = self.lock();
        if state.initialized {
            warn!(
                module = name,
                "module registered after bring-up; takes effect on next initialize"
            );
        }
        state.modules.register(name, factory);
    }

    pub fn set_python_home(&self, path: PathBuf) {
        let mut state = self.lock();
        if state.initialized {
            warn!("python home change takes effect on next bring-up");
        }
        state.config.python_home = Some(path);
    }

    pub fn add_python_path(&self, path: PathBuf) {
        let mut state = self.lock();
        state.config.add_python_path(path.clone());
        if state.initialized {
            let appended = Python::attach(|py| extend_sys_path(py, &[path]));
            if appended.is_err() {
                warn!("could not append to sys.path");
            }
        }
    }

    /// The interpreter's `sys.version` string, when initialized.
    pub fn python_version(&self) -> Option<String> {
        if !self.is_initialized() {
            return None;
        }
        Python::attach(|py| {
            py.import("sys")
                .ok()?
                .getattr("version")
                .ok()?
                .extract::<String>()
                .ok()
        })
    }

    /// The effective module search path: `sys.path` when initialized, the
    /// configured list otherwise.
    pub fn python_paths(&self) -> Vec<PathBuf> {
        {
            let state = self.lock();
            if !state.initialized {
                return state.config.python_paths.clone();
            }
        }
        Python::attach(|py| {
            py.import("sys")
                .and_then(|sys| sys.getattr("path"))
                .and_then(|path| path.extract::<Vec<String>>())
                .map(|paths| paths.into_iter().map(PathBuf::from).collect())
                .unwrap_or_default()
        })
    }
}

/// Execute `code` with the lock already held. Shared by `execute_code` and
/// the session worker (which wraps it with tracing and stream redirection).
pub(crate) fn run_source<'py>(
    py: Python<'py>,
    code: &str,
    globals: Option<&Bound<'py, PyDict>>,
    locals: Option<&Bound<'py, PyDict>>,
) -> PyResult<()> {
    let source = CString::new(code)
        .map_err(|_| PyValueError::new_err("source text contains a NUL byte"))?;
    py.run(source.as_c_str(), globals, locals)
}

/// Render a Python exception as the user-facing error text, traceback
/// included when one exists.
pub(crate) fn render_python_error(py: Python<'_>, err: &PyErr) -> String {
    let rendered = err.to_string();
    match err.traceback(py) {
        Some(tb) => match tb.format() {
            Ok(trace) => format!("{trace}{rendered}"),
            Err(_) => rendered,
        },
        None => rendered,
    }
}

/// Export PYTHONHOME and extend PATH before bring-up, as the configured
/// interpreter location requires. No-op without a configured home.
fn prepare_environment(config: &PythonConfig) -> Result<(), InitError> {
    let Some(home) = &config.python_home else {
        return Ok(());
    };
    if !home.is_dir() {
        return Err(InitError::Environment(format!(
            "python home {} does not exist",
            home.display()
        )));
    }

    std::env::set_var("PYTHONHOME", home);

    let current = std::env::var_os("PATH").unwrap_or_default();
    let mut entries = vec![home.join("bin"), home.clone()];
    entries.extend(std::env::split_paths(&current));
    let joined =
        std::env::join_paths(entries).map_err(|err| InitError::Environment(err.to_string()))?;
    std::env::set_var("PATH", joined);

    debug!(home = %home.display(), "interpreter environment prepared");
    Ok(())
}

/// Append each configured directory that exists to `sys.path`.
fn extend_sys_path(py: Python<'_>, paths: &[PathBuf]) -> PyResult<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let sys_path = py.import("sys")?.getattr("path")?;
    for path in paths {
        if path.is_dir() {
            sys_path.call_method1("append", (path.to_string_lossy().into_owned(),))?;
        } else {
            warn!(path = %path.display(), "skipping missing python path");
        }
    }
    Ok(())
}
