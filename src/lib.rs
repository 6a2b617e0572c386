//! Embedded-Python execution and debug-control engine.
//!
//! Runs user scripts on a dedicated worker thread inside an embedded CPython
//! interpreter, with per-line tracing for highlighting, breakpoint pausing,
//! and single-stepping. The controller thread drives the run through
//! [`CodeRunner`] and [`DebugControl`] and observes everything through the
//! ordered [`EngineEvent`] channel; it never touches interpreter state while
//! a session is live.

pub mod config;
pub mod debugger;
pub mod error;
pub mod events;
pub mod executor;
pub mod interpreter;

pub use config::PythonConfig;
pub use debugger::{BreakpointSet, DebugControl, DebugState, StepRequest};
pub use error::{ConfigError, ExecError, InitError, RunnerError};
pub use events::{EngineEvent, EventRelay};
pub use executor::{CancelToken, CodeRunner};
pub use interpreter::{host_module_factory, Interpreter, ModuleFactory, OutputSink, HOST_MODULE_NAME};
