mod embedded;
mod lifecycle;
mod output;

pub use embedded::{host_module_factory, ModuleFactory, HOST_MODULE_NAME};
pub use lifecycle::Interpreter;
pub use output::OutputSink;

pub(crate) use lifecycle::{render_python_error, run_source};
pub(crate) use output::install_redirect;
