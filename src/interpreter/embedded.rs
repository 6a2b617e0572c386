//! Host-provided modules importable from inside the interpreter.

use pyo3::prelude::*;
use pyo3::types::PyDict;

/// Builds the body of one embedded module when the interpreter comes up.
pub type ModuleFactory =
    Box<dyn Fn(Python<'_>, &Bound<'_, PyModule>) -> PyResult<()> + Send + Sync>;

/// Registered host modules, materialized at interpreter bring-up.
#[derive(Default)]
pub(crate) struct ModuleRegistry {
    entries: Vec<(String, ModuleFactory)>,
}

impl ModuleRegistry {
    pub(crate) fn register(&mut self, name: &str, factory: ModuleFactory) {
        tracing::debug!(module = name, "embedded module registered");
        self.entries.push((name.to_owned(), factory));
    }

    /// Build every registered module and publish it in `sys.modules` so the
    /// interpreter resolves `import <name>` to it.
    pub(crate) fn install_all(&self, py: Python<'_>) -> PyResult<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let modules = py
            .import("sys")?
            .getattr("modules")?
            .downcast_into::<PyDict>()?;
        for (name, factory) in &self.entries {
            let module = PyModule::new(py, name)?;
            factory(py, &module)?;
            modules.set_item(name, module)?;
            tracing::debug!(module = name.as_str(), "embedded module installed");
        }
        Ok(())
    }
}

/// Name under which the built-in host capability module is importable.
pub const HOST_MODULE_NAME: &str = "host_module";

#[pyfunction]
fn test(input: &str) -> (usize, String) {
    (input.len(), format!("processed by host: {input}"))
}

#[pyfunction]
fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Factory for the built-in host module: a `test` round-trip function and
/// `get_version`, mirroring what the desktop front-end exposes to scripts.
pub fn host_module_factory() -> ModuleFactory {
    Box::new(|_py, module| {
        module.add_function(wrap_pyfunction!(test, module)?)?;
        module.add_function(wrap_pyfunction!(get_version, module)?)?;
        Ok(())
    })
}
