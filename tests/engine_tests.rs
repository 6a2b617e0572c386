// Engine-level tests: interpreter lifecycle, session envelope, admission
// control, and event ordering. These drive the real embedded interpreter,
// and the interpreter (plus its standard streams) is process-global, so
// every test that touches it holds ENGINE_LOCK.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use pyscript_debugger::{
    host_module_factory, CodeRunner, ConfigError, DebugControl, DebugState, EngineEvent,
    ExecError, Interpreter, PythonConfig, RunnerError, HOST_MODULE_NAME,
};

static ENGINE_LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

fn engine_guard() -> MutexGuard<'static, ()> {
    ENGINE_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn setup_engine() -> (Arc<Interpreter>, CodeRunner, Receiver<EngineEvent>) {
    let interpreter = Arc::new(Interpreter::new());
    interpreter
        .initialize(None)
        .expect("interpreter should initialize");
    let control = Arc::new(DebugControl::new());
    let (runner, events) = CodeRunner::new(interpreter.clone(), control);
    (interpreter, runner, events)
}

fn next_event(events: &Receiver<EngineEvent>) -> EngineEvent {
    events
        .recv_timeout(EVENT_TIMEOUT)
        .expect("timed out waiting for engine event")
}

fn drain_until_finished(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events);
        let finished = event == EngineEvent::ExecutionFinished;
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

fn wait_for_pause(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events);
        let paused = event == EngineEvent::DebugStateChanged(DebugState::Paused);
        seen.push(event);
        if paused {
            return seen;
        }
    }
}

// The worker clears the executing flag just after publishing the final
// event, so give it a moment.
fn wait_not_executing(runner: &CodeRunner) {
    for _ in 0..500 {
        if !runner.is_executing() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("runner left executing flag set after session finished");
}

fn collected_output(events: &[EngineEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::OutputReceived(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn error_messages(events: &[EngineEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::ErrorOccurred(message) => Some(message.as_str()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn initialize_twice_returns_success_without_reinitializing() {
        let _guard = engine_guard();

        let interpreter = Interpreter::new();
        assert!(interpreter.initialize(None).is_ok());
        assert!(interpreter.is_initialized());
        assert!(interpreter.initialize(None).is_ok());

        let version = interpreter
            .python_version()
            .expect("version should be readable when initialized");
        assert!(version.contains('.'), "unexpected version: {version}");

        interpreter.cleanup();
        assert!(!interpreter.is_initialized());
        interpreter.cleanup(); // second cleanup is a no-op
    }

    #[test]
    fn cleanup_without_initialize_is_a_noop() {
        let interpreter = Interpreter::new();
        interpreter.cleanup();
        assert!(!interpreter.is_initialized());
        assert!(interpreter.python_version().is_none());

        let err = interpreter
            .execute_code("x = 1", None, None)
            .expect_err("uninitialized interpreter must refuse to execute");
        assert!(matches!(err, ExecError::NotInitialized));
    }

    #[test]
    fn execute_code_reports_python_errors() {
        let _guard = engine_guard();

        let interpreter = Interpreter::new();
        interpreter
            .initialize(None)
            .expect("interpreter should initialize");

        let err = interpreter
            .execute_code("1 / 0", None, None)
            .expect_err("division by zero must surface");
        match err {
            ExecError::Python { message } => {
                assert!(
                    message.contains("ZeroDivisionError"),
                    "unexpected message: {message}"
                );
            }
            other => panic!("expected python error, got {other:?}"),
        }
    }

    #[test]
    fn execute_code_honors_namespace_override() {
        let _guard = engine_guard();

        let interpreter = Interpreter::new();
        interpreter
            .initialize(None)
            .expect("interpreter should initialize");

        let globals = Python::attach(|py| {
            let dict = PyDict::new(py);
            dict.set_item("value", 21).expect("set_item");
            dict.unbind()
        });

        interpreter
            .execute_code("result = value * 2", Some(&globals), None)
            .expect("script should run in the override namespace");

        let result: i64 = Python::attach(|py| {
            globals
                .bind(py)
                .get_item("result")
                .expect("get_item")
                .expect("result should be bound")
                .extract()
                .expect("result should be an int")
        });
        assert_eq!(result, 42);
    }

    #[test]
    fn registered_embedded_module_is_importable() {
        let _guard = engine_guard();

        let interpreter = Arc::new(Interpreter::new());
        interpreter.register_embedded_module(HOST_MODULE_NAME, host_module_factory());
        interpreter
            .initialize(None)
            .expect("interpreter should initialize");

        let globals = Python::attach(|py| PyDict::new(py).unbind());
        interpreter
            .execute_code(
                "import host_module\nsize, text = host_module.test('abc')",
                Some(&globals),
                None,
            )
            .expect("host module should be importable");

        Python::attach(|py| {
            let bound = globals.bind(py);
            let size: usize = bound
                .get_item("size")
                .expect("get_item")
                .expect("size bound")
                .extract()
                .expect("size int");
            let text: String = bound
                .get_item("text")
                .expect("get_item")
                .expect("text bound")
                .extract()
                .expect("text str");
            assert_eq!(size, 3);
            assert!(text.contains("processed by host"), "got: {text}");
        });
    }
}

#[cfg(test)]
mod runner_tests {
    use super::*;

    #[test]
    fn run_refused_when_interpreter_not_initialized() {
        let interpreter = Arc::new(Interpreter::new());
        let control = Arc::new(DebugControl::new());
        let (runner, _events) = CodeRunner::new(interpreter, control);

        assert!(matches!(
            runner.run_code("x = 1"),
            Err(RunnerError::NotInitialized)
        ));
        assert!(!runner.is_executing());
    }

    #[test]
    fn session_event_envelope_is_well_formed() {
        let _guard = engine_guard();
        let (_interpreter, runner, events) = setup_engine();

        runner.run_code("print('hello')").expect("run accepted");
        let seen = drain_until_finished(&events);

        assert_eq!(seen.first(), Some(&EngineEvent::ExecutionStarted));
        assert_eq!(
            seen.get(1),
            Some(&EngineEvent::DebugStateChanged(DebugState::Running))
        );
        assert_eq!(seen.last(), Some(&EngineEvent::ExecutionFinished));
        assert_eq!(collected_output(&seen), "hello\n");
        assert!(error_messages(&seen).is_empty());
        wait_not_executing(&runner);
    }

    #[test]
    fn python_error_is_relayed_once_and_session_recovers() {
        let _guard = engine_guard();
        let (_interpreter, runner, events) = setup_engine();

        runner
            .run_code("raise ValueError('boom')")
            .expect("run accepted");
        let seen = drain_until_finished(&events);

        let errors = error_messages(&seen);
        assert_eq!(errors.len(), 1, "expected one error, got {errors:?}");
        assert!(errors[0].contains("ValueError"), "got: {}", errors[0]);
        assert!(errors[0].contains("boom"), "got: {}", errors[0]);
        assert_eq!(
            seen.iter()
                .filter(|e| **e == EngineEvent::ExecutionFinished)
                .count(),
            1
        );
        wait_not_executing(&runner);

        // The failed session recovered cleanly; the next run is normal.
        runner.run_code("print('next')").expect("run accepted");
        let seen = drain_until_finished(&events);
        assert_eq!(collected_output(&seen), "next\n");
        assert!(error_messages(&seen).is_empty());
        wait_not_executing(&runner);
    }

    #[test]
    fn second_run_is_refused_while_paused() {
        let _guard = engine_guard();
        let (_interpreter, runner, events) = setup_engine();

        runner.set_breakpoints(HashSet::from([2]));
        runner.run_code("a = 1\nb = 2\nc = 3\n").expect("run accepted");
        wait_for_pause(&events);

        assert!(runner.is_executing());
        assert!(matches!(runner.run_code("x = 1"), Err(RunnerError::Busy)));

        runner.continue_execution();
        let rest = drain_until_finished(&events);
        assert!(error_messages(&rest).is_empty());
        wait_not_executing(&runner);
    }

    #[test]
    fn output_order_is_preserved_around_a_pause() {
        let _guard = engine_guard();
        let (_interpreter, runner, events) = setup_engine();

        runner.set_breakpoints(HashSet::from([2]));
        runner
            .run_code("print('A')\nprint('B')\n")
            .expect("run accepted");

        let before = wait_for_pause(&events);
        assert_eq!(collected_output(&before), "A\n");

        runner.continue_execution();
        let after = drain_until_finished(&events);
        assert_eq!(collected_output(&after), "B\n");
        wait_not_executing(&runner);
    }

    #[test]
    fn trace_hook_is_active_inside_a_session() {
        let _guard = engine_guard();
        let (_interpreter, runner, events) = setup_engine();

        runner
            .run_code("import sys\nprint(sys.gettrace() is not None)\n")
            .expect("run accepted");
        let seen = drain_until_finished(&events);
        assert_eq!(collected_output(&seen), "True\n");
        wait_not_executing(&runner);
    }

    #[test]
    fn session_redirection_does_not_leak_into_later_executes() {
        let _guard = engine_guard();
        let (interpreter, runner, events) = setup_engine();

        runner.run_code("print('inside')\n").expect("run accepted");
        let seen = drain_until_finished(&events);
        assert_eq!(collected_output(&seen), "inside\n");
        wait_not_executing(&runner);

        // The session's stream shim must be gone once the run is over.
        interpreter
            .execute_code(
                "import sys\nassert sys.stdout is sys.__stdout__\nassert sys.stderr is sys.__stderr__\n",
                None,
                None,
            )
            .expect("standard streams restored after the session");
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn config_loads_home_and_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("python_config.json");
        std::fs::write(
            &path,
            r#"{"python_home": "/opt/python310", "python_paths": ["/opt/libs", "/opt/more"]}"#,
        )
        .expect("write config");

        let config = PythonConfig::load(&path).expect("config should parse");
        assert_eq!(config.python_home, Some(PathBuf::from("/opt/python310")));
        assert_eq!(
            config.python_paths,
            vec![PathBuf::from("/opt/libs"), PathBuf::from("/opt/more")]
        );
    }

    #[test]
    fn empty_config_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("python_config.json");
        std::fs::write(&path, "{}").expect("write config");

        let config = PythonConfig::load(&path).expect("config should parse");
        assert!(config.python_home.is_none());
        assert!(config.python_paths.is_empty());
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("python_config.json");
        std::fs::write(&path, "not json at all").expect("write config");

        let err = PythonConfig::load(&path).expect_err("must not parse");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_config_is_a_read_error() {
        let err = PythonConfig::load(std::path::Path::new("/does/not/exist.json"))
            .expect_err("must not read");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn add_python_path_ignores_duplicates() {
        let mut config = PythonConfig::default();
        config.add_python_path(PathBuf::from("/opt/libs"));
        config.add_python_path(PathBuf::from("/opt/libs"));
        assert_eq!(config.python_paths.len(), 1);
    }
}
