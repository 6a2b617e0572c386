//! Interactive command-line front-end (the controller context).
//!
//! Loads a script, brings the interpreter up, runs the script through the
//! engine, and drives pause points from stdin while draining the event
//! channel. Script output goes to stdout; everything else goes to stderr.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use pyscript_debugger::{
    host_module_factory, CodeRunner, DebugControl, DebugState, EngineEvent, Interpreter,
    PythonConfig, HOST_MODULE_NAME,
};

struct Options {
    script: PathBuf,
    config_file: Option<PathBuf>,
    breakpoints: HashSet<u32>,
    stop_on_entry: bool,
    delay_ms: u64,
    verbose: bool,
}

impl Options {
    fn parse<I: Iterator<Item = String>>(mut args: I) -> Result<Self> {
        let mut script = None;
        let mut config_file = None;
        let mut breakpoints = HashSet::new();
        let mut stop_on_entry = true;
        let mut delay_ms = 0u64;
        let mut verbose = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config_file = Some(PathBuf::from(
                        args.next().context("--config needs a file path")?,
                    ));
                }
                "--break" | "-b" => {
                    let list = args.next().context("--break needs line numbers")?;
                    for part in list.split(',') {
                        let line = part
                            .trim()
                            .parse::<u32>()
                            .with_context(|| format!("invalid breakpoint line: {part}"))?;
                        breakpoints.insert(line);
                    }
                }
                "--delay" => {
                    delay_ms = args
                        .next()
                        .context("--delay needs milliseconds")?
                        .parse()
                        .context("invalid --delay value")?;
                }
                "--run" => stop_on_entry = false,
                "-v" | "--verbose" => verbose = true,
                "-h" | "--help" => {
                    print_usage();
                    std::process::exit(0);
                }
                other if script.is_none() && !other.starts_with('-') => {
                    script = Some(PathBuf::from(other));
                }
                other => bail!("unexpected argument: {other}"),
            }
        }

        Ok(Self {
            script: script.context(
                "usage: pyscript-debugger <script.py> [--config <file>] [--break <lines>] [--run]",
            )?,
            config_file,
            breakpoints,
            stop_on_entry,
            delay_ms,
            verbose,
        })
    }
}

fn print_usage() {
    eprintln!("usage: pyscript-debugger <script.py> [options]");
    eprintln!();
    eprintln!("options:");
    eprintln!("  --config <file>    interpreter config (python_home, python_paths)");
    eprintln!("  --break <lines>    comma-separated breakpoint lines, e.g. 3,7");
    eprintln!("  --delay <ms>       per-line delay while stepping");
    eprintln!("  --run              start free-running instead of stopping on entry");
    eprintln!("  -v, --verbose      debug logging");
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let options = Options::parse(std::env::args().skip(1))?;
    init_tracing(options.verbose);

    let config = match &options.config_file {
        Some(path) => PythonConfig::load(path)?,
        None => PythonConfig::default(),
    }
    .detect_python_home();

    let source = std::fs::read_to_string(&options.script)
        .with_context(|| format!("could not read script {}", options.script.display()))?;

    let interpreter = Arc::new(Interpreter::new());
    interpreter.register_embedded_module(HOST_MODULE_NAME, host_module_factory());
    interpreter.initialize_with(config)?;

    let control = Arc::new(DebugControl::new());
    let (runner, events) = CodeRunner::new(interpreter.clone(), control);

    let mut breakpoints = options.breakpoints.clone();
    runner.set_breakpoints(breakpoints.clone());
    if options.delay_ms > 0 {
        runner.set_execution_delay(options.delay_ms);
    }
    if options.stop_on_entry {
        // Queued while idle, so it applies at the run's first statement.
        runner.step_into();
    }

    runner
        .run_code(&source)
        .map_err(|err| anyhow::anyhow!("run request refused: {err}"))?;

    debug_loop(&runner, &events, &source, &mut breakpoints)?;

    drop(runner);
    interpreter.cleanup();
    Ok(())
}

fn debug_loop(
    runner: &CodeRunner,
    events: &Receiver<EngineEvent>,
    source: &str,
    breakpoints: &mut HashSet<u32>,
) -> Result<()> {
    let source_lines: Vec<&str> = source.lines().collect();
    let mut current_line = 0u32;

    for event in events.iter() {
        match event {
            EngineEvent::ExecutionStarted => eprintln!("--- execution started ---"),
            EngineEvent::OutputReceived(text) => {
                print!("{text}");
                io::stdout().flush().ok();
            }
            EngineEvent::LineExecuted(line) => {
                current_line = line;
                debug!(line, "line executed");
            }
            EngineEvent::DebugStateChanged(DebugState::Paused) => {
                show_pause_banner(current_line, &source_lines);
                prompt(runner, breakpoints)?;
            }
            EngineEvent::DebugStateChanged(state) => debug!(?state, "debug state changed"),
            EngineEvent::ErrorOccurred(message) => eprintln!("{message}"),
            EngineEvent::ExecutionFinished => {
                eprintln!("--- execution finished ---");
                break;
            }
        }
    }
    Ok(())
}

fn show_pause_banner(line: u32, source_lines: &[&str]) {
    eprintln!();
    match line
        .checked_sub(1)
        .and_then(|idx| source_lines.get(idx as usize))
    {
        Some(text) => eprintln!("stopped at line {line}: {text}"),
        None => eprintln!("stopped at line {line}"),
    }
}

/// Read resume commands from stdin until one of them resumes or aborts the
/// worker. The worker is parked while this runs, so blocking on stdin here
/// is safe.
fn prompt(runner: &CodeRunner, breakpoints: &mut HashSet<u32>) -> Result<()> {
    let stdin = io::stdin();
    loop {
        eprintln!(
            "commands: (c)ontinue, (n)ext/stepOver, (s)tepIn, (o)ut/stepOut, (b)reak <line>, (q)uit"
        );
        eprint!("> ");
        io::stderr().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            // stdin closed; let the script run to completion
            runner.continue_execution();
            return Ok(());
        }

        let tokens = shlex::split(input.trim()).unwrap_or_default();
        match tokens.first().map(String::as_str) {
            Some("c") | Some("continue") => {
                runner.continue_execution();
                return Ok(());
            }
            Some("n") | Some("next") | Some("stepOver") => {
                runner.step_over();
                return Ok(());
            }
            Some("s") | Some("stepIn") | Some("stepInto") => {
                runner.step_into();
                return Ok(());
            }
            Some("o") | Some("out") | Some("stepOut") => {
                runner.step_out();
                return Ok(());
            }
            Some("q") | Some("quit") => {
                runner.abort_execution();
                return Ok(());
            }
            Some("b") | Some("break") => match tokens.get(1).and_then(|t| t.parse::<u32>().ok()) {
                Some(target) => {
                    if !breakpoints.insert(target) {
                        breakpoints.remove(&target);
                    }
                    runner.set_breakpoints(breakpoints.clone());
                    let mut sorted: Vec<_> = breakpoints.iter().collect();
                    sorted.sort();
                    eprintln!("breakpoints: {sorted:?}");
                }
                None => eprintln!("invalid line number"),
            },
            None => {
                // Empty input steps to the next statement
                runner.step_into();
                return Ok(());
            }
            Some(other) => eprintln!("unknown command: {other}"),
        }
    }
}
