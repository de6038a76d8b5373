//! Run a unit of work as a named command with output capture.
//!
//! ```text
//! Idle → Announced → Redirecting → Invoking → Classifying → Reporting → Done
//! ```
//!
//! 1. print the title (verbose)
//! 2. activate redirection for the configured pipes
//! 3. call the unit, catching errors and panics
//! 4. classify the outcome into a [`CmdResult`]
//! 5. tear redirection down, attach captured output, print the status line
//!
//! Error text for failed units is written to [`stream::err()`] while the
//! redirection is still active, so it shows up live and in captured stderr.
//!
//! # Example
//!
//! ```no_run
//! use cmdwrap::{Command, Outcome, Pipe};
//!
//! let result = Command::new("greet")
//!     .stdout(Pipe::new().mute(true))
//!     .run(|| {
//!         cmdwrap::outln!("hello");
//!         Ok(Outcome::Value(42))
//!     })?;
//! assert_eq!(result.stdout, "hello\n");
//! assert_eq!(result.value, Some(42));
//! # anyhow::Ok(())
//! ```

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::capture::{Pipe, Redirection, StderrTarget};
use crate::error::ProcessError;
use crate::report::{print_status, print_title};
use crate::result::{CmdResult, Outcome};
use crate::stream;

/// Control parameters for one command invocation.
///
/// Loadable from TOML:
///
/// ```toml
/// verbose = false
/// stderr = "merge"
///
/// [stdout]
/// fd = true
/// tty = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandOptions {
    /// Print the title and status line
    pub verbose: bool,
    /// Colorize the title and status line
    pub color: bool,
    /// Capture stdout; `None` leaves it alone
    pub stdout: Option<Pipe>,
    /// Capture stderr, or merge it into stdout's capture
    pub stderr: Option<StderrTarget>,
    /// Turn errors and panics into a failed result instead of propagating
    pub catch_err: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            verbose: true,
            color: true,
            stdout: None,
            stderr: None,
            catch_err: true,
        }
    }
}

impl CommandOptions {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("Failed to parse command options")
    }
}

/// A named command. Cheap to build; reusable across runs.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    options: CommandOptions,
}

/// How the unit of work ended when it didn't produce an outcome
enum Failure {
    Error(anyhow::Error),
    Panic(Box<dyn Any + Send>),
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: CommandOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.options.verbose = verbose;
        self
    }

    pub fn color(mut self, color: bool) -> Self {
        self.options.color = color;
        self
    }

    pub fn stdout(mut self, pipe: Pipe) -> Self {
        self.options.stdout = Some(pipe);
        self
    }

    pub fn stderr(mut self, target: impl Into<StderrTarget>) -> Self {
        self.options.stderr = Some(target.into());
        self
    }

    pub fn catch_err(mut self, catch_err: bool) -> Self {
        self.options.catch_err = catch_err;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CommandOptions {
        &self.options
    }

    /// Run `unit` and return its classified result.
    ///
    /// Returns `Err` only when redirection can't be set up, or when the unit
    /// fails and `catch_err` is off. A panic with `catch_err` off resumes
    /// unwinding after the streams are restored.
    pub fn run<T, F>(&self, unit: F) -> anyhow::Result<CmdResult<T>>
    where
        F: FnOnce() -> anyhow::Result<Outcome<T>>,
    {
        let opts = &self.options;
        if opts.verbose {
            print_title(&self.name, opts.color, &mut stream::out())?;
        }

        let redirection = Redirection::activate(opts.stdout.as_ref(), opts.stderr.as_ref())
            .with_context(|| format!("Failed to capture output of {}", self.name))?;

        let (mut result, failure) = match panic::catch_unwind(AssertUnwindSafe(unit)) {
            Ok(Ok(Outcome::Value(value))) => (CmdResult::ok(&self.name, value), None),
            Ok(Ok(Outcome::Result(partial))) => (partial.normalize(&self.name), None),
            Ok(Err(err)) => {
                let code = report_error(&err);
                (CmdResult::failed(&self.name, code), Some(Failure::Error(err)))
            }
            Err(payload) => {
                let _ = writeln!(stream::err(), "{}", panic_message(payload.as_ref()));
                (CmdResult::failed(&self.name, 1), Some(Failure::Panic(payload)))
            }
        };

        let captures = redirection.finish();
        result.attach(captures.stdout, captures.stderr);

        if !opts.catch_err {
            match failure {
                Some(Failure::Error(err)) => return Err(err),
                Some(Failure::Panic(payload)) => panic::resume_unwind(payload),
                None => {}
            }
        }

        if opts.verbose {
            print_status(&result, opts.color, &mut stream::out())?;
        }
        log::debug!(
            "{} finished: code={} status={}",
            result.name,
            result.code,
            result.status
        );
        Ok(result)
    }

    /// Run a unit that returns a plain value
    pub fn run_value<T, F>(&self, unit: F) -> anyhow::Result<CmdResult<T>>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.run(|| unit().map(Outcome::Value))
    }
}

/// Write the error's description to the error stream; return the exit code to report
fn report_error(err: &anyhow::Error) -> i32 {
    let mut sink = stream::err();
    match err.downcast_ref::<ProcessError>() {
        Some(process) => {
            match process.stderr.as_deref().filter(|s| !s.is_empty()) {
                Some(stderr) => {
                    let _ = sink.write_all(stderr.as_bytes());
                    if !stderr.ends_with('\n') {
                        let _ = writeln!(sink);
                    }
                }
                None => {
                    let _ = writeln!(sink, "{process}");
                }
            }
            process.code
        }
        None => {
            let _ = writeln!(sink, "{err:#}");
            1
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
