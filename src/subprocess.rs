//! Stream a child process's output line by line.
//!
//! Each piped stream of the child gets a reader thread that sends complete
//! lines (lossy UTF-8, newline kept) over a channel. The consumer waits on both
//! channels at once, so output shows up as soon as the child writes it.
//!
//! ```no_run
//! use cmdwrap::{SubprocessOptions, run_subprocess};
//!
//! let opts = SubprocessOptions::new().save_stdout(true).allow("1".parse()?);
//! let done = run_subprocess(&["grep", "needle", "haystack.txt"], &opts)?;
//! println!("grep exited {}: {:?}", done.code, done.stdout);
//! # anyhow::Ok(())
//! ```

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use crossbeam_channel::{Receiver, never, select, unbounded};

use crate::error::ProcessError;
use crate::shell_exec::ShellConfig;
use crate::stream;

/// Nonzero exit codes that don't count as failure. Zero is always allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedExit {
    Codes(BTreeSet<i32>),
    Any,
}

impl Default for AllowedExit {
    fn default() -> Self {
        AllowedExit::Codes(BTreeSet::new())
    }
}

impl AllowedExit {
    pub fn allows(&self, code: i32) -> bool {
        code == 0
            || match self {
                AllowedExit::Codes(codes) => codes.contains(&code),
                AllowedExit::Any => true,
            }
    }
}

impl FromStr for AllowedExit {
    type Err = anyhow::Error;

    /// `"*"` allows everything; otherwise a comma-separated list like `"1,42"`
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(AllowedExit::Any);
        }
        if s.is_empty() {
            return Ok(AllowedExit::default());
        }
        let codes = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<i32>()
                    .with_context(|| format!("Invalid exit code '{part}'"))
            })
            .collect::<anyhow::Result<BTreeSet<_>>>()?;
        Ok(AllowedExit::Codes(codes))
    }
}

/// How to run and observe a child process
#[derive(Debug, Clone)]
pub struct SubprocessOptions {
    pub save_stdout: bool,
    pub save_stderr: bool,
    pub mute_stdout: bool,
    pub mute_stderr: bool,
    pub allowed: AllowedExit,
    /// How long to wait for output before checking whether the child exited
    pub interval: Duration,
    pub cwd: Option<PathBuf>,
    /// Run through the platform shell instead of executing `argv[0]`
    pub shell: bool,
}

impl Default for SubprocessOptions {
    fn default() -> Self {
        Self {
            save_stdout: false,
            save_stderr: false,
            mute_stdout: false,
            mute_stderr: false,
            allowed: AllowedExit::default(),
            interval: Duration::from_millis(10),
            cwd: None,
            shell: false,
        }
    }
}

impl SubprocessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_stdout(mut self, save: bool) -> Self {
        self.save_stdout = save;
        self
    }

    pub fn save_stderr(mut self, save: bool) -> Self {
        self.save_stderr = save;
        self
    }

    pub fn mute_stdout(mut self, mute: bool) -> Self {
        self.mute_stdout = mute;
        self
    }

    pub fn mute_stderr(mut self, mute: bool) -> Self {
        self.mute_stderr = mute;
        self
    }

    pub fn allow(mut self, allowed: AllowedExit) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }
}

/// A child that ran to completion with an allowed exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub args: Vec<String>,
    pub code: i32,
    /// `None` unless saving was requested
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Lines read from a child's pipes, as `(stdout_line, stderr_line)` pairs.
///
/// One side of a pair is empty when only the other stream had a line ready.
/// Ends when both pipes are closed, or when the child has exited and nothing
/// arrived for two consecutive intervals (a detached grandchild may keep the
/// pipes open indefinitely).
pub struct PipeLines<'a> {
    child: &'a mut Child,
    stdout: Option<Receiver<String>>,
    stderr: Option<Receiver<String>>,
    interval: Duration,
    quiet_after_exit: u8,
}

/// Start draining `child`'s piped stdout and stderr
pub fn read_pipes(child: &mut Child, interval: Duration) -> PipeLines<'_> {
    let stdout = child.stdout.take().map(|pipe| spawn_reader("stdout", pipe));
    let stderr = child.stderr.take().map(|pipe| spawn_reader("stderr", pipe));
    PipeLines {
        child,
        stdout,
        stderr,
        interval,
        quiet_after_exit: 0,
    }
}

fn spawn_reader<R: Read + Send + 'static>(name: &str, pipe: R) -> Receiver<String> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name(format!("cmdwrap-{name}"))
        .spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("reading child output failed: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        // The sender went down with the closure, so the channel reads as closed
        log::warn!("Failed to spawn {name} reader thread: {e}");
    }
    rx
}

impl Iterator for PipeLines<'_> {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stdout.is_none() && self.stderr.is_none() {
                return None;
            }
            let out = self.stdout.clone().unwrap_or_else(never);
            let err = self.stderr.clone().unwrap_or_else(never);

            select! {
                recv(out) -> msg => match msg {
                    Ok(line) => {
                        self.quiet_after_exit = 0;
                        return Some((line, String::new()));
                    }
                    Err(_) => self.stdout = None,
                },
                recv(err) -> msg => match msg {
                    Ok(line) => {
                        self.quiet_after_exit = 0;
                        return Some((String::new(), line));
                    }
                    Err(_) => self.stderr = None,
                },
                default(self.interval) => {
                    if matches!(self.child.try_wait(), Ok(Some(_))) && out.is_empty() && err.is_empty() {
                        self.quiet_after_exit += 1;
                        if self.quiet_after_exit >= 2 {
                            log::debug!("child exited but its pipes are still open; stopping");
                            return None;
                        }
                    }
                }
            }
        }
    }
}

/// Echo and collect `child`'s output, wait for it, and check its exit code
pub fn resolve_child(
    child: &mut Child,
    args: Vec<String>,
    opts: &SubprocessOptions,
) -> anyhow::Result<Completed> {
    let mut stdout = opts.save_stdout.then(String::new);
    let mut stderr = opts.save_stderr.then(String::new);

    for (out_line, err_line) in read_pipes(child, opts.interval) {
        if !opts.mute_stdout && !out_line.is_empty() {
            let mut sink = stream::out();
            let _ = sink.write_all(out_line.as_bytes());
            let _ = sink.flush();
        }
        if !opts.mute_stderr && !err_line.is_empty() {
            let mut sink = stream::err();
            let _ = sink.write_all(err_line.as_bytes());
            let _ = sink.flush();
        }
        if let Some(saved) = stdout.as_mut() {
            saved.push_str(&out_line);
        }
        if let Some(saved) = stderr.as_mut() {
            saved.push_str(&err_line);
        }
    }

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for {}", args.join(" ")))?;
    let code = exit_code(status);
    log::debug!("{} exited with {code}", args.join(" "));

    if !opts.allowed.allows(code) {
        return Err(ProcessError {
            code,
            args,
            stdout,
            stderr,
        }
        .into());
    }
    Ok(Completed {
        args,
        code,
        stdout,
        stderr,
    })
}

/// Exit code, or the negated signal number for a child killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Spawn `argv` with piped output and resolve it.
///
/// The error is a [`ProcessError`] (recoverable with
/// [`exit_code`](crate::error::exit_code)) when the child exits with a
/// disallowed code; spawn and wait failures are plain I/O errors.
pub fn run_subprocess<S: AsRef<str>>(argv: &[S], opts: &SubprocessOptions) -> anyhow::Result<Completed> {
    let args: Vec<String> = argv.iter().map(|a| a.as_ref().to_string()).collect();
    let Some((program, rest)) = args.split_first() else {
        bail!("No command given");
    };

    let mut cmd = if opts.shell {
        ShellConfig::get().command_for_argv(&args)
    } else {
        let mut cmd = Command::new(program);
        cmd.args(rest);
        cmd
    };
    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to execute: {}", args.join(" ")))?;
    resolve_child(&mut child, args, opts)
}
