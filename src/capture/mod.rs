//! Output redirection for one command invocation.
//!
//! Two strategies, chosen per stream by [`Pipe::fd`]:
//!
//! - **Substitution** (`fd = false`): a capture frame is pushed onto this
//!   thread's [`stream`](crate::stream) stack. Only writes made through
//!   `stream::out()` / `stream::err()` are seen. No extra thread.
//! - **Duplication** (`fd = true`, unix only): the OS descriptor is pointed at a
//!   pseudo-terminal and a background thread drains the master side, echoing to
//!   a duplicate of the original descriptor. Sees everything written to fd 1/2,
//!   including child processes and native code.
//!
//! Only one duplication session can own the process descriptors at a time;
//! sessions from different threads are serialized, and a second session on the
//! same thread fails with [`CaptureError::Busy`].

#[cfg(unix)]
mod fd;
pub(crate) mod lines;
#[cfg(unix)]
mod multiplex;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::stream::{self, CaptureFrame, SharedBuffer, StdStream, StreamGuard};

pub use lines::strip_ansi;

/// Capture settings for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Pipe {
    /// Keep a copy of the output for the result
    pub save: bool,
    /// Decode the copy as text (lossy UTF-8) instead of keeping raw bytes
    pub text: bool,
    /// Keep terminal escape sequences in the copy
    pub tty: bool,
    /// Don't forward output to the real terminal
    pub mute: bool,
    /// Capture at the OS descriptor level (sees subprocess and native output)
    pub fd: bool,
}

impl Default for Pipe {
    fn default() -> Self {
        Self {
            save: true,
            text: true,
            tty: false,
            mute: false,
            fd: false,
        }
    }
}

impl Pipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub fn text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    pub fn fd(mut self, fd: bool) -> Self {
        self.fd = fd;
        self
    }

    /// A pipe that neither saves nor mutes leaves the stream alone
    fn redirects(&self) -> bool {
        self.save || self.mute
    }

    fn effective(mut self) -> Self {
        if self.fd && !cfg!(unix) {
            log::warn!("descriptor capture is unsupported on this platform; using substitution");
            self.fd = false;
        }
        self
    }
}

/// Where stderr goes: its own pipe, or merged into the stdout capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StderrRepr", into = "StderrRepr")]
pub enum StderrTarget {
    Pipe(Pipe),
    /// Send stderr into stdout's capture; the result's stderr stays empty
    Merge,
}

impl From<Pipe> for StderrTarget {
    fn from(pipe: Pipe) -> Self {
        StderrTarget::Pipe(pipe)
    }
}

/// TOML form: either a pipe table or the string `"merge"`
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StderrRepr {
    Keyword(String),
    Pipe(Pipe),
}

impl TryFrom<StderrRepr> for StderrTarget {
    type Error = String;

    fn try_from(repr: StderrRepr) -> Result<Self, Self::Error> {
        match repr {
            StderrRepr::Keyword(word) if word.eq_ignore_ascii_case("merge") => {
                Ok(StderrTarget::Merge)
            }
            StderrRepr::Keyword(word) => {
                Err(format!("unknown stderr target '{word}' (expected \"merge\" or a table)"))
            }
            StderrRepr::Pipe(pipe) => Ok(StderrTarget::Pipe(pipe)),
        }
    }
}

impl From<StderrTarget> for StderrRepr {
    fn from(target: StderrTarget) -> Self {
        match target {
            StderrTarget::Pipe(pipe) => StderrRepr::Pipe(pipe),
            StderrTarget::Merge => StderrRepr::Keyword("merge".to_string()),
        }
    }
}

/// Output captured for one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Text(String),
    Bytes(Vec<u8>),
}

impl Captured {
    fn from_buffer(pipe: &Pipe, bytes: Vec<u8>) -> Self {
        if pipe.text {
            Captured::Text(match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            })
        } else {
            Captured::Bytes(bytes)
        }
    }
}

/// What a finished session hands back
#[derive(Debug, Default)]
pub struct Captures {
    pub stdout: Option<Captured>,
    pub stderr: Option<Captured>,
}

/// Accumulator slot for each stream; merged stderr shares stdout's slot
#[derive(Debug, Clone, Copy)]
struct Plan {
    stdout: Option<Pipe>,
    stderr: Option<Pipe>,
    merged: bool,
}

impl Plan {
    fn new(stdout: Option<&Pipe>, stderr: Option<&StderrTarget>) -> Self {
        let stdout = stdout.copied().map(Pipe::effective);
        match stderr {
            Some(StderrTarget::Merge) => Plan {
                stdout,
                stderr: stdout,
                merged: true,
            },
            Some(StderrTarget::Pipe(pipe)) => Plan {
                stdout,
                stderr: Some(pipe.effective()),
                merged: false,
            },
            None => Plan {
                stdout,
                stderr: None,
                merged: false,
            },
        }
    }

    fn pipe(&self, stream: StdStream) -> Option<Pipe> {
        match stream {
            StdStream::Stdout => self.stdout,
            StdStream::Stderr => self.stderr,
        }
        .filter(Pipe::redirects)
    }

    fn slot(&self, stream: StdStream) -> usize {
        match stream {
            StdStream::Stderr if !self.merged => 1,
            _ => 0,
        }
    }
}

/// An active capture session. Dropping it tears everything down; call
/// [`finish`](Redirection::finish) to also collect the captured output.
#[must_use = "capture stops when the redirection is dropped"]
pub struct Redirection {
    plan: Plan,
    buffers: [SharedBuffer; 2],
    substituted: Vec<StreamGuard>,
    #[cfg(unix)]
    session: Option<fd::Session>,
    #[cfg(unix)]
    drained: [Vec<u8>; 2],
}

impl Redirection {
    /// Start capturing according to the given pipes
    pub fn activate(
        stdout: Option<&Pipe>,
        stderr: Option<&StderrTarget>,
    ) -> Result<Self, CaptureError> {
        let plan = Plan::new(stdout, stderr);
        let mut redirection = Redirection {
            plan,
            buffers: Default::default(),
            substituted: Vec::new(),
            #[cfg(unix)]
            session: None,
            #[cfg(unix)]
            drained: Default::default(),
        };

        #[cfg(unix)]
        {
            let fd_streams: Vec<(StdStream, Pipe, usize)> = [StdStream::Stdout, StdStream::Stderr]
                .into_iter()
                .filter_map(|s| plan.pipe(s).filter(|p| p.fd).map(|p| (s, p, plan.slot(s))))
                .collect();
            if !fd_streams.is_empty() {
                redirection.session = Some(fd::Session::start(&fd_streams)?);
            }
        }

        for stream in [StdStream::Stdout, StdStream::Stderr] {
            let Some(pipe) = plan.pipe(stream) else {
                continue;
            };
            if pipe.fd {
                continue;
            }
            let acc = redirection.buffers[plan.slot(stream)].clone();
            redirection
                .substituted
                .push(stream::push_capture(stream, CaptureFrame::new(&pipe, acc)));
        }

        log::debug!(
            "capture active: stdout={:?} stderr={:?} merged={}",
            plan.stdout,
            plan.stderr,
            plan.merged
        );
        Ok(redirection)
    }

    /// Stop capturing and return what was saved
    pub fn finish(mut self) -> Captures {
        self.teardown();
        let plan = self.plan;
        let mut slots: [Vec<u8>; 2] = [
            std::mem::take(&mut *self.buffers[0].borrow_mut()),
            std::mem::take(&mut *self.buffers[1].borrow_mut()),
        ];
        #[cfg(unix)]
        for (slot, drained) in slots.iter_mut().zip(self.drained.iter_mut()) {
            slot.append(drained);
        }

        let mut collect = |stream: StdStream| {
            plan.pipe(stream)
                .filter(|pipe| pipe.save)
                .map(|pipe| Captured::from_buffer(&pipe, std::mem::take(&mut slots[plan.slot(stream)])))
        };
        let stdout = collect(StdStream::Stdout);
        let stderr = collect(StdStream::Stderr);
        Captures {
            stdout,
            stderr: if plan.merged { None } else { stderr },
        }
    }

    fn teardown(&mut self) {
        while let Some(guard) = self.substituted.pop() {
            drop(guard);
        }
        #[cfg(unix)]
        if let Some(session) = self.session.take() {
            self.drained = session.close();
        }
    }
}

impl Drop for Redirection {
    fn drop(&mut self) {
        self.teardown();
    }
}
