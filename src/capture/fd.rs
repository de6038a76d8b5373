//! Descriptor-level redirection through a pseudo-terminal.
//!
//! Setup per stream:
//! 1. `dup` the real descriptor so the terminal stays reachable (and restorable)
//! 2. open a pty pair; turn off `ONLCR` and turn on `ONLRET` on the slave so
//!    `\n` stays `\n`
//! 3. make the master non-blocking and hand it to the drain thread
//! 4. flush buffered output, then `dup2` the slave over fd 1/2
//!
//! Teardown reverses it: flush, `dup2` the saved descriptor back, write an
//! end-of-stream marker into the slave, let the drain thread read up to the
//! marker, then close the pty pair. Everything written before the restore is
//! ahead of the marker, so nothing in flight is cut off.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::pty::{OpenptyResult, Winsize, openpty};
use nix::sys::termios::{self, OutputFlags, SetArg, Termios};
use nix::unistd::{dup, dup2_stderr, dup2_stdout};

use super::Pipe;
use super::multiplex::{Multiplexer, Source};
use crate::error::CaptureError;
use crate::stream::StdStream;

/// Upper bound on waiting for the drain thread at teardown
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

static MARKER_SEQ: AtomicU64 = AtomicU64::new(0);

static FD_OWNER: Mutex<Option<ThreadId>> = Mutex::new(None);
static FD_RELEASED: Condvar = Condvar::new();

/// Exclusive ownership of the process's fd 1/2 redirection
struct FdLock;

impl FdLock {
    fn acquire() -> Result<Self, CaptureError> {
        let me = thread::current().id();
        let mut owner = FD_OWNER.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match *owner {
                None => {
                    *owner = Some(me);
                    return Ok(FdLock);
                }
                Some(id) if id == me => return Err(CaptureError::Busy),
                Some(_) => {
                    owner = FD_RELEASED
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

impl Drop for FdLock {
    fn drop(&mut self) {
        *FD_OWNER.lock().unwrap_or_else(PoisonError::into_inner) = None;
        FD_RELEASED.notify_all();
    }
}

/// An OSC sequence no program emits by accident: unique per process and session
fn end_marker() -> Vec<u8> {
    let seq = MARKER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("\x1b]cmdwrap-eos;{};{seq}\x07", process::id()).into_bytes()
}

/// One redirected descriptor
struct Redirect {
    stream: StdStream,
    saved: OwnedFd,
    slave: File,
    marker: Vec<u8>,
    restored: bool,
}

impl Redirect {
    fn open(stream: StdStream) -> Result<(Self, File, File), CaptureError> {
        let saved = match stream {
            StdStream::Stdout => dup(io::stdout().as_fd()),
            StdStream::Stderr => dup(io::stderr().as_fd()),
        }
        .map_err(CaptureError::sys("dup"))?;
        let terminal = File::from(dup(&saved).map_err(CaptureError::sys("dup"))?);

        let OpenptyResult { master, slave } =
            openpty(None::<&Winsize>, None::<&Termios>).map_err(CaptureError::sys("openpty"))?;

        let mut attrs = termios::tcgetattr(&slave).map_err(CaptureError::sys("tcgetattr"))?;
        attrs.output_flags.remove(OutputFlags::ONLCR);
        attrs.output_flags.insert(OutputFlags::ONLRET);
        termios::tcsetattr(&slave, SetArg::TCSANOW, &attrs)
            .map_err(CaptureError::sys("tcsetattr"))?;

        let flags = fcntl(&master, FcntlArg::F_GETFL).map_err(CaptureError::sys("fcntl"))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(&master, FcntlArg::F_SETFL(flags)).map_err(CaptureError::sys("fcntl"))?;

        let _ = stream.flush_real();
        match stream {
            StdStream::Stdout => dup2_stdout(&slave),
            StdStream::Stderr => dup2_stderr(&slave),
        }
        .map_err(CaptureError::sys("dup2"))?;

        let redirect = Redirect {
            stream,
            saved,
            slave: File::from(slave),
            marker: end_marker(),
            restored: false,
        };
        Ok((redirect, File::from(master), terminal))
    }

    fn restore(&mut self) {
        if std::mem::replace(&mut self.restored, true) {
            return;
        }
        let _ = self.stream.flush_real();
        let restored = match self.stream {
            StdStream::Stdout => dup2_stdout(&self.saved),
            StdStream::Stderr => dup2_stderr(&self.saved),
        };
        if let Err(e) = restored {
            log::warn!("Failed to restore {}: {}", self.stream, e);
        }
    }

    fn send_marker(&mut self) -> bool {
        match self.slave.write_all(&self.marker) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Failed to mark end of {}: {e}", self.stream);
                false
            }
        }
    }
}

/// A running descriptor-level capture: redirected fds plus the drain thread
pub(super) struct Session {
    redirects: Vec<Redirect>,
    mux: Option<Multiplexer>,
    _lock: FdLock,
}

impl Session {
    /// Redirect each `(stream, pipe, slot)` and start draining
    pub(super) fn start(streams: &[(StdStream, Pipe, usize)]) -> Result<Self, CaptureError> {
        let lock = FdLock::acquire()?;
        let mut session = Session {
            redirects: Vec::new(),
            mux: None,
            _lock: lock,
        };

        let mut sources = Vec::new();
        for &(stream, pipe, slot) in streams {
            // On error, dropping `session` restores whatever was already redirected
            let (redirect, master, terminal) = Redirect::open(stream)?;
            sources.push(Source::new(
                stream,
                master,
                terminal,
                &pipe,
                slot,
                redirect.marker.clone(),
            ));
            session.redirects.push(redirect);
        }

        session.mux = Some(Multiplexer::spawn(sources).map_err(CaptureError::io("spawn drain thread"))?);
        log::debug!("descriptor capture started for {} stream(s)", streams.len());
        Ok(session)
    }

    /// Restore the descriptors, drain what is left, return the accumulators
    pub(super) fn close(mut self) -> [Vec<u8>; 2] {
        self.restore_all();
        let marked = self
            .redirects
            .iter_mut()
            .fold(true, |all, redirect| redirect.send_marker() && all);
        let drained = self.stop_drain(marked);
        log::debug!("descriptor capture closed");
        drained
    }

    fn restore_all(&mut self) {
        for redirect in self.redirects.iter_mut().rev() {
            redirect.restore();
        }
    }

    fn stop_drain(&mut self, marked: bool) -> [Vec<u8>; 2] {
        let Some(mux) = self.mux.take() else {
            return Default::default();
        };
        mux.stop(marked, JOIN_TIMEOUT).unwrap_or_else(|| {
            log::warn!("drain thread did not finish within {JOIN_TIMEOUT:?}; output may be truncated");
            Default::default()
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.restore_all();
        self.stop_drain(false);
    }
}
