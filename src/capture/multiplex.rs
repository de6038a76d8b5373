//! Background drain of pty masters.
//!
//! One thread services every redirected stream of a session: it polls the
//! masters, forwards raw chunks to the saved terminal descriptors (unless
//! muted) and assembles lines into per-slot accumulators. The accumulators are
//! owned by the thread and handed back through the done channel when it exits.
//!
//! A source ends at end-of-file, at a read error, or when its end-of-stream
//! marker comes through. Bytes that could be the start of the marker are held
//! back until the next read decides.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use super::Pipe;
use super::lines::LineSink;
use crate::stream::StdStream;

const POLL_INTERVAL_MS: u16 = 10;
const CHUNK_SIZE: usize = 4096;
/// Consecutive empty polls after an unmarked stop before giving up on the rest
const GRACE_POLLS: u32 = 3;
/// Same, when every source was sent its marker
const MARKER_WAIT_POLLS: u32 = 100;

/// A pty master to drain and where its bytes go
pub(super) struct Source {
    stream: StdStream,
    master: File,
    terminal: File,
    mute: bool,
    lines: LineSink,
    slot: usize,
    marker: Vec<u8>,
    held: Vec<u8>,
}

impl Source {
    pub(super) fn new(
        stream: StdStream,
        master: File,
        terminal: File,
        pipe: &Pipe,
        slot: usize,
        marker: Vec<u8>,
    ) -> Self {
        Self {
            stream,
            master,
            terminal,
            mute: pipe.mute,
            lines: LineSink::new(pipe),
            slot,
            marker,
            held: Vec::new(),
        }
    }

    fn emit(&mut self, data: &[u8], acc: &mut [Vec<u8>; 2]) {
        if data.is_empty() {
            return;
        }
        if !self.mute
            && let Err(e) = self.terminal.write_all(data)
        {
            log::debug!("forwarding {} failed: {e}", self.stream);
        }
        self.lines.feed(data, &mut acc[self.slot]);
    }

    /// Pass `chunk` on, stopping at the marker. Returns whether the marker was seen.
    fn consume(&mut self, chunk: &[u8], acc: &mut [Vec<u8>; 2]) -> bool {
        let mut data = std::mem::take(&mut self.held);
        data.extend_from_slice(chunk);

        if let Some(pos) = find(&data, &self.marker) {
            self.emit(&data[..pos], acc);
            return true;
        }
        let keep = partial_suffix(&data, &self.marker);
        self.held = data.split_off(data.len() - keep);
        self.emit(&data, acc);
        false
    }

    /// Read until the master would block. Returns bytes read and whether the
    /// source reached end-of-stream.
    fn drain(&mut self, acc: &mut [Vec<u8>; 2]) -> (usize, bool) {
        let mut buf = [0u8; CHUNK_SIZE];
        let mut total = 0;
        loop {
            match self.master.read(&mut buf) {
                Ok(0) => return (total, true),
                Ok(n) => {
                    total += n;
                    if self.consume(&buf[..n], acc) {
                        return (total, true);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return (total, false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Linux reports a closed slave as EIO
                Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => return (total, true),
                Err(e) => {
                    log::debug!("reading {} capture failed: {e}", self.stream);
                    return (total, true);
                }
            }
        }
    }

    fn finish(mut self, acc: &mut [Vec<u8>; 2]) {
        let held = std::mem::take(&mut self.held);
        self.emit(&held, acc);
        self.lines.finish(&mut acc[self.slot]);
        let _ = self.terminal.flush();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest proper prefix of `needle` that `data` ends with
fn partial_suffix(data: &[u8], needle: &[u8]) -> usize {
    (1..needle.len().min(data.len() + 1))
        .rev()
        .find(|&k| data.ends_with(&needle[..k]))
        .unwrap_or(0)
}

/// Handle to the running drain thread
pub(super) struct Multiplexer {
    /// Carries whether every source was sent its marker
    stop: Sender<bool>,
    done: Receiver<[Vec<u8>; 2]>,
}

impl Multiplexer {
    pub(super) fn spawn(sources: Vec<Source>) -> io::Result<Self> {
        let (stop_tx, stop_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        thread::Builder::new()
            .name("cmdwrap-drain".into())
            .spawn(move || {
                let acc = run(sources, &stop_rx);
                let _ = done_tx.send(acc);
            })?;
        Ok(Self {
            stop: stop_tx,
            done: done_rx,
        })
    }

    /// Ask the thread to finish and wait up to `timeout` for the accumulators
    pub(super) fn stop(self, marked: bool, timeout: Duration) -> Option<[Vec<u8>; 2]> {
        let _ = self.stop.try_send(marked);
        self.done.recv_timeout(timeout).ok()
    }
}

fn run(mut sources: Vec<Source>, stop: &Receiver<bool>) -> [Vec<u8>; 2] {
    let mut acc: [Vec<u8>; 2] = Default::default();
    // Empty polls tolerated once stopping; `None` while still running
    let mut patience: Option<u32> = None;
    let mut idle_polls = 0;

    while !sources.is_empty() {
        if patience.is_none() {
            patience = match stop.try_recv() {
                Ok(true) => Some(MARKER_WAIT_POLLS),
                Ok(false) | Err(TryRecvError::Disconnected) => Some(GRACE_POLLS),
                Err(TryRecvError::Empty) => None,
            };
        }

        let ready: Vec<bool> = {
            let mut fds: Vec<PollFd<'_>> = sources
                .iter()
                .map(|s| PollFd::new(s.master.as_fd(), PollFlags::POLLIN))
                .collect();
            match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                Ok(_) => fds
                    .iter()
                    .map(|fd| fd.revents().is_some_and(|r| !r.is_empty()))
                    .collect(),
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    log::warn!("polling captured output failed: {e}");
                    break;
                }
            }
        };

        let mut read_any = false;
        let mut open = Vec::with_capacity(sources.len());
        for (mut source, is_ready) in sources.drain(..).zip(ready) {
            if is_ready {
                let (read, closed) = source.drain(&mut acc);
                read_any |= read > 0;
                if closed {
                    source.finish(&mut acc);
                    continue;
                }
            }
            open.push(source);
        }
        sources = open;

        if let Some(limit) = patience {
            if read_any {
                idle_polls = 0;
            } else {
                idle_polls += 1;
                if idle_polls >= limit {
                    log::debug!("{} capture source(s) still open after stop", sources.len());
                    break;
                }
            }
        }
    }

    for source in sources {
        source.finish(&mut acc);
    }
    acc
}
