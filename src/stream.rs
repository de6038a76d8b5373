//! Thread-local standard streams with scoped substitution
//!
//! Code that wants its output to be capturable in substitution mode writes
//! through [`out()`] / [`err()`] (or the [`outln!`](crate::outln) and
//! [`errln!`](crate::errln) macros) instead of `println!`.
//!
//! # Implementation
//!
//! Each thread keeps one stack of frames per stream:
//! - a **capture** frame copies every write into an accumulator, then passes it
//!   down unless muted
//! - a **sink** frame swallows the write into an arbitrary writer (a log file,
//!   a test buffer)
//! - below the stack sits the real process stream
//!
//! Frames are pushed by guards and popped when the guard drops, so the previous
//! stream is restored on every exit path, including unwinding. Guards are
//! `!Send` and must be dropped in reverse order of creation.
//!
//! Writers installed as sinks must not write back into the same stream.

use std::cell::RefCell;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::capture::Pipe;
use crate::capture::lines::LineSink;

/// Which standard stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    fn index(self) -> usize {
        match self {
            StdStream::Stdout => 0,
            StdStream::Stderr => 1,
        }
    }

    fn write_real(self, buf: &[u8]) -> io::Result<()> {
        match self {
            StdStream::Stdout => io::stdout().write_all(buf),
            StdStream::Stderr => io::stderr().write_all(buf),
        }
    }

    /// Flush the process-level stream buffer for this stream
    pub fn flush_real(self) -> io::Result<()> {
        match self {
            StdStream::Stdout => io::stdout().flush(),
            StdStream::Stderr => io::stderr().flush(),
        }
    }
}

/// Accumulator shared between capture frames (stdout and stderr share one when
/// merged).
pub(crate) type SharedBuffer = Rc<RefCell<Vec<u8>>>;

pub(crate) struct CaptureFrame {
    mute: bool,
    lines: LineSink,
    acc: SharedBuffer,
}

impl CaptureFrame {
    pub(crate) fn new(pipe: &Pipe, acc: SharedBuffer) -> Self {
        Self {
            mute: pipe.mute,
            lines: LineSink::new(pipe),
            acc,
        }
    }

    fn finish(mut self) {
        let mut acc = self.acc.borrow_mut();
        self.lines.finish(&mut acc);
    }
}

enum Frame {
    Capture(CaptureFrame),
    Sink(Box<dyn Write>),
}

thread_local! {
    static STACKS: RefCell<[Vec<Frame>; 2]> = const { RefCell::new([Vec::new(), Vec::new()]) };
}

fn dispatch(stream: StdStream, buf: &[u8]) -> io::Result<()> {
    let reached_real = STACKS.with(|stacks| -> io::Result<bool> {
        let mut stacks = stacks.borrow_mut();
        for frame in stacks[stream.index()].iter_mut().rev() {
            match frame {
                Frame::Capture(capture) => {
                    capture.lines.feed(buf, &mut capture.acc.borrow_mut());
                    if capture.mute {
                        return Ok(false);
                    }
                }
                Frame::Sink(sink) => {
                    sink.write_all(buf)?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    })?;

    if reached_real {
        stream.write_real(buf)?;
    }
    Ok(())
}

fn flush(stream: StdStream) -> io::Result<()> {
    let reached_real = STACKS.with(|stacks| -> io::Result<bool> {
        let mut stacks = stacks.borrow_mut();
        for frame in stacks[stream.index()].iter_mut().rev() {
            match frame {
                Frame::Capture(capture) if capture.mute => return Ok(false),
                Frame::Capture(_) => {}
                Frame::Sink(sink) => {
                    sink.flush()?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    })?;

    if reached_real {
        stream.flush_real()?;
    }
    Ok(())
}

/// Handle to this thread's view of a standard stream
#[derive(Debug, Clone, Copy)]
pub struct StreamWriter {
    stream: StdStream,
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        dispatch(self.stream, buf)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        dispatch(self.stream, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        flush(self.stream)
    }
}

/// This thread's stdout
pub fn out() -> StreamWriter {
    StreamWriter {
        stream: StdStream::Stdout,
    }
}

/// This thread's stderr
pub fn err() -> StreamWriter {
    StreamWriter {
        stream: StdStream::Stderr,
    }
}

/// Pops its frame when dropped
#[must_use = "the substitution ends when the guard is dropped"]
pub struct StreamGuard {
    stream: StdStream,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl std::fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGuard")
            .field("stream", &self.stream)
            .field("depth", &self.depth)
            .finish()
    }
}

fn push(stream: StdStream, frame: Frame) -> StreamGuard {
    let depth = STACKS.with(|stacks| {
        let mut stacks = stacks.borrow_mut();
        let stack = &mut stacks[stream.index()];
        stack.push(frame);
        stack.len() - 1
    });
    StreamGuard {
        stream,
        depth,
        _not_send: PhantomData,
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let popped = STACKS.with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            let stack = &mut stacks[self.stream.index()];
            if stack.len() != self.depth + 1 {
                log::debug!(
                    "{} substitution dropped out of order (depth {}, stack {})",
                    self.stream,
                    self.depth,
                    stack.len()
                );
            }
            if stack.len() > self.depth {
                stack.drain(self.depth..).collect::<Vec<_>>()
            } else {
                Vec::new()
            }
        });
        for frame in popped.into_iter().rev() {
            match frame {
                Frame::Capture(capture) => capture.finish(),
                Frame::Sink(mut sink) => {
                    let _ = sink.flush();
                }
            }
        }
    }
}

/// Route `stream` into `sink` until the guard drops
pub fn install_sink(stream: StdStream, sink: Box<dyn Write>) -> StreamGuard {
    push(stream, Frame::Sink(sink))
}

pub(crate) fn push_capture(stream: StdStream, frame: CaptureFrame) -> StreamGuard {
    push(stream, Frame::Capture(frame))
}

/// Write a line to this thread's stdout
#[macro_export]
macro_rules! outln {
    () => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::stream::out());
    }};
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::stream::out(), $($arg)*);
    }};
}

/// Write a line to this thread's stderr
#[macro_export]
macro_rules! errln {
    () => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::stream::err());
    }};
    ($($arg:tt)*) => {{
        use ::std::io::Write as _;
        let _ = ::std::writeln!($crate::stream::err(), $($arg)*);
    }};
}
