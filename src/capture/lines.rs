//! Line assembly and escape-sequence stripping for captured output.
//!
//! Chunks arrive with arbitrary boundaries. A [`LineSink`] keeps the incomplete
//! tail of each chunk and only hands complete lines to the accumulator, so an
//! escape sequence split across two reads is still stripped as a whole.

use std::sync::LazyLock;

use regex::bytes::Regex;

use super::Pipe;

/// CSI sequences (`ESC [` or the 8-bit introducer U+009B) and OSC sequences
/// terminated by BEL or `ESC \`.
///
/// U+009B is matched in its UTF-8 form `C2 9B`. A bare `0x9B` byte is a
/// continuation byte of characters such as `Û` or `丛` and is left alone.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)(?:\xC2\x9B|\x1B\[)[0-?]*[ -/]*[@-~]|\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)")
        .expect("escape sequence pattern is valid")
});

/// Remove ANSI/VT escape sequences from `line`
pub fn strip_ansi(line: &[u8]) -> Vec<u8> {
    ANSI_ESCAPE.replace_all(line, &b""[..]).into_owned()
}

/// Per-source line assembler feeding an accumulator.
#[derive(Debug)]
pub(crate) struct LineSink {
    save: bool,
    tty: bool,
    pending: Vec<u8>,
}

impl LineSink {
    pub(crate) fn new(pipe: &Pipe) -> Self {
        Self {
            save: pipe.save,
            tty: pipe.tty,
            pending: Vec::new(),
        }
    }

    /// Append every complete line in `chunk` to `acc`, keeping the remainder
    pub(crate) fn feed(&mut self, chunk: &[u8], acc: &mut Vec<u8>) {
        if !self.save {
            return;
        }
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        for line in complete.split_inclusive(|&b| b == b'\n') {
            self.push_line(line, acc);
        }
    }

    /// Flush an unterminated trailing line
    pub(crate) fn finish(&mut self, acc: &mut Vec<u8>) {
        if self.pending.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.pending);
        self.push_line(&tail, acc);
    }

    fn push_line(&self, line: &[u8], acc: &mut Vec<u8>) {
        if self.tty {
            acc.extend_from_slice(line);
        } else {
            acc.extend_from_slice(&strip_ansi(line));
        }
    }
}
