//! Printed report formats: command titles, status lines, full reports and
//! summaries. Everything writes to a caller-supplied sink.
//!
//! ```text
//!
//! Cmd: build
//! ----------
//! build: Ok
//!
//! Summary
//! -------
//! build: Ok
//! test: Error
//! ```

use std::io::{self, Write};

use crate::result::CmdResult;
use crate::styling::{TITLE, paint, underline};

/// Print the title block for a command named `name`
pub fn print_title(name: &str, color: bool, out: &mut dyn Write) -> io::Result<()> {
    let heading = format!("Cmd: {name}");
    let block = format!("{heading}\n{}", underline(&heading));
    writeln!(out)?;
    writeln!(out, "{}", paint(&block, TITLE, color))
}

/// Render the `<name>: <Status>` line without a trailing newline
pub fn render_status<T>(result: &CmdResult<T>, color: bool) -> String {
    let line = format!("{}: {}", result.name, result.status);
    paint(&line, result.color.style(), color)
}

pub fn print_status<T>(result: &CmdResult<T>, color: bool, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{}", render_status(result, color))
}

/// Print title, captured output and status line of one result
pub fn print_result<T>(result: &CmdResult<T>, color: bool, out: &mut dyn Write) -> io::Result<()> {
    print_title(&result.name, color, out)?;

    let stdout = captured_text(&result.stdout, &result.stdout_bytes);
    if !stdout.is_empty() {
        writeln!(out, "{}", paint("Stdout:", TITLE, color))?;
        write_block(out, &stdout)?;
    }

    let stderr = captured_text(&result.stderr, &result.stderr_bytes);
    if !stderr.is_empty() {
        writeln!(out, "{}", paint("Stderr:", TITLE, color))?;
        write_block(out, &stderr)?;
    }

    print_status(result, color, out)
}

fn captured_text<'a>(text: &'a str, bytes: &'a [u8]) -> std::borrow::Cow<'a, str> {
    if text.is_empty() {
        String::from_utf8_lossy(bytes)
    } else {
        std::borrow::Cow::Borrowed(text)
    }
}

fn write_block(out: &mut dyn Write, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

/// Anything that contributes status lines to a summary.
///
/// Implemented for single results, optional entries (absent ones are skipped)
/// and nested collections, so heterogeneous results can be summarized through
/// `&dyn Summarize`.
pub trait Summarize {
    fn write_status_lines(&self, color: bool, out: &mut dyn Write) -> io::Result<()>;
}

impl<T> Summarize for CmdResult<T> {
    fn write_status_lines(&self, color: bool, out: &mut dyn Write) -> io::Result<()> {
        print_status(self, color, out)
    }
}

impl<S: Summarize> Summarize for Option<S> {
    fn write_status_lines(&self, color: bool, out: &mut dyn Write) -> io::Result<()> {
        match self {
            Some(inner) => inner.write_status_lines(color, out),
            None => Ok(()),
        }
    }
}

impl<S: Summarize> Summarize for [S] {
    fn write_status_lines(&self, color: bool, out: &mut dyn Write) -> io::Result<()> {
        for item in self {
            item.write_status_lines(color, out)?;
        }
        Ok(())
    }
}

impl<S: Summarize> Summarize for Vec<S> {
    fn write_status_lines(&self, color: bool, out: &mut dyn Write) -> io::Result<()> {
        self.as_slice().write_status_lines(color, out)
    }
}

impl<S: Summarize + ?Sized> Summarize for &S {
    fn write_status_lines(&self, color: bool, out: &mut dyn Write) -> io::Result<()> {
        (**self).write_status_lines(color, out)
    }
}

/// Print a summary: optional `Summary` headline, then one status line per result
pub fn print_summary<S: Summarize + ?Sized>(
    results: &S,
    color: bool,
    headline: bool,
    out: &mut dyn Write,
) -> io::Result<()> {
    if headline {
        writeln!(out)?;
        writeln!(out, "{}", paint(&format!("Summary\n{}", underline("Summary")), TITLE, color))?;
    }
    results.write_status_lines(color, out)
}
