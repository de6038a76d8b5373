//! The structured outcome of one command invocation.
//!
//! A [`CmdResult`] never has an unset status or color. When a unit of work
//! returns a [`PartialResult`], the missing pieces are derived:
//!
//! - status from code: `0` → [`Status::Ok`], anything else → [`Status::Error`]
//! - color from status: ok/skip → green, warning → yellow, error → red

use anstyle::Style;
use serde::{Deserialize, Serialize};

use crate::capture::Captured;
use crate::styling::{ERROR, SUCCESS, WARNING};

/// Outcome classification of a command
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Status {
    Ok,
    Error,
    Warning,
    Skip,
}

impl Status {
    /// Status implied by an exit code
    pub fn from_code(code: i32) -> Self {
        if code == 0 { Status::Ok } else { Status::Error }
    }
}

/// Display hint for the status line
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StatusColor {
    Green,
    Red,
    Yellow,
}

impl StatusColor {
    pub fn from_status(status: Status) -> Self {
        match status {
            Status::Ok | Status::Skip => StatusColor::Green,
            Status::Warning => StatusColor::Yellow,
            Status::Error => StatusColor::Red,
        }
    }

    pub fn style(self) -> Style {
        match self {
            StatusColor::Green => SUCCESS,
            StatusColor::Red => ERROR,
            StatusColor::Yellow => WARNING,
        }
    }
}

/// Result of running a command.
///
/// Captured text lands in `stdout`/`stderr` when the stream's pipe has
/// `text = true`, raw bytes in `stdout_bytes`/`stderr_bytes` otherwise. Streams
/// that were not captured stay empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CmdResult<T> {
    pub value: Option<T>,
    pub code: i32,
    pub name: String,
    pub status: Status,
    pub color: StatusColor,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stdout_bytes: Vec<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stderr_bytes: Vec<u8>,
}

impl<T> CmdResult<T> {
    /// Build a result with status and color derived from `code`
    pub fn new(name: impl Into<String>, value: Option<T>, code: i32) -> Self {
        PartialResult {
            value,
            code,
            name: Some(name.into()),
            status: None,
            color: None,
        }
        .normalize("")
    }

    /// A successful result carrying `value`
    pub fn ok(name: impl Into<String>, value: T) -> Self {
        Self::new(name, Some(value), 0)
    }

    /// A failed result with no value
    pub fn failed(name: impl Into<String>, code: i32) -> Self {
        Self::new(name, None, code)
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Whether the status counts as a failure for summaries and exit codes
    pub fn is_failure(&self) -> bool {
        self.status == Status::Error
    }

    pub(crate) fn attach(&mut self, stdout: Option<Captured>, stderr: Option<Captured>) {
        match stdout {
            Some(Captured::Text(text)) => self.stdout = text,
            Some(Captured::Bytes(bytes)) => self.stdout_bytes = bytes,
            None => {}
        }
        match stderr {
            Some(Captured::Text(text)) => self.stderr = text,
            Some(Captured::Bytes(bytes)) => self.stderr_bytes = bytes,
            None => {}
        }
    }
}

/// A result built by the unit of work itself, with any field left to derivation.
///
/// ```ignore
/// // "already mounted" is expected: report it as skipped, not failed
/// return Ok(Outcome::Result(PartialResult::new(32).status(Status::Skip)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult<T> {
    pub value: Option<T>,
    pub code: i32,
    pub name: Option<String>,
    pub status: Option<Status>,
    pub color: Option<StatusColor>,
}

impl<T> Default for PartialResult<T> {
    fn default() -> Self {
        Self {
            value: None,
            code: 0,
            name: None,
            status: None,
            color: None,
        }
    }
}

impl<T> PartialResult<T> {
    pub fn new(code: i32) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn color(mut self, color: StatusColor) -> Self {
        self.color = Some(color);
        self
    }

    /// Fill unset fields: name falls back to `default_name`, status derives
    /// from code, color derives from status.
    pub fn normalize(self, default_name: &str) -> CmdResult<T> {
        let status = self.status.unwrap_or_else(|| Status::from_code(self.code));
        let color = self
            .color
            .unwrap_or_else(|| StatusColor::from_status(status));
        CmdResult {
            value: self.value,
            code: self.code,
            name: self.name.unwrap_or_else(|| default_name.to_string()),
            status,
            color,
            stdout: String::new(),
            stderr: String::new(),
            stdout_bytes: Vec::new(),
            stderr_bytes: Vec::new(),
        }
    }
}

/// What a unit of work hands back: a plain value, or a result it built itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Value(T),
    Result(PartialResult<T>),
}

impl<T> From<PartialResult<T>> for Outcome<T> {
    fn from(partial: PartialResult<T>) -> Self {
        Outcome::Result(partial)
    }
}
