//! Error types for command execution and output capture
//!
//! - **`ProcessError`** - an external process exited with a code that was not
//!   allowed. Carries the exit code verbatim so the command wrapper can report
//!   it. Use `.into()` to convert to `anyhow::Error`; [`exit_code`] recovers the
//!   code by downcasting.
//!
//! - **`CaptureError`** - setting up or tearing down a capture session failed
//!   (pseudo-terminal allocation, descriptor duplication, drain thread spawn).

/// An external process exited with a disallowed, nonzero code.
///
/// # Usage
///
/// ```ignore
/// // Pattern match on errors coming out of a unit of work
/// if let Some(ProcessError { code, .. }) = err.downcast_ref() {
///     eprintln!("process exited with {code}");
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("command '{}' returned non-zero exit status {code}", args.join(" "))]
pub struct ProcessError {
    /// Exit code (negative signal number when killed by a signal)
    pub code: i32,
    /// The argv that was run
    pub args: Vec<String>,
    /// Captured stdout, if it was saved
    pub stdout: Option<String>,
    /// Captured stderr, if it was saved
    pub stderr: Option<String>,
}

/// Failure while activating or deactivating output redirection.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A system call failed during descriptor-level redirection
    #[cfg(unix)]
    #[error("{op} failed: {source}")]
    Sys {
        op: &'static str,
        #[source]
        source: nix::errno::Errno,
    },

    /// I/O failure (thread spawn, descriptor conversion)
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The calling thread already owns a descriptor-level capture session
    #[error("descriptor capture is already active on this thread")]
    Busy,
}

#[cfg(unix)]
impl CaptureError {
    pub(crate) fn sys(op: &'static str) -> impl FnOnce(nix::errno::Errno) -> Self {
        move |source| CaptureError::Sys { op, source }
    }
}

impl CaptureError {
    pub(crate) fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| CaptureError::Io { op, source }
    }
}

/// Extract a process exit code from an error, if it wraps a [`ProcessError`]
pub fn exit_code(err: &anyhow::Error) -> Option<i32> {
    err.downcast_ref::<ProcessError>().map(|e| e.code)
}
