pub mod capture;
pub mod command;
pub mod error;
pub mod report;
pub mod result;
pub mod shell_exec;
pub mod stream;
pub mod styling;
pub mod subprocess;

pub use capture::{Captured, Captures, Pipe, Redirection, StderrTarget, strip_ansi};
pub use command::{Command, CommandOptions};
pub use error::{CaptureError, ProcessError, exit_code};
pub use report::{Summarize, print_result, print_status, print_summary, print_title, render_status};
pub use result::{CmdResult, Outcome, PartialResult, Status, StatusColor};
pub use subprocess::{AllowedExit, Completed, PipeLines, SubprocessOptions, read_pipes, resolve_child, run_subprocess};
