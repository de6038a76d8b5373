//! Shared helpers for the integration tests.

pub mod pty;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use portable_pty::{CommandBuilder, PtyPair, PtySize, native_pty_system};

/// Environment variables that would change the binary's output
const NOISY_VARS: &[&str] = &["RUST_LOG", "NO_COLOR", "CLICOLOR", "CLICOLOR_FORCE"];

pub fn cmdwrap_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cmdwrap"))
}

/// Run the binary with piped output (not a terminal, so no color)
pub fn run_cli(args: &[&str], cwd: &Path) -> Output {
    let mut cmd = Command::new(cmdwrap_bin());
    cmd.args(args).current_dir(cwd);
    for var in NOISY_VARS {
        cmd.env_remove(var);
    }
    cmd.output().unwrap()
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn open_pty() -> PtyPair {
    native_pty_system()
        .openpty(PtySize {
            rows: 48,
            cols: 200,
            pixel_width: 0,
            pixel_height: 0,
        })
        .unwrap()
}

/// Minimal, deterministic environment for a command run in a PTY
pub fn configure_pty_command(cmd: &mut CommandBuilder) {
    cmd.env_clear();
    cmd.env(
        "HOME",
        std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()),
    );
    cmd.env(
        "PATH",
        std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string()),
    );
    cmd.env("TERM", "xterm-256color");
}
