//! The binary with a real terminal on stdout/stderr.
//!
//! Muting and descriptor capture are only observable from outside the
//! process, so they are checked here.
#![cfg(unix)]

use crate::common::pty::{build_pty_command, exec_cmd_in_pty};

fn run_in_pty(args: &[&str]) -> (String, i32) {
    let dir = tempfile::tempdir().unwrap();
    exec_cmd_in_pty(build_pty_command(args, dir.path()))
}

#[test]
fn test_status_line_is_colored_on_a_terminal() {
    let (output, code) = run_in_pty(&["run", "--name", "c", "--", "true"]);
    assert_eq!(code, 0);
    assert!(output.contains("\u{1b}[36mCmd: c\n------\u{1b}[0m"), "{output:?}");
    assert!(output.contains("\u{1b}[32mc: Ok\u{1b}[0m"), "{output:?}");
}

#[test]
fn test_no_color_flag() {
    let (output, _) = run_in_pty(&["run", "--no-color", "--name", "c", "--", "true"]);
    assert!(!output.contains('\u{1b}'), "{output:?}");
    assert!(output.contains("c: Ok\n"));
}

#[test]
fn test_mute_keeps_terminal_silent() {
    let (output, code) = run_in_pty(&[
        "run",
        "--no-color",
        "--mute",
        "--name",
        "m",
        "--shell",
        "--",
        "echo hidden_text; echo hidden_err >&2",
    ]);
    assert_eq!(code, 0);
    assert!(!output.contains("hidden_text"), "{output:?}");
    assert!(!output.contains("hidden_err"), "{output:?}");
    assert!(output.contains("m: Ok\n"));
}

#[test]
fn test_fd_mute_keeps_terminal_silent() {
    let (output, code) = run_in_pty(&[
        "run",
        "--no-color",
        "--fd",
        "--mute",
        "--report",
        "--name",
        "fdm",
        "--shell",
        "--",
        "echo fd_hidden",
    ]);
    assert_eq!(code, 0);
    // Only the report shows the text
    assert_eq!(output.matches("fd_hidden").count(), 1, "{output:?}");
    assert!(output.contains("Stdout:\nfd_hidden\n"), "{output:?}");
}

#[test]
fn test_fd_capture_echoes_live() {
    let (output, code) = run_in_pty(&[
        "run",
        "--no-color",
        "--fd",
        "--report",
        "--name",
        "live",
        "--shell",
        "--",
        "printf '\\033[35mlive_text\\033[39m\\n'",
    ]);
    assert_eq!(code, 0);
    // Terminal copy keeps the color codes, captured copy doesn't
    assert!(output.contains("\u{1b}[35mlive_text\u{1b}[39m\n"), "{output:?}");
    assert!(output.contains("Stdout:\nlive_text\n"), "{output:?}");
}
