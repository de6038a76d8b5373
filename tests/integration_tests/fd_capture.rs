//! Descriptor-level capture in-process.
//!
//! These redirect the test process's real fd 1/2. Other tests may print
//! concurrently, so assertions check for the expected text rather than exact
//! buffers, and nothing here mutes a stream.
#![cfg(unix)]

use std::io::Write;
use std::process::Command as Process;

use cmdwrap::{CaptureError, Command, Outcome, Pipe, Redirection, StderrTarget, Status};

fn fd_pipe() -> Pipe {
    Pipe::new().fd(true)
}

fn sh(script: &str) -> anyhow::Result<i32> {
    let status = Process::new("sh").args(["-c", script]).status()?;
    Ok(status.code().unwrap_or(-1))
}

#[test]
fn test_child_output_is_captured() {
    let result = Command::new("child")
        .verbose(false)
        .stdout(fd_pipe())
        .run_value(|| sh("echo from_child"))
        .unwrap();

    assert_eq!(result.status, Status::Ok);
    assert!(result.stdout.contains("from_child\n"), "{:?}", result.stdout);
    // ONLCR is off on the slave: no carriage returns sneak in
    assert!(!result.stdout.contains("from_child\r"));
}

#[test]
fn test_direct_descriptor_writes_are_captured() {
    let result = Command::new("direct")
        .verbose(false)
        .stdout(fd_pipe())
        .stderr(fd_pipe())
        .run_value(|| {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(b"direct_out\n")?;
            stdout.flush()?;
            std::io::stderr().write_all(b"direct_err\n")?;
            Ok(())
        })
        .unwrap();

    assert!(result.stdout.contains("direct_out\n"), "{:?}", result.stdout);
    assert!(result.stderr.contains("direct_err\n"), "{:?}", result.stderr);
}

#[test]
fn test_escapes_stripped_from_copy() {
    let result = Command::new("ansi")
        .verbose(false)
        .stdout(fd_pipe())
        .run_value(|| sh(r"printf '\033[35mfd_ansi_text\033[39m\n'"))
        .unwrap();

    assert!(result.stdout.contains("fd_ansi_text\n"), "{:?}", result.stdout);
    assert!(!result.stdout.contains('\u{1b}'));
}

#[test]
fn test_tty_keeps_escapes() {
    let result = Command::new("ansi")
        .verbose(false)
        .stdout(fd_pipe().tty(true))
        .run_value(|| sh(r"printf '\033[35mfd_tty_text\033[39m\n'"))
        .unwrap();

    assert!(
        result.stdout.contains("\u{1b}[35mfd_tty_text\u{1b}[39m\n"),
        "{:?}",
        result.stdout
    );
}

#[test]
fn test_merge_collects_both_streams_into_stdout() {
    let result = Command::new("merged")
        .verbose(false)
        .stdout(fd_pipe())
        .stderr(StderrTarget::Merge)
        .run_value(|| sh("echo merged_out; echo merged_err >&2"))
        .unwrap();

    assert!(result.stdout.contains("merged_out\n"), "{:?}", result.stdout);
    assert!(result.stdout.contains("merged_err\n"), "{:?}", result.stdout);
    assert_eq!(result.stderr, "");
}

#[test]
fn test_binary_capture() {
    let result = Command::new("bytes")
        .verbose(false)
        .stdout(fd_pipe().text(false))
        .run_value(|| sh("printf 'raw_bytes\\n'"))
        .unwrap();

    assert_eq!(result.stdout, "");
    let needle = b"raw_bytes\n";
    assert!(
        result
            .stdout_bytes
            .windows(needle.len())
            .any(|w| w == needle)
    );
}

#[test]
fn test_failure_text_lands_in_captured_stderr() {
    let result = Command::new("failing")
        .verbose(false)
        .stderr(fd_pipe())
        .run_value::<(), _>(|| anyhow::bail!("fd_failure_text"))
        .unwrap();

    assert_eq!(result.code, 1);
    assert!(result.stderr.contains("fd_failure_text"), "{:?}", result.stderr);
}

#[test]
fn test_nested_session_on_same_thread_is_rejected() {
    let result = Command::new("outer")
        .verbose(false)
        .stdout(fd_pipe())
        .run(|| {
            let nested = Redirection::activate(Some(&fd_pipe()), None);
            Ok(Outcome::Value(matches!(nested, Err(CaptureError::Busy))))
        })
        .unwrap();
    assert_eq!(result.value, Some(true));
}

#[test]
fn test_sessions_run_back_to_back() {
    for round in 0..3 {
        let result = Command::new("again")
            .verbose(false)
            .stdout(fd_pipe())
            .run_value(|| sh(&format!("echo round_{round}")))
            .unwrap();
        assert!(result.stdout.contains(&format!("round_{round}\n")));
    }
}

#[test]
fn test_sessions_from_threads_are_serialized() {
    let handles: Vec<_> = (0..3)
        .map(|i| {
            std::thread::spawn(move || {
                Command::new(format!("thread{i}"))
                    .verbose(false)
                    .stdout(fd_pipe())
                    .run_value(|| sh(&format!("echo thread_{i}_line")))
                    .unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        assert!(result.stdout.contains(&format!("thread_{i}_line\n")));
    }
}
