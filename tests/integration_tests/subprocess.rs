//! Subprocesses wrapped in commands.
#![cfg(unix)]

use cmdwrap::{
    AllowedExit, Command, Pipe, ProcessError, Status, SubprocessOptions, exit_code, run_subprocess,
};

#[test]
fn test_subprocess_output_flows_through_substitution_capture() {
    let opts = SubprocessOptions::new().shell(true);
    let result = Command::new("echoes")
        .verbose(false)
        .stdout(Pipe::new().mute(true))
        .stderr(Pipe::new().mute(true))
        .run_value(|| run_subprocess(&["echo sub_out; echo sub_err >&2"], &opts))
        .unwrap();

    assert_eq!(result.stdout, "sub_out\n");
    assert_eq!(result.stderr, "sub_err\n");
    assert_eq!(result.value.map(|done| done.code), Some(0));
}

#[test]
fn test_disallowed_exit_becomes_failed_result_with_code() {
    let opts = SubprocessOptions::new()
        .shell(true)
        .save_stderr(true)
        .mute_stderr(true)
        .allow("1,42".parse().unwrap());
    let result = Command::new("exit2")
        .verbose(false)
        .stderr(Pipe::new().mute(true))
        .run_value(|| run_subprocess(&["echo broken >&2; exit 2"], &opts))
        .unwrap();

    assert_eq!(result.code, 2);
    assert_eq!(result.status, Status::Error);
    // The child's saved stderr is reported once the child fails
    assert_eq!(result.stderr, "broken\n");
}

#[test]
fn test_raise_returns_process_error() {
    let opts = SubprocessOptions::new().shell(true);
    let err = Command::new("strict")
        .verbose(false)
        .stderr(Pipe::new().mute(true))
        .catch_err(false)
        .run_value(|| run_subprocess(&["exit 7"], &opts))
        .unwrap_err();

    assert_eq!(exit_code(&err), Some(7));
    let process = err.downcast_ref::<ProcessError>().unwrap();
    assert_eq!(process.args, vec!["exit 7".to_string()]);
}

#[test]
fn test_any_exit_is_allowed() {
    let opts = SubprocessOptions::new().shell(true).allow(AllowedExit::Any);
    let done = run_subprocess(&["exit 99"], &opts).unwrap();
    assert_eq!(done.code, 99);
}

#[test]
fn test_missing_program_is_reported() {
    let result = Command::new("missing")
        .verbose(false)
        .stderr(Pipe::new().mute(true))
        .run_value(|| run_subprocess(&["cmdwrap-definitely-not-installed"], &SubprocessOptions::new()))
        .unwrap();

    assert_eq!(result.code, 1);
    assert!(result.stderr.contains("Failed to execute"), "{:?}", result.stderr);
}
