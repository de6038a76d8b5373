//! The binary with piped (non-terminal) output: no color by default.
#![cfg(unix)]

use insta::assert_snapshot;

use crate::common::{run_cli, stderr_of, stdout_of};

#[test]
fn test_run_prints_title_output_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(&["run", "--name", "greet", "--", "echo", "hello"], dir.path());

    assert!(output.status.success());
    assert_snapshot!(stdout_of(&output).trim(), @r"
    Cmd: greet
    ----------
    hello
    greet: Ok
    ");
}

#[test]
fn test_run_exits_with_child_code() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(
        &["run", "--name", "boom", "--shell", "--", "echo oops >&2; exit 3"],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(3));
    let stdout = stdout_of(&output);
    assert!(stdout.ends_with("boom: Error\n"), "{stdout}");
    let stderr = stderr_of(&output);
    assert!(stderr.contains("oops\n"));
    assert!(stderr.contains("returned non-zero exit status 3"));
}

#[test]
fn test_allowed_exit_is_success() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(
        &["run", "--quiet", "--allow-exit", "1,4", "--shell", "--", "exit 4"],
        dir.path(),
    );
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_of(&output), "");
}

#[test]
fn test_mute_hides_output_but_report_shows_it() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(
        &["run", "--name", "quiet", "--mute", "--report", "--", "echo", "secret"],
        dir.path(),
    );

    assert!(output.status.success());
    assert_snapshot!(stdout_of(&output).trim(), @r"
    Cmd: quiet
    ----------
    quiet: Ok

    Cmd: quiet
    ----------
    Stdout:
    secret
    quiet: Ok
    ");
}

#[test]
fn test_json_result() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(
        &["run", "--quiet", "--mute", "--json", "--name", "js", "--", "echo", "captured"],
        dir.path(),
    );

    let value: serde_json::Value = serde_json::from_str(&stdout_of(&output)).unwrap();
    assert_eq!(value["name"], "js");
    assert_eq!(value["code"], 0);
    assert_eq!(value["status"], "ok");
    assert_eq!(value["color"], "green");
    assert_eq!(value["stdout"], "captured\n");
    assert_eq!(value["value"], 0);
}

#[test]
fn test_raise_propagates_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(
        &["run", "--quiet", "--raise", "--shell", "--", "exit 5"],
        dir.path(),
    );

    assert_eq!(output.status.code(), Some(5));
    assert!(stderr_of(&output).contains("cmdwrap: command 'exit 5' returned non-zero exit status 5"));
}

#[test]
fn test_config_file_sets_options() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("cmdwrap.toml");
    std::fs::write(&config, "verbose = false\n\n[stdout]\nmute = true\n").unwrap();

    let output = run_cli(
        &["run", "--config", config.to_str().unwrap(), "--", "echo", "muted"],
        dir.path(),
    );
    assert!(output.status.success());
    assert_eq!(stdout_of(&output), "");
}

#[test]
fn test_bad_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("cmdwrap.toml");
    std::fs::write(&config, "verbose = \"loud\"\n").unwrap();

    let output = run_cli(
        &["run", "--config", config.to_str().unwrap(), "--", "true"],
        dir.path(),
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Failed to parse command options"));
}

#[test]
fn test_all_prints_summary() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(&["all", "--quiet", "true", "exit 2", "echo hi"], dir.path());

    assert_eq!(output.status.code(), Some(1));
    assert_snapshot!(stdout_of(&output).trim(), @r"
    hi

    Summary
    -------
    true: Ok
    exit 2: Error
    echo hi: Ok
    ");
}

#[test]
fn test_cwd_option() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "").unwrap();
    let elsewhere = tempfile::tempdir().unwrap();

    let output = run_cli(
        &["run", "--quiet", "--cwd", dir.path().to_str().unwrap(), "--", "ls"],
        elsewhere.path(),
    );
    assert!(stdout_of(&output).contains("marker.txt"));
}
