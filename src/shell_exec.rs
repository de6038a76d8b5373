//! Platform shell for `SubprocessOptions::shell`
//!
//! - Unix: `sh -c <script>`
//! - Windows: Git Bash when it can be found, otherwise PowerShell
//!
//! With a POSIX shell the same command line works everywhere the crate runs,
//! so shell-mode tests and `cmdwrap all` scripts don't need per-platform text.

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

static SHELL: OnceLock<ShellConfig> = OnceLock::new();

/// How to hand a script string to the platform shell
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub executable: PathBuf,
    /// Flags placed before the script (`-c`, `-Command`)
    pub args: Vec<String>,
    pub is_posix: bool,
    pub name: String,
}

impl ShellConfig {
    /// The shell for this platform, detected once per process
    pub fn get() -> &'static ShellConfig {
        SHELL.get_or_init(detect_shell)
    }

    /// A `Command` that runs `script` through this shell
    pub fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args).arg(script);
        cmd
    }

    /// A `Command` for an argv given in shell mode.
    ///
    /// A single element is taken as the whole script; several elements are
    /// joined with spaces, so `["echo", "$HOME"]` still expands.
    pub fn command_for_argv(&self, argv: &[String]) -> Command {
        self.command(&argv.join(" "))
    }
}

fn detect_shell() -> ShellConfig {
    #[cfg(unix)]
    {
        ShellConfig {
            executable: PathBuf::from("sh"),
            args: vec!["-c".to_string()],
            is_posix: true,
            name: "sh".to_string(),
        }
    }

    #[cfg(windows)]
    {
        match find_git_bash() {
            Some(bash) => ShellConfig {
                executable: bash,
                args: vec!["-c".to_string()],
                is_posix: true,
                name: "Git Bash".to_string(),
            },
            None => {
                log::debug!("Git Bash not found; running shell commands through PowerShell");
                ShellConfig {
                    executable: PathBuf::from("powershell.exe"),
                    args: vec!["-NoProfile".to_string(), "-Command".to_string()],
                    is_posix: false,
                    name: "PowerShell".to_string(),
                }
            }
        }
    }
}

/// Git Bash lives at `<git>/bin/bash.exe`; `git.exe` sits in `<git>/cmd` or `<git>/bin`
#[cfg(windows)]
fn find_git_bash() -> Option<PathBuf> {
    if std::env::var_os("MSYSTEM").is_some()
        && let Ok(bash) = which::which("bash")
    {
        return Some(bash);
    }

    [
        r"C:\Program Files\Git\bin\bash.exe",
        r"C:\Program Files (x86)\Git\bin\bash.exe",
    ]
    .into_iter()
    .map(PathBuf::from)
    .chain(
        which::which("git")
            .ok()
            .and_then(|git| Some(git.parent()?.parent()?.join("bin").join("bash.exe"))),
    )
    .find(|path| path.exists())
}
