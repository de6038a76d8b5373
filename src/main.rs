use std::path::PathBuf;
use std::process;

use anstream::{AutoStream, ColorChoice};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cmdwrap::{
    AllowedExit, CmdResult, Command, CommandOptions, Outcome, Pipe, StderrTarget,
    SubprocessOptions, print_result, print_summary, run_subprocess, stream,
};

#[derive(Parser)]
#[command(name = "cmdwrap")]
#[command(about = "Run commands with live output capture and a status report", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one command, capturing its output
    Run {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Name shown in the title and status line (defaults to the command)
        #[arg(long)]
        name: Option<String>,

        /// Read command options from a TOML file; flags override it
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Exit codes that count as success, e.g. `1,42` or `*`
        #[arg(long, value_name = "CODES")]
        allow_exit: Option<AllowedExit>,

        /// Run through the platform shell
        #[arg(long)]
        shell: bool,

        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Print the full report (title, captured output, status) afterwards
        #[arg(long)]
        report: bool,

        /// Print the result as JSON afterwards
        #[arg(long, conflicts_with = "report")]
        json: bool,

        /// Let failures propagate instead of reporting them as a result
        #[arg(long)]
        raise: bool,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        argv: Vec<String>,
    },

    /// Run several shell commands and print a summary
    All {
        #[command(flatten)]
        capture: CaptureArgs,

        /// Shell command lines, one per command
        #[arg(required = true)]
        scripts: Vec<String>,
    },
}

#[derive(Args)]
struct CaptureArgs {
    /// Capture stdout and stderr
    #[arg(long)]
    capture: bool,

    /// Don't show the command's output (implies --capture)
    #[arg(long)]
    mute: bool,

    /// Capture at the file-descriptor level
    #[arg(long)]
    fd: bool,

    /// Keep escape sequences in the captured copy
    #[arg(long)]
    keep_ansi: bool,

    /// Keep captured output as raw bytes
    #[arg(long)]
    bytes: bool,

    /// Capture stderr together with stdout
    #[arg(long)]
    merge: bool,

    /// Don't print the title and status line
    #[arg(short, long)]
    quiet: bool,

    /// Disable colors
    #[arg(long)]
    no_color: bool,
}

impl CaptureArgs {
    fn apply(&self, mut options: CommandOptions) -> CommandOptions {
        if self.capture || self.mute || self.fd || self.merge || self.keep_ansi || self.bytes {
            let base = options.stdout.unwrap_or_default();
            let pipe = Pipe {
                mute: base.mute || self.mute,
                fd: base.fd || self.fd,
                tty: base.tty || self.keep_ansi,
                text: base.text && !self.bytes,
                ..base
            };
            options.stdout = Some(pipe);
            options.stderr = Some(if self.merge {
                StderrTarget::Merge
            } else {
                match options.stderr {
                    Some(StderrTarget::Pipe(existing)) => StderrTarget::Pipe(Pipe {
                        mute: existing.mute || self.mute,
                        fd: existing.fd || self.fd,
                        tty: existing.tty || self.keep_ansi,
                        text: existing.text && !self.bytes,
                        ..existing
                    }),
                    Some(StderrTarget::Merge) => StderrTarget::Merge,
                    None => StderrTarget::Pipe(pipe),
                }
            });
        }
        if self.quiet {
            options.verbose = false;
        }
        if self.no_color {
            options.color = false;
        }
        options
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("cmdwrap: {e:#}");
            process::exit(cmdwrap::exit_code(&e).map_or(1, shell_exit_code));
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn default_options() -> CommandOptions {
    CommandOptions {
        color: AutoStream::choice(&std::io::stdout()) != ColorChoice::Never,
        ..CommandOptions::default()
    }
}

fn run(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Run {
            capture,
            name,
            config,
            allow_exit,
            shell,
            cwd,
            report,
            json,
            raise,
            argv,
        } => {
            let mut options = match &config {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    CommandOptions::from_toml(&text)?
                }
                None => default_options(),
            };
            options = capture.apply(options);
            if raise {
                options.catch_err = false;
            }

            let mut sub = SubprocessOptions::new().shell(shell);
            if let Some(allowed) = allow_exit {
                sub = sub.allow(allowed);
            }
            if let Some(cwd) = cwd {
                sub = sub.cwd(cwd);
            }

            let name = name.unwrap_or_else(|| argv.join(" "));
            let color = options.color;
            let result = Command::new(name)
                .with_options(options)
                .run_value(|| run_subprocess(&argv, &sub).map(|done| done.code))?;

            if report {
                print_result(&result, color, &mut stream::out())?;
            } else if json {
                outln_json(&result)?;
            }
            Ok(shell_exit_code(result.code))
        }
        Commands::All { capture, scripts } => {
            let options = capture.apply(default_options());
            let color = options.color;
            let sub = SubprocessOptions::new().shell(true);

            let results = scripts
                .iter()
                .map(|script| {
                    Command::new(script.as_str())
                        .with_options(options.clone())
                        .run(|| Ok(Outcome::Value(run_subprocess(&[script], &sub)?.code)))
                })
                .collect::<anyhow::Result<Vec<CmdResult<i32>>>>()?;

            print_summary(&results, color, true, &mut stream::out())?;
            Ok(if results.iter().any(CmdResult::is_failure) { 1 } else { 0 })
        }
    }
}

fn outln_json(result: &CmdResult<i32>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
    cmdwrap::outln!("{json}");
    Ok(())
}

/// Map a result code onto a process exit status; signals become `128 + n`
fn shell_exit_code(code: i32) -> i32 {
    if code < 0 { 128 - code } else { code }
}
