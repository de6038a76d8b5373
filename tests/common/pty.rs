//! Run the binary inside a pseudo-terminal so it sees a real TTY on stdout.
//!
//! ```ignore
//! use crate::common::pty::{build_pty_command, exec_cmd_in_pty};
//!
//! let cmd = build_pty_command(&["run", "--name", "x", "--", "true"], dir);
//! let (output, exit_code) = exec_cmd_in_pty(cmd);
//! ```

use portable_pty::{CommandBuilder, MasterPty};
use std::io::{Read, Write};
use std::path::Path;

/// Read output from the PTY and wait for the child.
///
/// On Unix the reader hits EOF (or EIO) once the child and every process it
/// spawned have closed the slave. ConPTY keeps the pipe open after the child
/// exits, so on Windows the master is closed on a helper thread while the
/// reader drains.
pub fn read_pty_output(
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    child: &mut Box<dyn portable_pty::Child + Send + Sync>,
) -> (String, i32) {
    drop(writer);

    #[cfg(unix)]
    {
        let _ = master;
        let mut reader = reader;
        let mut buf = Vec::new();
        // EIO at end-of-stream on Linux; whatever was read is kept
        let _ = reader.read_to_end(&mut buf);
        let exit_status = child.wait().unwrap();
        (
            String::from_utf8_lossy(&buf).into_owned(),
            exit_status.exit_code() as i32,
        )
    }

    #[cfg(windows)]
    {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let (tx, rx) = mpsc::channel();
        let read_thread = thread::spawn(move || {
            let mut reader = reader;
            let mut output = Vec::new();
            let mut chunk = [0u8; 4096];
            while let Ok(n) = reader.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                output.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(output);
        });

        let exit_code = child.wait().unwrap().exit_code() as i32;
        let close_thread = thread::spawn(move || drop(master));
        let output = rx.recv_timeout(Duration::from_secs(10)).unwrap_or_default();

        // Either thread may still be blocked inside ConPTY; they die with the process
        drop(close_thread);
        drop(read_thread);
        (String::from_utf8_lossy(&output).into_owned(), exit_code)
    }
}

/// A `CommandBuilder` for the `cmdwrap` binary with an isolated environment
pub fn build_pty_command(args: &[&str], working_dir: &Path) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(super::cmdwrap_bin());
    for arg in args {
        cmd.arg(*arg);
    }
    cmd.cwd(working_dir);
    super::configure_pty_command(&mut cmd);
    cmd
}

/// Run `cmd` in a fresh PTY; output has `\r\n` normalized to `\n`
pub fn exec_cmd_in_pty(cmd: CommandBuilder) -> (String, i32) {
    let pair = super::open_pty();

    let mut child = pair.slave.spawn_command(cmd).unwrap();
    drop(pair.slave);

    let reader = pair.master.try_clone_reader().unwrap();
    let writer = pair.master.take_writer().unwrap();

    let (buf, exit_code) = read_pty_output(reader, writer, pair.master, &mut child);
    (buf.replace("\r\n", "\n"), exit_code)
}
