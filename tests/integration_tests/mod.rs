mod cli;
mod cli_pty;
mod fd_capture;
mod subprocess;
