use crate::parser::Command;
use crate::redirect::{self, OutputMode};
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, dup2, execvp, fork, ForkResult, Pid};
use std::ffi::CString;
use std::fmt;
use std::os::fd::RawFd;
use thiserror::Error;

/// Exit status used by a child whose exec failed.
pub const EXEC_FAILURE_STATUS: i32 = 127;
/// Exit status used by a child whose redirection could not be set up.
pub const REDIRECT_FAILURE_STATUS: i32 = 126;

/// Terminal state of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit status {}", code),
            ExitStatus::Signaled(signo) => write!(f, "signal {}", signo),
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("cannot fork: {0}")]
    ResourceExhausted(Errno),
    #[error("empty command")]
    EmptyCommand,
    #[error("argument contains an interior NUL byte")]
    BadArgv,
}

/// Spawns `cmd` as a new process. The child rebinds its standard
/// streams to the given overrides, or to the command's own file
/// redirections when no override is present, closes every descriptor
/// in `close_in_child`, and replaces its image via `execvp` (PATH
/// search and environment inheritance come from the exec primitive).
///
/// Exec or redirection failure is only observable in the child; it
/// reports to its inherited stderr and terminates through `_exit`,
/// never returning into shared parent logic.
pub fn launch(
    cmd: &Command,
    stdin_override: Option<RawFd>,
    stdout_override: Option<RawFd>,
    close_in_child: &[RawFd],
) -> Result<Pid, LaunchError> {
    if cmd.argv.is_empty() {
        return Err(LaunchError::EmptyCommand);
    }
    // Built before forking; the child only dup2s, closes and execs.
    let argv: Vec<CString> = cmd
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<_, _>>()
        .map_err(|_| LaunchError::BadArgv)?;

    match unsafe { fork() } {
        Ok(ForkResult::Child) => child_exec(cmd, &argv, stdin_override, stdout_override, close_in_child),
        Ok(ForkResult::Parent { child }) => Ok(child),
        Err(err) => Err(LaunchError::ResourceExhausted(err)),
    }
}

fn child_exec(
    cmd: &Command,
    argv: &[CString],
    stdin_override: Option<RawFd>,
    stdout_override: Option<RawFd>,
    close_in_child: &[RawFd],
) -> ! {
    match stdin_override {
        Some(fd) => {
            if dup2(fd, libc::STDIN_FILENO).is_err() {
                child_fail("cannot rebind stdin", REDIRECT_FAILURE_STATUS);
            }
        }
        None => {
            if let Some(path) = &cmd.infile {
                if let Err(err) = redirect::bind_input(path) {
                    child_fail(&format!("{}: {}", path, err), REDIRECT_FAILURE_STATUS);
                }
            }
        }
    }
    match stdout_override {
        Some(fd) => {
            if dup2(fd, libc::STDOUT_FILENO).is_err() {
                child_fail("cannot rebind stdout", REDIRECT_FAILURE_STATUS);
            }
        }
        None => {
            if let Some(path) = &cmd.outfile {
                let mode = if cmd.append {
                    OutputMode::Append
                } else {
                    OutputMode::Truncate
                };
                if let Err(err) = redirect::bind_output(path, mode) {
                    child_fail(&format!("{}: {}", path, err), REDIRECT_FAILURE_STATUS);
                }
            }
        }
    }

    // Every pipe end this stage does not use must be closed before
    // exec, or downstream readers never see end-of-stream.
    for &fd in close_in_child {
        let _ = close(fd);
    }

    // execvp only returns on failure.
    let err = match execvp(&argv[0], argv) {
        Ok(infallible) => match infallible {},
        Err(err) => err,
    };
    eprintln!("rsh: {}: {}", cmd.argv[0], err);
    unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
}

fn child_fail(msg: &str, status: i32) -> ! {
    eprintln!("rsh: {}", msg);
    unsafe { libc::_exit(status) }
}

/// Waits for `pid` to reach a terminal state, retrying on EINTR.
/// Suspension is unsupported, so a child observed stopped is resumed
/// with SIGCONT rather than left wedging the wait.
pub fn wait_blocking(pid: Pid) -> Result<ExitStatus, Errno> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitStatus::Signaled(signal as i32))
            }
            Ok(WaitStatus::Stopped(stopped, _)) => {
                let _ = kill(stopped, Signal::SIGCONT);
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Polls `pid` without blocking; `None` means still running.
pub fn wait_nonblocking(pid: Pid) -> Result<Option<ExitStatus>, Errno> {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(WaitStatus::Exited(_, code)) => Ok(Some(ExitStatus::Exited(code))),
        Ok(WaitStatus::Signaled(_, signal, _)) => Ok(Some(ExitStatus::Signaled(signal as i32))),
        Ok(_) => Ok(None),
        Err(Errno::EINTR) => Ok(None),
        Err(err) => Err(err),
    }
}
