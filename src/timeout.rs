use crate::exec::{self, ExitStatus, LaunchError};
use crate::parser::{Command, Pipeline};
use crate::signals::Foreground;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("wait failed: {0}")]
    Wait(Errno),
}

/// Runs `cmd` in the foreground under a wall-clock deadline. On expiry
/// the child is killed and reaped before `DeadlineExceeded` is
/// returned, so no process outlives the call. A natural exit disarms
/// the deadline and yields the real status. `seconds == 0` means no
/// deadline at all.
///
/// The child is registered with the foreground registry for the whole
/// wait, so interrupts reach it like any other foreground command.
pub fn run_with_timeout(
    cmd: &Command,
    seconds: u32,
    foreground: &Foreground,
) -> Result<ExitStatus, TimeoutError> {
    let pid = exec::launch(cmd, None, None, &[])?;
    foreground.set(pid);
    let result = supervise(pid, seconds);
    foreground.clear();
    result
}

fn supervise(pid: Pid, seconds: u32) -> Result<ExitStatus, TimeoutError> {
    if seconds == 0 {
        return exec::wait_blocking(pid).map_err(TimeoutError::Wait);
    }

    let deadline = Instant::now() + Duration::from_secs(u64::from(seconds));
    loop {
        match exec::wait_nonblocking(pid).map_err(TimeoutError::Wait)? {
            Some(status) => return Ok(status),
            None => {
                if Instant::now() >= deadline {
                    let _ = kill(pid, Signal::SIGKILL);
                    let _ = exec::wait_blocking(pid);
                    return Err(TimeoutError::DeadlineExceeded);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Recognizes a single-stage `timeout <secs> <cmd...>` line and peels
/// off the wrapped command; such lines bypass the pipeline builder.
pub fn deadline_wrapper(pipeline: &Pipeline) -> Option<(u32, Command)> {
    let [cmd] = pipeline.commands.as_slice() else {
        return None;
    };
    if cmd.argv.len() < 3 || cmd.argv[0] != "timeout" {
        return None;
    }
    let seconds = cmd.argv[1].parse().ok()?;
    Some((
        seconds,
        Command {
            argv: cmd.argv[2..].to_vec(),
            infile: cmd.infile.clone(),
            outfile: cmd.outfile.clone(),
            append: cmd.append,
        },
    ))
}
