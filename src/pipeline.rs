use crate::exec::{self, ExitStatus, LaunchError};
use crate::jobs::JobTracker;
use crate::parser::{Command, Pipeline};
use crate::redirect::{self, OutputMode, Redirector};
use crate::signals::Foreground;
use nix::errno::Errno;
use nix::unistd::{pipe, Pid};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every stage exited with status zero.
    Success,
    /// The lowest-indexed stage that did not exit zero; all other
    /// stages were still reaped.
    StageFailed { index: usize, status: ExitStatus },
    /// The last stage runs on, registered with the job tracker.
    Background { jid: i32, pid: Pid },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("empty pipeline")]
    Empty,
    #[error("cannot allocate pipe: {0}")]
    ResourceExhausted(Errno),
    #[error(transparent)]
    Spawn(#[from] LaunchError),
    #[error("redirection failed: {0}")]
    Redirection(#[from] io::Error),
    #[error("wait failed: {0}")]
    Wait(Errno),
    #[error("background job table is full")]
    JobTrackerFull,
}

/// One inter-stage byte channel. Both ends close on drop, so releasing
/// every parent copy is a matter of dropping the allocation vector.
struct PipePair {
    read: OwnedFd,
    write: OwnedFd,
}

impl PipePair {
    fn new() -> Result<Self, Errno> {
        let (read, write) = pipe()?;
        // SAFETY: pipe() returned two freshly opened descriptors we now own.
        unsafe {
            Ok(PipePair {
                read: OwnedFd::from_raw_fd(read),
                write: OwnedFd::from_raw_fd(write),
            })
        }
    }
}

/// Runs a parsed pipeline. Foreground execution blocks until every
/// stage has been reaped; background execution waits for the feeding
/// stages and registers the final stage with the job tracker.
pub fn run(
    pipeline: &Pipeline,
    background: bool,
    jobs: &Arc<Mutex<JobTracker>>,
    foreground: &Foreground,
) -> Result<PipelineOutcome, PipelineError> {
    let n = pipeline.commands.len();
    if n == 0 {
        return Err(PipelineError::Empty);
    }
    if background && jobs.lock().unwrap().is_full() {
        return Err(PipelineError::JobTrackerFull);
    }
    if n == 1 {
        return run_single(&pipeline.commands[0], background, jobs, foreground);
    }

    // All N-1 pipes are allocated up front; a failure here releases
    // every prior pair on drop, with no process spawned yet.
    let pipes: Vec<PipePair> = (0..n - 1)
        .map(|_| PipePair::new())
        .collect::<Result<_, _>>()
        .map_err(PipelineError::ResourceExhausted)?;
    let all_ends: Vec<RawFd> = pipes
        .iter()
        .flat_map(|p| [p.read.as_raw_fd(), p.write.as_raw_fd()])
        .collect();

    let mut pids: Vec<Pid> = Vec::with_capacity(n);
    for (i, cmd) in pipeline.commands.iter().enumerate() {
        let stdin_override = if i > 0 {
            Some(pipes[i - 1].read.as_raw_fd())
        } else {
            None
        };
        let stdout_override = if i < n - 1 {
            Some(pipes[i].write.as_raw_fd())
        } else {
            None
        };
        match exec::launch(cmd, stdin_override, stdout_override, &all_ends) {
            Ok(pid) => pids.push(pid),
            Err(err) => {
                // Already-launched stages must still be reaped; close
                // our pipe ends first so they all see end-of-stream.
                drop(pipes);
                for pid in pids {
                    let _ = exec::wait_blocking(pid);
                }
                return Err(err.into());
            }
        }
    }
    // The controlling process never reads or writes the pipes itself.
    drop(pipes);

    if background {
        // Earlier stages feed the pipe and are expected to finish on
        // their own; only the last stage is tracked.
        let last = pids[n - 1];
        for &pid in &pids[..n - 1] {
            let _ = exec::wait_blocking(pid);
        }
        let jid = jobs
            .lock()
            .unwrap()
            .add(last, pipeline.to_string())
            .map_err(|_| PipelineError::JobTrackerFull)?;
        return Ok(PipelineOutcome::Background { jid, pid: last });
    }

    let mut failed: Option<(usize, ExitStatus)> = None;
    let mut wait_err: Option<Errno> = None;
    for (i, &pid) in pids.iter().enumerate() {
        foreground.set(pid);
        match exec::wait_blocking(pid) {
            Ok(status) => {
                if !status.success() && failed.is_none() {
                    failed = Some((i, status));
                }
            }
            Err(err) => {
                if wait_err.is_none() {
                    wait_err = Some(err);
                }
            }
        }
    }
    foreground.clear();
    if let Some(err) = wait_err {
        return Err(PipelineError::Wait(err));
    }
    Ok(match failed {
        Some((index, status)) => PipelineOutcome::StageFailed { index, status },
        None => PipelineOutcome::Success,
    })
}

/// The degenerate N=1 path: no pipes. Foreground redirections are
/// bound in the shell itself and restored afterward; the child merely
/// inherits them. Background commands redirect child-side instead,
/// since the shell regains the streams immediately.
fn run_single(
    cmd: &Command,
    background: bool,
    jobs: &Arc<Mutex<JobTracker>>,
    foreground: &Foreground,
) -> Result<PipelineOutcome, PipelineError> {
    if background {
        let pid = exec::launch(cmd, None, None, &[])?;
        let jid = jobs
            .lock()
            .unwrap()
            .add(pid, cmd.to_string())
            .map_err(|_| PipelineError::JobTrackerFull)?;
        return Ok(PipelineOutcome::Background { jid, pid });
    }

    let pid = if cmd.infile.is_some() || cmd.outfile.is_some() {
        let redirector = Redirector::new()?;
        if let Some(path) = &cmd.infile {
            redirect::bind_input(path)?;
        }
        if let Some(path) = &cmd.outfile {
            let mode = if cmd.append {
                OutputMode::Append
            } else {
                OutputMode::Truncate
            };
            redirect::bind_output(path, mode)?;
        }
        let plain = Command {
            argv: cmd.argv.clone(),
            ..Command::default()
        };
        let pid = exec::launch(&plain, None, None, &[])?;
        redirector.restore_defaults()?;
        pid
    } else {
        exec::launch(cmd, None, None, &[])?
    };

    foreground.set(pid);
    let status = exec::wait_blocking(pid);
    foreground.clear();
    let status = status.map_err(PipelineError::Wait)?;
    Ok(if status.success() {
        PipelineOutcome::Success
    } else {
        PipelineOutcome::StageFailed { index: 0, status }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::EXEC_FAILURE_STATUS;
    use std::fs;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    fn fixture() -> (Arc<Mutex<JobTracker>>, Foreground) {
        (Arc::new(Mutex::new(JobTracker::new())), Foreground::new())
    }

    fn stage(argv: &[&str]) -> Command {
        Command {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            ..Command::default()
        }
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn identity_pipeline(n: usize, infile: &Path, outfile: &Path) -> Pipeline {
        let mut commands = vec![stage(&["cat"]); n];
        commands[0].infile = Some(path_str(infile));
        commands[n - 1].outfile = Some(path_str(outfile));
        Pipeline { commands }
    }

    fn assert_identity(n: usize) {
        let (jobs, fg) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let inp = dir.path().join("in.txt");
        let out = dir.path().join("out.txt");
        let payload = b"pipeline payload\nsecond line\n";
        fs::write(&inp, payload).unwrap();

        let pipeline = identity_pipeline(n, &inp, &out);
        let outcome = run(&pipeline, false, &jobs, &fg).unwrap();
        assert!(matches!(outcome, PipelineOutcome::Success));
        assert_eq!(fs::read(&out).unwrap(), payload);
    }

    #[test]
    fn test_identity_single_stage() {
        assert_identity(1);
    }

    #[test]
    fn test_identity_two_stages() {
        assert_identity(2);
    }

    #[test]
    fn test_identity_five_stages() {
        assert_identity(5);
    }

    #[test]
    fn test_single_stage_failure_status() {
        let (jobs, fg) = fixture();
        let pipeline = Pipeline {
            commands: vec![stage(&["sh", "-c", "exit 3"])],
        };
        let outcome = run(&pipeline, false, &jobs, &fg).unwrap();
        match outcome {
            PipelineOutcome::StageFailed { index, status } => {
                assert_eq!(index, 0);
                assert_eq!(status, ExitStatus::Exited(3));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_interior_stage_failure_is_attributed() {
        let (jobs, fg) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut last = stage(&["cat"]);
        last.outfile = Some(path_str(&out));
        let pipeline = Pipeline {
            commands: vec![stage(&["echo", "hi"]), stage(&["rsh-no-such-command"]), last],
        };
        let outcome = run(&pipeline, false, &jobs, &fg).unwrap();
        match outcome {
            PipelineOutcome::StageFailed { index, status } => {
                assert_eq!(index, 1);
                assert_eq!(status, ExitStatus::Exited(EXEC_FAILURE_STATUS));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // The downstream cat saw end-of-stream, ran to completion and
        // left an empty file; nothing hung on a leaked write end.
        assert_eq!(fs::read(&out).unwrap(), b"");
    }

    #[test]
    fn test_background_job_is_tracked_then_reaped() {
        let (jobs, fg) = fixture();
        let pipeline = Pipeline {
            commands: vec![stage(&["sleep", "0.3"])],
        };
        let outcome = run(&pipeline, true, &jobs, &fg).unwrap();
        let pid = match outcome {
            PipelineOutcome::Background { jid, pid } => {
                assert_eq!(jid, 1);
                pid
            }
            other => panic!("unexpected outcome: {:?}", other),
        };

        let report = jobs.lock().unwrap().status_report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].pid, pid);
        assert_eq!(report[0].status, crate::jobs::JobStatus::Running);

        thread::sleep(Duration::from_millis(700));
        let reaped = jobs.lock().unwrap().reap_all_nonblocking();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].pid, pid);
        assert!(jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_background_pipeline_tracks_last_stage_only() {
        let (jobs, fg) = fixture();
        let pipeline = Pipeline {
            commands: vec![stage(&["echo", "hi"]), stage(&["sh", "-c", "cat; sleep 0.3"])],
        };
        let outcome = run(&pipeline, true, &jobs, &fg).unwrap();
        assert!(matches!(outcome, PipelineOutcome::Background { .. }));
        assert_eq!(jobs.lock().unwrap().len(), 1);
        thread::sleep(Duration::from_millis(700));
        assert_eq!(jobs.lock().unwrap().reap_all_nonblocking().len(), 1);
    }

    #[test]
    fn test_background_rejected_when_tracker_full() {
        let jobs = Arc::new(Mutex::new(JobTracker::with_capacity(0)));
        let fg = Foreground::new();
        let pipeline = Pipeline {
            commands: vec![stage(&["sleep", "1"])],
        };
        assert!(matches!(
            run(&pipeline, true, &jobs, &fg),
            Err(PipelineError::JobTrackerFull)
        ));
    }

    #[test]
    fn test_empty_pipeline_is_rejected() {
        let (jobs, fg) = fixture();
        let pipeline = Pipeline { commands: vec![] };
        assert!(matches!(
            run(&pipeline, false, &jobs, &fg),
            Err(PipelineError::Empty)
        ));
    }

    #[test]
    fn test_missing_input_file_spawns_nothing() {
        let (jobs, fg) = fixture();
        let mut cmd = stage(&["cat"]);
        cmd.infile = Some("/no/such/input/file".to_string());
        let pipeline = Pipeline {
            commands: vec![cmd],
        };
        assert!(matches!(
            run(&pipeline, false, &jobs, &fg),
            Err(PipelineError::Redirection(_))
        ));
    }
}
