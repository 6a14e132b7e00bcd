use crate::exec::{self, ExitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use thiserror::Error;

/// Default bound on concurrently tracked background jobs.
pub const DEFAULT_MAX_JOBS: usize = 64;

#[derive(Debug, Error)]
#[error("background job table is full ({0} jobs)")]
pub struct JobTrackerFull(pub usize);

/// Observed state of a tracked background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Exited(i32),
    Signaled(i32),
}

impl From<ExitStatus> for JobStatus {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Exited(code) => JobStatus::Exited(code),
            ExitStatus::Signaled(signo) => JobStatus::Signaled(signo),
        }
    }
}

#[derive(Debug)]
struct Job {
    jid: i32,
    cmdline: String,
}

/// One row of a reconciliation or status pass.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub jid: i32,
    pub pid: Pid,
    pub status: JobStatus,
    pub cmdline: String,
}

/// Tracks running background processes, keyed by process ID. Only
/// non-blocking waits are ever issued against tracked pids, so the
/// interactive loop can never stall here.
pub struct JobTracker {
    jobs: HashMap<i32, Job>,
    next_jid: i32,
    capacity: usize,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        JobTracker {
            jobs: HashMap::new(),
            next_jid: 1,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.capacity
    }

    /// Registers a backgrounded process and returns its job ID.
    /// Capacity exhaustion rejects the add; it never panics.
    pub fn add(&mut self, pid: Pid, cmdline: String) -> Result<i32, JobTrackerFull> {
        if self.is_full() {
            return Err(JobTrackerFull(self.capacity));
        }
        let jid = self.next_jid;
        self.next_jid += 1;
        self.jobs.insert(pid.as_raw(), Job { jid, cmdline });
        Ok(jid)
    }

    /// Non-blocking sweep over every tracked pid; removes and returns
    /// only those confirmed terminated. Called once per dispatch cycle.
    pub fn reap_all_nonblocking(&mut self) -> Vec<JobReport> {
        self.sweep(false)
    }

    /// Reports the current state of every tracked job. A terminal
    /// observation during the probe is itself the confirming wait, so
    /// such entries are removed after being reported.
    pub fn status_report(&mut self) -> Vec<JobReport> {
        self.sweep(true)
    }

    fn sweep(&mut self, include_running: bool) -> Vec<JobReport> {
        let mut reports = Vec::new();
        let tracked: Vec<i32> = self.jobs.keys().copied().collect();
        for raw in tracked {
            let pid = Pid::from_raw(raw);
            match exec::wait_nonblocking(pid) {
                Ok(None) => {
                    if include_running {
                        if let Some(job) = self.jobs.get(&raw) {
                            reports.push(JobReport {
                                jid: job.jid,
                                pid,
                                status: JobStatus::Running,
                                cmdline: job.cmdline.clone(),
                            });
                        }
                    }
                }
                Ok(Some(status)) => {
                    if let Some(job) = self.jobs.remove(&raw) {
                        reports.push(JobReport {
                            jid: job.jid,
                            pid,
                            status: status.into(),
                            cmdline: job.cmdline,
                        });
                    }
                }
                // The child no longer exists for us to wait on;
                // nothing left to track.
                Err(_) => {
                    self.jobs.remove(&raw);
                }
            }
        }
        reports.sort_by_key(|report| report.jid);
        reports
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as OsCommand;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_capacity_rejects_add() {
        let mut tracker = JobTracker::with_capacity(1);
        tracker.add(Pid::from_raw(88888), "first".into()).unwrap();
        assert!(tracker.is_full());
        assert!(tracker.add(Pid::from_raw(88889), "second".into()).is_err());
    }

    #[test]
    fn test_job_ids_are_sequential() {
        let mut tracker = JobTracker::with_capacity(4);
        assert_eq!(tracker.add(Pid::from_raw(77771), "a".into()).unwrap(), 1);
        assert_eq!(tracker.add(Pid::from_raw(77772), "b".into()).unwrap(), 2);
    }

    #[test]
    fn test_running_then_reaped() {
        let child = OsCommand::new("sleep").arg("0.3").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let mut tracker = JobTracker::new();
        tracker.add(pid, "sleep 0.3".into()).unwrap();

        let report = tracker.status_report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].status, JobStatus::Running);
        assert!(tracker.reap_all_nonblocking().is_empty());

        thread::sleep(Duration::from_millis(700));
        let reaped = tracker.reap_all_nonblocking();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].pid, pid);
        assert_eq!(reaped[0].status, JobStatus::Exited(0));
        assert!(tracker.is_empty());
    }
}
