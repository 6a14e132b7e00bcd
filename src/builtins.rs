use crate::jobs::{JobStatus, JobTracker};
use crate::parser::Pipeline;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Checks if the line is a built-in command and, if so, executes it.
/// Supported built-ins are "exit", "bgstatus", and "cd". Returns true
/// if the command was built-in and handled; false otherwise. Built-ins
/// never apply inside a multi-stage pipeline.
pub fn handle_builtin(pipeline: &Pipeline, jobs: &Arc<Mutex<JobTracker>>) -> bool {
    if pipeline.commands.len() != 1 {
        return false;
    }
    let cmd = &pipeline.commands[0];
    if cmd.argv.is_empty() {
        return false;
    }
    match cmd.argv[0].as_str() {
        "exit" => {
            std::process::exit(0);
        }
        "bgstatus" => {
            print_status(&mut jobs.lock().unwrap());
            true
        }
        "cd" => {
            change_dir(cmd.argv.get(1));
            true
        }
        _ => false,
    }
}

fn change_dir(target: Option<&String>) {
    let dest: Option<PathBuf> = match target {
        Some(dir) => Some(PathBuf::from(dir)),
        None => dirs_next::home_dir(),
    };
    match dest {
        Some(dir) => {
            if let Err(err) = env::set_current_dir(&dir) {
                eprintln!("rsh: cd: {}: {}", dir.display(), err);
            }
        }
        None => eprintln!("rsh: cd: cannot determine home directory"),
    }
}

fn print_status(jobs: &mut JobTracker) {
    if jobs.is_empty() {
        println!("no background jobs");
        return;
    }
    for report in jobs.status_report() {
        let state = match report.status {
            JobStatus::Running => "Running".to_string(),
            JobStatus::Exited(code) => format!("Exited({})", code),
            JobStatus::Signaled(signo) => format!("Signaled({})", signo),
        };
        println!(
            "[{}] ({}) {} {}",
            report.jid, report.pid, state, report.cmdline
        );
    }
}
