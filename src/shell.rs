use crate::builtins::handle_builtin;
use crate::exec::ExitStatus;
use crate::jobs::JobTracker;
use crate::parser::{parse_command_line, Pipeline};
use crate::pipeline::{self, PipelineOutcome};
use crate::signals::Foreground;
use crate::timeout::{self, TimeoutError};
use once_cell::sync::Lazy;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Global prompt string.
pub static PROMPT: &str = "rsh> ";

static HISTORY_FILE: Lazy<Option<PathBuf>> =
    Lazy::new(|| dirs_next::home_dir().map(|home| home.join(".rsh_history")));

/// Runs the main shell loop: prints the prompt (if enabled), reads
/// input, parses it, and evaluates commands. After every dispatch one
/// non-blocking reconciliation pass reports finished background jobs.
///
/// - `emit_prompt`: if true, prints the command prompt.
/// - `verbose`: if true, prints extra dispatch information.
pub fn run_shell(emit_prompt: bool, verbose: bool, foreground: Foreground) {
    let jobs = Arc::new(Mutex::new(JobTracker::new()));

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("rsh: cannot initialize line editor: {}", err);
            return;
        }
    };
    if let Some(path) = HISTORY_FILE.as_ref() {
        let _ = editor.load_history(path);
    }

    loop {
        let prompt = if emit_prompt { PROMPT } else { "" };
        let cmdline = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue, // Ctrl-C at the prompt
            Err(ReadlineError::Eof) => break,            // Ctrl-D
            Err(err) => {
                eprintln!("rsh: error reading input: {}", err);
                break;
            }
        };
        if cmdline.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(cmdline.as_str());
        if verbose {
            println!("Received command: {}", cmdline.trim());
        }

        match parse_command_line(&cmdline) {
            Ok((pipeline, background)) => {
                if !handle_builtin(&pipeline, &jobs) {
                    dispatch(&pipeline, background, &jobs, &foreground, verbose);
                }
            }
            Err(err) => eprintln!("rsh: parse error: {}", err),
        }

        // One reconciliation pass per loop iteration; never blocks.
        let mut tracker = jobs.lock().unwrap();
        for done in tracker.reap_all_nonblocking() {
            println!("[{}] ({}) Done {}", done.jid, done.pid, done.cmdline);
        }
        if verbose && !tracker.is_empty() {
            println!("{} background job(s) still running", tracker.len());
        }
    }

    if let Some(path) = HISTORY_FILE.as_ref() {
        let _ = editor.save_history(path);
    }
}

fn dispatch(
    pipeline: &Pipeline,
    background: bool,
    jobs: &Arc<Mutex<JobTracker>>,
    foreground: &Foreground,
    verbose: bool,
) {
    if let Some((seconds, cmd)) = timeout::deadline_wrapper(pipeline) {
        if background {
            eprintln!("rsh: timeout: background execution is not supported");
            return;
        }
        match timeout::run_with_timeout(&cmd, seconds, foreground) {
            Ok(status) => {
                if verbose {
                    println!("{}: finished with {}", cmd.argv[0], status);
                }
            }
            Err(TimeoutError::DeadlineExceeded) => {
                eprintln!("rsh: {}: killed after {}s", cmd.argv[0], seconds)
            }
            Err(err) => eprintln!("rsh: {}", err),
        }
        return;
    }

    match pipeline::run(pipeline, background, jobs, foreground) {
        Ok(PipelineOutcome::Success) => {}
        Ok(PipelineOutcome::StageFailed { index, status }) => match status {
            ExitStatus::Signaled(signo) => {
                eprintln!("rsh: stage {} terminated by signal {}", index, signo)
            }
            ExitStatus::Exited(code) if verbose => {
                println!("stage {} exited with status {}", index, code)
            }
            _ => {}
        },
        Ok(PipelineOutcome::Background { jid, pid }) => println!("[{}] ({})", jid, pid),
        Err(err) => eprintln!("rsh: {}", err),
    }
}
