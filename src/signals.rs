use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::{consts::signal::*, iterator::Signals};
use std::sync::{Arc, Mutex};
use std::thread;

/// Registry of the process the shell is currently blocked on, shared
/// between the dispatch loop and the signal listener thread. Passed
/// explicitly rather than living in a process-wide global.
#[derive(Clone, Default)]
pub struct Foreground(Arc<Mutex<Option<Pid>>>);

impl Foreground {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pid: Pid) {
        *self.0.lock().unwrap() = Some(pid);
    }

    pub fn clear(&self) {
        *self.0.lock().unwrap() = None;
    }

    pub fn get(&self) -> Option<Pid> {
        *self.0.lock().unwrap()
    }

    /// Forwards `signal` to the current foreground process, if any.
    /// Returns true when a delivery was attempted and accepted.
    pub fn deliver(&self, signal: Signal) -> bool {
        match self.get() {
            Some(pid) => kill(pid, signal).is_ok(),
            None => false,
        }
    }
}

/// Installs signal handlers for the shell:
/// - SIGQUIT: prints a termination message and exits.
/// - SIGINT (Ctrl-C): forwarded to the foreground process only; with
///   no foreground process it is dropped, so the shell survives.
/// - SIGTSTP (Ctrl-Z): swallowed. Suspension is unsupported, and a
///   stopped foreground child would wedge the dispatch loop with
///   nothing able to resume it.
pub fn install_signal_handlers(foreground: Foreground) {
    let mut signals =
        Signals::new([SIGQUIT, SIGINT, SIGTSTP]).expect("Unable to create signal handler");
    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGQUIT => {
                    println!("Terminating after receipt of SIGQUIT signal");
                    std::process::exit(0);
                }
                SIGINT => {
                    foreground.deliver(Signal::SIGINT);
                }
                SIGTSTP => {}
                _ => unreachable!(),
            }
        }
    });
}
