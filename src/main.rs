mod builtins;
mod exec;
mod jobs;
mod parser;
mod pipeline;
mod redirect;
mod shell;
mod signals;
mod timeout;
mod utils;

use crate::signals::Foreground;
use std::env;

fn main() {
    // Parse command-line arguments.
    let args: Vec<String> = env::args().collect();
    let mut emit_prompt = true;
    let mut verbose = false;
    for arg in &args[1..] {
        match arg.as_str() {
            "-h" => utils::print_usage(),
            "-v" => verbose = true,
            "-p" => emit_prompt = false,
            _ => {}
        }
    }

    // The foreground registry is shared between the dispatch loop and
    // the signal listener, so interrupts reach only the active child.
    let foreground = Foreground::new();
    signals::install_signal_handlers(foreground.clone());

    shell::run_shell(emit_prompt, verbose, foreground);
}
