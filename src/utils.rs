use std::process;

pub fn print_usage() {
    println!("Usage: rsh [-hvp]");
    println!("   -h   Print this help message");
    println!("   -v   Enable verbose mode");
    println!("   -p   Do not print a command prompt");
    process::exit(1);
}
