//! Demo program: stand-in for the Python interpreter executable
//!
//! Usage: fake-python -E <script> [args...]
//! Outputs one JSON line with its argv and the launcher-managed
//! environment, then exits with the number on the script's first line.

use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    process::exit(fake_interpreter::report("child", &args, true));
}
