//! Demo program: stand-in for the ccache compiler wrapper
//!
//! Usage: ccache <program> [args...]
//! Reports the wrapped program on stderr (WRAPPED:<program>) along with the
//! _EMCC_CCACHE value it inherited, then runs the program with the remaining
//! arguments and exits with its exit code.

use std::env;
use std::ffi::OsString;
use std::process::{self, Command};

fn main() {
    let args: Vec<OsString> = env::args_os().skip(1).collect();

    let Some((program, rest)) = args.split_first() else {
        eprintln!("Usage: ccache <program> [args...]");
        process::exit(1);
    };

    eprintln!("WRAPPED:{}", program.to_string_lossy());
    match env::var("_EMCC_CCACHE") {
        Ok(value) => eprintln!("CCACHE_ENV:{}", value),
        Err(_) => eprintln!("CCACHE_ENV:<unset>"),
    }

    match Command::new(program).args(rest).status() {
        // Full range, as the real wrapper forwards it
        Ok(status) => process::exit(status.code().unwrap_or(1)),
        Err(e) => {
            eprintln!("Failed to run {}: {}", program.to_string_lossy(), e);
            process::exit(1);
        }
    }
}
