// Launcher stub: runs the .py script next to this executable with Python
// Platform-specific code: Windows uses the Win32 API, Unix uses libc

mod argv;
mod cmdline;
mod config;
mod error;
mod launch;
mod path;
mod query;

#[cfg(windows)]
#[path = "sys/windows.rs"]
mod sys;

#[cfg(unix)]
#[path = "sys/unix.rs"]
mod sys;

use std::ffi::OsStr;
use std::process;

use config::{LaunchEnv, LOG_VAR};
use error::Result;
use launch::{LaunchPlan, ISOLATION_FLAG};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_VAR, "warn"))
        .format_timestamp(None)
        .init();
}

fn run() -> Result<i32> {
    let env = LaunchEnv::capture()?;

    let module_path = sys::module_path()?;
    let script = path::script_path(module_path.as_slice())?;

    let flag = sys::units(OsStr::new(ISOLATION_FLAG));
    let argv = sys::original_argv()?.inject(&flag, &script);
    if log::log_enabled!(log::Level::Debug) {
        for (i, arg) in argv.iter().enumerate() {
            log::debug!("argv[{}] = {}", i, sys::to_os_string(arg).to_string_lossy());
        }
    }

    LaunchPlan::new(&env, argv).launch()
}

fn main() {
    init_logging();

    match run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("script-launcher: {}", e);
            process::abort();
        }
    }
}
