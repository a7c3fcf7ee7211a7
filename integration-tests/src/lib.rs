//! Fake Python interpreter
//!
//! Reports the argv and the launcher-managed environment it received as one
//! line of JSON on stdout, then exits with the number on the first line of
//! the script (argv[2], right after -E). A missing or unparsable script
//! exits 0.
//!
//! Built as a cdylib exporting the interpreter entry points for the
//! in-process launch, and linked into the fake-python executable.

use serde_json::{json, Map, Value};
use std::env;
use std::fs;
use std::io::Write;
use std::os::raw::c_int;

/// Variables the launcher sets or clears on the interpreter's behalf
pub const WATCHED_VARS: &[&str] = &[
    "_PYTHON_SYSCONFIGDATA_NAME",
    "_EMCC_CCACHE",
    "EMSDK_PYTHON",
    "EMSDK_PYTHON_LIBRARY",
];

/// Print the JSON report and return the requested exit code.
pub fn report(mode: &str, argv: &[String], null_terminated: bool) -> i32 {
    let env: Map<String, Value> = WATCHED_VARS
        .iter()
        .map(|&name| {
            let value = env::var(name).map_or(Value::Null, Value::String);
            (name.to_string(), value)
        })
        .collect();

    let line = json!({
        "mode": mode,
        "argv": argv,
        "null_terminated": null_terminated,
        "env": env,
    });

    // The launcher exits right after the entry point returns
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", line);
    let _ = stdout.flush();

    exit_code(argv)
}

fn exit_code(argv: &[String]) -> i32 {
    argv.get(2)
        .and_then(|script| fs::read_to_string(script).ok())
        .and_then(|content| content.lines().next()?.trim().parse().ok())
        .unwrap_or(0)
}

/// Byte-string entry point, looked up by the launcher on Unix.
///
/// # Safety
/// `argv` must hold `argc` NUL-terminated strings.
#[cfg(unix)]
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn Py_BytesMain(argc: c_int, argv: *mut *mut std::os::raw::c_char) -> c_int {
    let argc = argc.max(0) as usize;
    let args: Vec<String> = (0..argc)
        .map(|i| {
            std::ffi::CStr::from_ptr(*argv.add(i))
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    report("in-process", &args, (*argv.add(argc)).is_null())
}

/// Wide-string entry point, looked up by the launcher on Windows.
///
/// # Safety
/// `argv` must hold `argc` NUL-terminated UTF-16 strings.
#[cfg(windows)]
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn Py_Main(argc: c_int, argv: *mut *mut u16) -> c_int {
    let argc = argc.max(0) as usize;
    let args: Vec<String> = (0..argc)
        .map(|i| {
            let p = *argv.add(i);
            let mut len = 0;
            while *p.add(len) != 0 {
                len += 1;
            }
            String::from_utf16_lossy(std::slice::from_raw_parts(p, len))
        })
        .collect();
    report("in-process", &args, (*argv.add(argc)).is_null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_comes_from_first_line_of_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("emcc.py");
        fs::write(&script, "42\nprint('unused')\n").unwrap();

        let argv = vec![
            "emcc.exe".to_string(),
            "-E".to_string(),
            script.to_string_lossy().into_owned(),
        ];
        assert_eq!(exit_code(&argv), 42);
        assert_eq!(exit_code(&argv[..2]), 0);
    }
}
