// Unix implementation
// Byte strings throughout; dynamic loading and stdin handling through libc.

use std::ffi::{CString, OsStr, OsString};
use std::os::raw::c_int;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::process::ExitStatusExt;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, ExitStatus};

use crate::argv::PackedArgv;
use crate::error::{LaunchError, QueryError, Result};
use crate::query::SizedBuffer;

pub type Unit = u8;

/// Signature of `Py_BytesMain`.
pub type EntryPoint = unsafe extern "C" fn(c_int, *mut *mut Unit) -> c_int;

pub const ENTRY_SYMBOL: &str = "Py_BytesMain";
const ENTRY_SYMBOL_Z: &[u8] = b"Py_BytesMain\0";

pub const CCACHE_PROGRAM: &str = "ccache";

pub fn units(s: &OsStr) -> Vec<Unit> {
    s.as_bytes().to_vec()
}

pub fn to_os_string(units: &[Unit]) -> OsString {
    OsString::from_vec(units.to_vec())
}

#[cfg(target_os = "linux")]
pub fn module_path() -> Result<SizedBuffer<Unit>> {
    use crate::query::{query, Fetch};
    use std::io;

    // A full buffer from readlink may be a truncated result.
    query(|buf: &mut [u8]| {
        if buf.is_empty() {
            return Fetch::TooSmall(None);
        }
        let n = unsafe {
            libc::readlink(
                b"/proc/self/exe\0".as_ptr().cast(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        match n {
            n if n < 0 => Fetch::Failed(io::Error::last_os_error()),
            n if n as usize == buf.len() => Fetch::TooSmall(None),
            n => Fetch::Filled(n as usize),
        }
    })
    .map_err(LaunchError::ModulePath)
}

#[cfg(target_os = "macos")]
pub fn module_path() -> Result<SizedBuffer<Unit>> {
    use crate::query::{query, Fetch};
    use std::os::raw::c_char;

    extern "C" {
        fn _NSGetExecutablePath(buf: *mut c_char, bufsize: *mut u32) -> c_int;
    }

    // Reports the required size (terminator included) when the buffer is short.
    query(|buf: &mut [u8]| {
        let mut size = buf.len() as u32;
        let ptr = if buf.is_empty() {
            std::ptr::null_mut()
        } else {
            buf.as_mut_ptr().cast()
        };
        if unsafe { _NSGetExecutablePath(ptr, &mut size) } != 0 {
            return Fetch::TooSmall(Some((size as usize).saturating_sub(1)));
        }
        Fetch::Filled(buf.iter().position(|&b| b == 0).unwrap_or(buf.len()))
    })
    .map_err(LaunchError::ModulePath)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn module_path() -> Result<SizedBuffer<Unit>> {
    use crate::query::{query, Fetch};

    let exe = std::env::current_exe().map_err(|e| LaunchError::ModulePath(QueryError::Os(e)))?;
    let bytes = exe.into_os_string().into_vec();
    query(|buf: &mut [u8]| {
        if buf.len() <= bytes.len() {
            return Fetch::TooSmall(Some(bytes.len()));
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Fetch::Filled(bytes.len())
    })
    .map_err(LaunchError::ModulePath)
}

/// Absolute form of `path` with `.` and `..` folded lexically. The file
/// does not need to exist.
pub fn full_path(path: &[Unit]) -> Result<Vec<Unit>> {
    let path = Path::new(OsStr::from_bytes(path));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| LaunchError::FullPath {
            path: path.as_os_str().to_owned(),
            source: QueryError::Os(e),
        })?;
        cwd.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized.into_os_string().into_vec())
}

pub fn getenv(name: &'static str) -> Result<Option<OsString>> {
    Ok(std::env::var_os(name))
}

/// Remove `name` from this process's environment, where an embedded
/// interpreter will look for it.
pub fn clear_env(name: &str) {
    std::env::remove_var(name);
}

/// The platform argv. Unix hands it over already split.
pub fn original_argv() -> Result<PackedArgv<Unit>> {
    Ok(PackedArgv::from_args(
        std::env::args_os().map(OsStringExt::into_vec),
    ))
}

pub fn set_args(command: &mut Command, args: &[&[Unit]]) {
    command.args(args.iter().map(|a| OsStr::from_bytes(a)));
}

/// Exit code of a finished child; death by signal N maps to 128 + N.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

pub fn close_stdin() {
    unsafe {
        libc::close(libc::STDIN_FILENO);
    }
}

/// A dynamically loaded interpreter library. Never unloaded; the entry
/// point runs until the process exits.
pub struct Library {
    handle: *mut libc::c_void,
    path: OsString,
}

impl Library {
    pub fn open(path: &OsStr) -> Result<Self> {
        let c_path = CString::new(path.as_bytes()).map_err(|_| LaunchError::LoadLibrary {
            path: path.to_owned(),
            reason: "path contains a NUL byte".to_string(),
        })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            return Err(LaunchError::LoadLibrary {
                path: path.to_owned(),
                reason: dlerror(),
            });
        }

        Ok(Self {
            handle,
            path: path.to_owned(),
        })
    }

    pub fn entry_point(&self) -> Result<EntryPoint> {
        let sym = unsafe { libc::dlsym(self.handle, ENTRY_SYMBOL_Z.as_ptr().cast()) };
        if sym.is_null() {
            return Err(LaunchError::MissingSymbol {
                path: self.path.clone(),
                symbol: ENTRY_SYMBOL,
            });
        }
        // SAFETY: the symbol is the interpreter's documented main entry point
        Ok(unsafe { std::mem::transmute::<*mut libc::c_void, EntryPoint>(sym) })
    }
}

fn dlerror() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        return "unknown error".to_string();
    }
    unsafe { std::ffi::CStr::from_ptr(msg) }
        .to_string_lossy()
        .into_owned()
}
