// Windows implementation using the Win32 API (kernel32.dll)
// UTF-16 strings throughout.

use std::ffi::{OsStr, OsString};
use std::io;
use std::os::raw::c_int;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::os::windows::process::CommandExt;
use std::process::{Command, ExitStatus};
use std::ptr;

use crate::argv::PackedArgv;
use crate::cmdline::render_args;
use crate::error::{LaunchError, QueryError, Result};
use crate::path::extended_length;
use crate::query::{query, Fetch, SizedBuffer};

pub type Unit = u16;

/// Signature of `Py_Main`.
pub type EntryPoint = unsafe extern "C" fn(c_int, *mut *mut Unit) -> c_int;

pub const ENTRY_SYMBOL: &str = "Py_Main";
const ENTRY_SYMBOL_Z: &[u8] = b"Py_Main\0";

pub const CCACHE_PROGRAM: &str = "ccache.exe";

// Windows API types
type DWORD = u32;
type BOOL = i32;
type HANDLE = *mut core::ffi::c_void;
type HMODULE = *mut core::ffi::c_void;
type FARPROC = *mut core::ffi::c_void;

const STD_INPUT_HANDLE: DWORD = 0xFFFFFFF6u32;
const INVALID_HANDLE_VALUE: HANDLE = -1isize as HANDLE;
const ERROR_SUCCESS: i32 = 0;
const ERROR_ENVVAR_NOT_FOUND: i32 = 203;

extern "system" {
    fn GetModuleFileNameW(hModule: HMODULE, lpFilename: *mut u16, nSize: DWORD) -> DWORD;
    fn GetFullPathNameW(
        lpFileName: *const u16,
        nBufferLength: DWORD,
        lpBuffer: *mut u16,
        lpFilePart: *mut *mut u16,
    ) -> DWORD;
    fn GetEnvironmentVariableW(lpName: *const u16, lpBuffer: *mut u16, nSize: DWORD) -> DWORD;
    fn GetCommandLineW() -> *const u16;
    fn SetLastError(dwErrCode: DWORD);
    fn GetStdHandle(nStdHandle: DWORD) -> HANDLE;
    fn CloseHandle(hObject: HANDLE) -> BOOL;
    fn LoadLibraryW(lpLibFileName: *const u16) -> HMODULE;
    fn GetProcAddress(hModule: HMODULE, lpProcName: *const u8) -> FARPROC;
}

// The C runtime keeps its own copy of the environment, which is what an
// embedded interpreter reads.
extern "C" {
    fn _wputenv_s(varname: *const u16, value_string: *const u16) -> c_int;
}

pub fn units(s: &OsStr) -> Vec<Unit> {
    s.encode_wide().collect()
}

pub fn to_os_string(units: &[Unit]) -> OsString {
    OsString::from_wide(units)
}

fn to_wide_z(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(Some(0)).collect()
}

fn buf_ptr(buf: &mut [u16]) -> *mut u16 {
    if buf.is_empty() {
        ptr::null_mut()
    } else {
        buf.as_mut_ptr()
    }
}

// Length-known calls return the needed size, terminator included, when the
// buffer is short, and the copied length without it on success. Zero is an
// error unless the last error is still clear (a genuinely empty value).
fn length_known(ret: DWORD, capacity: usize) -> Fetch {
    if ret == 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(ERROR_SUCCESS) => Fetch::Filled(0),
            _ => Fetch::Failed(err),
        };
    }
    let ret = ret as usize;
    if ret >= capacity {
        Fetch::TooSmall(Some(ret - 1))
    } else {
        Fetch::Filled(ret)
    }
}

// GetModuleFileNameW truncates silently and returns the buffer size.
pub fn module_path() -> Result<SizedBuffer<Unit>> {
    query(|buf: &mut [u16]| {
        if buf.is_empty() {
            return Fetch::TooSmall(None);
        }
        let n = unsafe { GetModuleFileNameW(ptr::null_mut(), buf.as_mut_ptr(), buf.len() as DWORD) } as usize;
        if n == 0 {
            Fetch::Failed(io::Error::last_os_error())
        } else if n >= buf.len() {
            Fetch::TooSmall(None)
        } else {
            Fetch::Filled(n)
        }
    })
    .map_err(LaunchError::ModulePath)
}

/// Fully qualified form of `path`, with the extended-length prefix when it
/// is too long for the ordinary APIs.
pub fn full_path(path: &[Unit]) -> Result<Vec<Unit>> {
    let path_z: Vec<u16> = path.iter().copied().chain(Some(0)).collect();
    let full = query(|buf: &mut [u16]| unsafe {
        SetLastError(0);
        let ret = GetFullPathNameW(path_z.as_ptr(), buf.len() as DWORD, buf_ptr(buf), ptr::null_mut());
        length_known(ret, buf.len())
    })
    .map_err(|source| LaunchError::FullPath {
        path: to_os_string(path),
        source,
    })?;
    Ok(extended_length(full.into_vec()))
}

pub fn getenv(name: &'static str) -> Result<Option<OsString>> {
    let name_z = to_wide_z(OsStr::new(name));
    let value = query(|buf: &mut [u16]| unsafe {
        SetLastError(0);
        let ret = GetEnvironmentVariableW(name_z.as_ptr(), buf_ptr(buf), buf.len() as DWORD);
        length_known(ret, buf.len())
    });

    match value {
        Ok(value) => Ok(Some(OsString::from_wide(value.as_slice()))),
        Err(QueryError::Os(e)) if e.raw_os_error() == Some(ERROR_ENVVAR_NOT_FOUND) => Ok(None),
        Err(source) => Err(LaunchError::Environment { name, source }),
    }
}

/// Remove `name` from both the OS and the C runtime copy of the environment.
pub fn clear_env(name: &str) {
    std::env::remove_var(name);
    let name_z = to_wide_z(OsStr::new(name));
    let empty = [0u16];
    unsafe {
        _wputenv_s(name_z.as_ptr(), empty.as_ptr());
    }
}

/// Split this process's raw command line.
pub fn original_argv() -> Result<PackedArgv<Unit>> {
    let cmdline = unsafe {
        let p = GetCommandLineW();
        let mut len = 0;
        while *p.add(len) != 0 {
            len += 1;
        }
        std::slice::from_raw_parts(p, len)
    };
    Ok(PackedArgv::from_command_line(cmdline))
}

/// Hand the arguments to the child verbatim, quoted with the C runtime rules.
pub fn set_args(command: &mut Command, args: &[&[Unit]]) {
    if !args.is_empty() {
        command.raw_arg(OsString::from_wide(&render_args(args.iter().copied())));
    }
}

pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

pub fn close_stdin() {
    unsafe {
        let stdin = GetStdHandle(STD_INPUT_HANDLE);
        if !stdin.is_null() && stdin != INVALID_HANDLE_VALUE {
            CloseHandle(stdin);
        }
    }
}

/// A loaded interpreter DLL. Never freed; the entry point runs until the
/// process exits.
pub struct Library {
    handle: HMODULE,
    path: OsString,
}

impl Library {
    pub fn open(path: &OsStr) -> Result<Self> {
        let path_z = to_wide_z(path);
        let handle = unsafe { LoadLibraryW(path_z.as_ptr()) };
        if handle.is_null() {
            return Err(LaunchError::LoadLibrary {
                path: path.to_owned(),
                reason: io::Error::last_os_error().to_string(),
            });
        }
        Ok(Self {
            handle,
            path: path.to_owned(),
        })
    }

    pub fn entry_point(&self) -> Result<EntryPoint> {
        let sym = unsafe { GetProcAddress(self.handle, ENTRY_SYMBOL_Z.as_ptr()) };
        if sym.is_null() {
            return Err(LaunchError::MissingSymbol {
                path: self.path.clone(),
                symbol: ENTRY_SYMBOL,
            });
        }
        // SAFETY: the symbol is the interpreter's documented main entry point
        Ok(unsafe { std::mem::transmute::<FARPROC, EntryPoint>(sym) })
    }
}
