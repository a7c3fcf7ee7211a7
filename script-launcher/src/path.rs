// Script path derivation
// <dir>\<tool>.exe runs <dir>\<tool>.py; no other location is searched.

use crate::cmdline::CodeUnit;
use crate::error::{PathError, Result};
use crate::sys::{self, Unit};

/// Extension of the script run by the launcher.
pub const SCRIPT_EXTENSION: &[u8] = b"py";

/// Length of the launcher's own extension ("exe").
pub const LAUNCHER_EXTENSION_LEN: usize = 3;

/// Paths this long need the extended-length prefix on Windows (MAX_PATH).
pub const MAX_PATH: usize = 260;

/// Replace the 3-character extension of `module_path` with `py`.
///
/// Returns `None` unless the path ends in `.` plus three characters.
pub fn derive_script_path<T: CodeUnit>(module_path: &[T]) -> Option<Vec<T>> {
    let stem_len = module_path.len().checked_sub(LAUNCHER_EXTENSION_LEN)?;
    if stem_len < 2 || module_path[stem_len - 1] != T::from(b'.') {
        return None;
    }
    let separators = [T::from(b'/'), T::from(b'\\'), T::from(b'.')];
    if module_path[stem_len..].iter().any(|c| separators.contains(c)) {
        return None;
    }

    let mut script = Vec::with_capacity(stem_len + SCRIPT_EXTENSION.len());
    script.extend_from_slice(&module_path[..stem_len]);
    script.extend(SCRIPT_EXTENSION.iter().map(|&b| T::from(b)));
    Some(script)
}

/// Derive the sibling script of the running launcher and make it a full path.
pub fn script_path(module_path: &[Unit]) -> Result<Vec<Unit>> {
    let derived = derive_script_path(module_path)
        .ok_or_else(|| PathError::Extension(sys::to_os_string(module_path)))?;
    let full = sys::full_path(&derived)?;
    log::debug!("script path: {}", sys::to_os_string(&full).to_string_lossy());
    Ok(full)
}

/// Add the `\\?\` prefix to a full Windows path that is too long for the
/// ordinary APIs. UNC paths become `\\?\UNC\server\share\...`; paths that
/// already use a device prefix are left alone.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn extended_length<T: CodeUnit>(full: Vec<T>) -> Vec<T> {
    let bs = T::from(b'\\');
    let starts_with = |prefix: &[u8]| {
        full.len() >= prefix.len() && full.iter().zip(prefix).all(|(&c, &p)| c == T::from(p))
    };

    if full.len() < MAX_PATH || starts_with(br"\\?\") || starts_with(br"\\.\") {
        return full;
    }

    let (prefix, rest): (&[u8], &[T]) = if full.len() > 2 && full[0] == bs && full[1] == bs {
        (br"\\?\UNC\", &full[2..])
    } else {
        (br"\\?\", &full[..])
    };
    let mut out = Vec::with_capacity(prefix.len() + rest.len());
    out.extend(prefix.iter().map(|&b| T::from(b)));
    out.extend_from_slice(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn exe_becomes_py() {
        let derived = derive_script_path(&wide(r"C:\sdk\foo.exe")).unwrap();
        assert_eq!(String::from_utf16_lossy(&derived), r"C:\sdk\foo.py");
    }

    #[test]
    fn everything_but_extension_is_preserved() {
        let module = b"/opt/emsdk/upstream/emscripten/em++.exe".to_vec();
        let script = derive_script_path(&module).unwrap();
        let stem = module.len() - LAUNCHER_EXTENSION_LEN;
        assert_eq!(&script[..stem], &module[..stem]);
        assert_eq!(&script[stem..], b"py");
    }

    #[test]
    fn other_three_letter_extensions() {
        assert_eq!(derive_script_path(b"tool.bin").unwrap(), b"tool.py".to_vec());
    }

    #[test]
    fn rejects_paths_without_three_letter_extension() {
        assert_eq!(derive_script_path(b"emcc"), None);
        assert_eq!(derive_script_path(b"emcc.py"), None);
        assert_eq!(derive_script_path(b".exe"), None);
        assert_eq!(derive_script_path(b"dir.d/exe"), None);
        assert_eq!(derive_script_path(b"a.b.exe").unwrap(), b"a.b.py".to_vec());
    }

    #[test]
    fn short_paths_keep_their_form() {
        let path = wide(r"C:\sdk\emcc.py");
        assert_eq!(extended_length(path.clone()), path);
    }

    #[test]
    fn long_paths_get_prefix() {
        let long = format!(r"C:\{}\emcc.py", "d".repeat(300));
        let out = String::from_utf16_lossy(&extended_length(wide(&long)));
        assert_eq!(out, format!(r"\\?\{}", long));
    }

    #[test]
    fn long_unc_paths_get_unc_prefix() {
        let long = format!(r"\\server\share\{}\emcc.py", "d".repeat(300));
        let out = String::from_utf16_lossy(&extended_length(wide(&long)));
        assert_eq!(out, format!(r"\\?\UNC\server\share\{}\emcc.py", "d".repeat(300)));
    }

    #[test]
    fn prefixed_paths_are_untouched() {
        let long = format!(r"\\?\C:\{}\emcc.py", "d".repeat(300));
        assert_eq!(extended_length(wide(&long)), wide(&long));
    }

    #[cfg(unix)]
    #[test]
    fn script_path_is_absolute_and_normalized() {
        let script = script_path(b"/opt/sdk/bin/../emcc.exe").unwrap();
        assert_eq!(script, b"/opt/sdk/emcc.py".to_vec());
    }
}
