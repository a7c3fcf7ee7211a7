// Launcher configuration, read once from the environment at startup

use std::ffi::OsString;

use crate::error::Result;
use crate::sys;

/// Interpreter executable to run instead of `python`.
pub const PYTHON_VAR: &str = "EMSDK_PYTHON";
/// Interpreter library to load and call in-process instead of spawning.
pub const PYTHON_LIBRARY_VAR: &str = "EMSDK_PYTHON_LIBRARY";
/// Non-empty: run the interpreter through ccache.
pub const CCACHE_VAR: &str = "_EMCC_CCACHE";
/// Present: don't let the interpreter inherit stdin (python bug 34780).
pub const STDIN_WORKAROUND_VAR: &str = "EM_WORKAROUND_PYTHON_BUG_34780";
/// CPython honours this even under -E; it is always cleared before launch.
pub const SYSCONFIGDATA_VAR: &str = "_PYTHON_SYSCONFIGDATA_NAME";
/// env_logger filter for the launcher's own diagnostics.
pub const LOG_VAR: &str = "SCRIPT_LAUNCHER_LOG";

/// Snapshot of every environment input the launcher acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchEnv {
    pub python: Option<OsString>,
    pub python_library: Option<OsString>,
    pub ccache: bool,
    pub close_stdin: bool,
}

impl LaunchEnv {
    pub fn capture() -> Result<Self> {
        Self::from_lookup(sys::getenv)
    }

    /// Build the snapshot from any lookup. Empty values count as unset,
    /// except for the stdin workaround where presence alone matters.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self>
    where
        F: FnMut(&'static str) -> Result<Option<OsString>>,
    {
        let non_empty = |value: Option<OsString>| value.filter(|v| !v.is_empty());

        let env = Self {
            python: non_empty(lookup(PYTHON_VAR)?),
            python_library: non_empty(lookup(PYTHON_LIBRARY_VAR)?),
            ccache: non_empty(lookup(CCACHE_VAR)?).is_some(),
            close_stdin: lookup(STDIN_WORKAROUND_VAR)?.is_some(),
        };
        log::debug!("{:?}", env);
        Ok(env)
    }
}
