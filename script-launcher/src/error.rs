// Error types for the launcher
// Every failure here is terminal for the run; main() reports and aborts.

use std::ffi::OsString;
use std::io;

use thiserror::Error;

/// Failure of a variable-length OS string query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("OS query failed: {0}")]
    Os(#[source] io::Error),

    /// The value changed between the sizing probe and the fetch.
    #[error("OS query reported {expected} units but returned {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("OS query needs more than {0} units")]
    CapacityOverflow(usize),

    #[error("cannot allocate a buffer of {0} units")]
    OutOfMemory(usize),
}

#[derive(Debug, Error)]
pub enum PathError {
    /// The launcher must be named `<tool>.<ext>` with a 3-character extension.
    #[error("launcher path {0:?} does not end in a 3-character extension")]
    Extension(OsString),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("cannot determine launcher path: {0}")]
    ModulePath(#[source] QueryError),

    #[error("cannot resolve full path of {path:?}: {source}")]
    FullPath {
        path: OsString,
        #[source]
        source: QueryError,
    },

    // Unix lookups cannot fail
    #[cfg_attr(not(windows), allow(dead_code))]
    #[error("cannot read environment variable {name}: {source}")]
    Environment {
        name: &'static str,
        #[source]
        source: QueryError,
    },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("failed to start {program:?}: {source}")]
    Spawn {
        program: OsString,
        #[source]
        source: io::Error,
    },

    #[error("failed to load interpreter library {path:?}: {reason}")]
    LoadLibrary { path: OsString, reason: String },

    #[error("interpreter library {path:?} has no entry point {symbol}")]
    MissingSymbol { path: OsString, symbol: &'static str },

    #[error("too many arguments for the interpreter entry point ({0})")]
    TooManyArguments(usize),
}

pub type Result<T, E = LaunchError> = std::result::Result<T, E>;
