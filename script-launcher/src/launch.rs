// Launch planning and the two interpreter strategies
//
// A plan is built once from the configuration snapshot and consumed by
// exactly one Interpreter: a child process we wait for, or a library whose
// entry point we call on this thread.

use std::ffi::OsString;
use std::os::raw::c_int;
use std::process::{Command, Stdio};

use crate::argv::PackedArgv;
use crate::cmdline::render_command_line;
use crate::config::{LaunchEnv, CCACHE_VAR, SYSCONFIGDATA_VAR};
use crate::error::{LaunchError, Result};
use crate::sys::{self, Library, Unit};

/// Tells the interpreter to ignore PYTHON* environment variables.
pub const ISOLATION_FLAG: &str = "-E";

/// Interpreter executable when no override is configured.
pub const DEFAULT_PYTHON: &str = "python";

/// What runs the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An interpreter executable, optionally started through a build-cache
    /// wrapper that receives the interpreter as its first argument.
    Executable {
        program: OsString,
        wrapper: Option<OsString>,
    },
    /// An interpreter library whose entry point is called in-process.
    Library { path: OsString },
}

/// Everything needed for the single launch of this run.
#[derive(Debug)]
pub struct LaunchPlan {
    pub target: Target,
    pub argv: PackedArgv<Unit>,
    /// Variables removed from the interpreter's environment.
    pub env_remove: Vec<&'static str>,
    pub close_stdin: bool,
}

impl LaunchPlan {
    pub fn new(env: &LaunchEnv, argv: PackedArgv<Unit>) -> Self {
        let mut env_remove = vec![SYSCONFIGDATA_VAR];

        let target = match &env.python_library {
            Some(path) => Target::Library { path: path.clone() },
            None => {
                let wrapper = env.ccache.then(|| OsString::from(sys::CCACHE_PROGRAM));
                if wrapper.is_some() {
                    // the wrapper runs the launcher again; don't recurse
                    env_remove.push(CCACHE_VAR);
                }
                Target::Executable {
                    program: env
                        .python
                        .clone()
                        .unwrap_or_else(|| OsString::from(DEFAULT_PYTHON)),
                    wrapper,
                }
            }
        };

        Self {
            target,
            argv,
            env_remove,
            close_stdin: env.close_stdin,
        }
    }

    /// The interpreter this plan selects, plus the argv to hand it.
    pub fn into_interpreter(self) -> (Box<dyn Interpreter>, PackedArgv<Unit>) {
        let interpreter: Box<dyn Interpreter> = match self.target {
            Target::Executable { program, wrapper } => Box::new(ChildProcess {
                program,
                wrapper,
                env_remove: self.env_remove,
                close_stdin: self.close_stdin,
            }),
            Target::Library { path } => Box::new(InProcess {
                path,
                env_remove: self.env_remove,
                close_stdin: self.close_stdin,
            }),
        };
        (interpreter, self.argv)
    }

    /// Run the interpreter and return its exit code.
    pub fn launch(self) -> Result<i32> {
        let (mut interpreter, argv) = self.into_interpreter();
        interpreter.run(argv)
    }
}

pub trait Interpreter {
    /// Run to completion. Blocks without a timeout.
    fn run(&mut self, argv: PackedArgv<Unit>) -> Result<i32>;
}

/// Spawns the interpreter and waits for it.
#[derive(Debug)]
pub struct ChildProcess {
    pub program: OsString,
    pub wrapper: Option<OsString>,
    pub env_remove: Vec<&'static str>,
    pub close_stdin: bool,
}

impl ChildProcess {
    /// Program to start and its arguments. The interpreter takes the place
    /// of argv[0]; a wrapper goes in front of it.
    fn command_parts(&self, argv: &PackedArgv<Unit>) -> (OsString, Vec<Vec<Unit>>) {
        let mut args: Vec<Vec<Unit>> = Vec::with_capacity(argv.len() + 1);
        let program = match &self.wrapper {
            Some(wrapper) => {
                args.push(sys::units(&self.program));
                wrapper.clone()
            }
            None => self.program.clone(),
        };
        args.extend(argv.iter().skip(1).map(<[Unit]>::to_vec));
        (program, args)
    }
}

impl Interpreter for ChildProcess {
    fn run(&mut self, argv: PackedArgv<Unit>) -> Result<i32> {
        let (program, args) = self.command_parts(&argv);
        let args: Vec<&[Unit]> = args.iter().map(Vec::as_slice).collect();

        if log::log_enabled!(log::Level::Debug) {
            let cmdline = render_command_line(&sys::units(&program), args.iter().copied());
            log::debug!("running: {}", sys::to_os_string(&cmdline).to_string_lossy());
        }

        let mut command = Command::new(&program);
        sys::set_args(&mut command, &args);
        for name in &self.env_remove {
            command.env_remove(name);
        }
        if self.close_stdin {
            command.stdin(Stdio::null());
        }

        let status = command
            .status()
            .map_err(|source| LaunchError::Spawn { program, source })?;
        log::debug!("interpreter exited with {}", status);
        Ok(sys::exit_code(status))
    }
}

/// Loads the interpreter library and calls its entry point on this thread.
#[derive(Debug)]
pub struct InProcess {
    pub path: OsString,
    pub env_remove: Vec<&'static str>,
    pub close_stdin: bool,
}

impl Interpreter for InProcess {
    fn run(&mut self, mut argv: PackedArgv<Unit>) -> Result<i32> {
        // The embedded interpreter reads our own environment.
        for name in &self.env_remove {
            sys::clear_env(name);
        }
        if self.close_stdin {
            sys::close_stdin();
        }

        let library = Library::open(&self.path)?;
        let entry = library.entry_point()?;
        let argc = c_int::try_from(argv.len()).map_err(|_| LaunchError::TooManyArguments(argv.len()))?;
        let mut c_argv = argv.c_argv();

        log::debug!("calling {} in {:?} with {} arguments", sys::ENTRY_SYMBOL, self.path, argc);
        // SAFETY: c_argv holds argc NUL-terminated strings and a null slot,
        // all borrowed from argv, which outlives the call.
        let code = unsafe { entry(argc, c_argv.as_mut_ptr()) };
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn argv(args: &[&str]) -> PackedArgv<Unit> {
        let units: Vec<Vec<Unit>> = args.iter().map(|a| sys::units(OsStr::new(a))).collect();
        PackedArgv::from_args(units)
    }

    fn strings(args: &[Vec<Unit>]) -> Vec<String> {
        args.iter()
            .map(|a| sys::to_os_string(a).to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn default_plan_runs_python_and_clears_sysconfig() {
        let plan = LaunchPlan::new(&LaunchEnv::default(), argv(&["emcc.exe", "-E", "emcc.py"]));
        assert_eq!(
            plan.target,
            Target::Executable {
                program: OsString::from("python"),
                wrapper: None,
            }
        );
        assert_eq!(plan.env_remove, vec![SYSCONFIGDATA_VAR]);
        assert!(!plan.close_stdin);
    }

    #[test]
    fn python_override_and_stdin_workaround() {
        let env = LaunchEnv {
            python: Some(OsString::from("/usr/bin/python3")),
            close_stdin: true,
            ..LaunchEnv::default()
        };
        let plan = LaunchPlan::new(&env, argv(&["emcc.exe"]));
        assert_eq!(
            plan.target,
            Target::Executable {
                program: OsString::from("/usr/bin/python3"),
                wrapper: None,
            }
        );
        assert!(plan.close_stdin);
    }

    #[test]
    fn ccache_wraps_interpreter_and_is_cleared() {
        let env = LaunchEnv {
            ccache: true,
            ..LaunchEnv::default()
        };
        let plan = LaunchPlan::new(&env, argv(&["emcc.exe"]));
        assert_eq!(
            plan.target,
            Target::Executable {
                program: OsString::from("python"),
                wrapper: Some(OsString::from(sys::CCACHE_PROGRAM)),
            }
        );
        assert!(plan.env_remove.contains(&CCACHE_VAR));
        assert!(plan.env_remove.contains(&SYSCONFIGDATA_VAR));
    }

    #[test]
    fn library_override_selects_in_process() {
        let env = LaunchEnv {
            python_library: Some(OsString::from("python3.dll")),
            ccache: true,
            ..LaunchEnv::default()
        };
        let plan = LaunchPlan::new(&env, argv(&["emcc.exe"]));
        assert_eq!(
            plan.target,
            Target::Library {
                path: OsString::from("python3.dll")
            }
        );
        assert_eq!(plan.env_remove, vec![SYSCONFIGDATA_VAR]);
    }

    #[test]
    fn child_replaces_program_name_with_interpreter() {
        let child = ChildProcess {
            program: OsString::from("python"),
            wrapper: None,
            env_remove: vec![],
            close_stdin: false,
        };
        let (program, args) = child.command_parts(&argv(&[r"C:\sdk\emcc.exe", "-E", r"C:\sdk\emcc.py", "--version"]));
        assert_eq!(program, OsString::from("python"));
        assert_eq!(strings(&args), vec!["-E", r"C:\sdk\emcc.py", "--version"]);
    }

    #[test]
    fn wrapper_receives_interpreter_first() {
        let child = ChildProcess {
            program: OsString::from("python"),
            wrapper: Some(OsString::from("ccache")),
            env_remove: vec![],
            close_stdin: false,
        };
        let (program, args) = child.command_parts(&argv(&["emcc.exe", "-E", "emcc.py", "x"]));
        assert_eq!(program, OsString::from("ccache"));
        assert_eq!(strings(&args), vec!["python", "-E", "emcc.py", "x"]);
    }

    #[test]
    fn missing_library_is_an_error() {
        let mut interpreter = InProcess {
            path: OsString::from("/nonexistent/libpython-missing.so"),
            env_remove: vec![],
            close_stdin: false,
        };
        let err = interpreter.run(argv(&["emcc.exe"])).unwrap_err();
        assert!(matches!(err, LaunchError::LoadLibrary { .. }));
    }

    #[cfg(unix)]
    mod child {
        use super::*;

        fn sh(script: &str) -> Result<i32> {
            let plan = LaunchPlan::new(
                &LaunchEnv {
                    python: Some(OsString::from("/bin/sh")),
                    ..LaunchEnv::default()
                },
                argv(&["launcher.exe", "-c", script]),
            );
            plan.launch()
        }

        #[test]
        fn exit_code_is_propagated() {
            assert_eq!(sh("exit 0").unwrap(), 0);
            assert_eq!(sh("exit 7").unwrap(), 7);
        }

        #[test]
        fn signal_maps_to_128_plus_signal() {
            assert_eq!(sh("kill -9 $$").unwrap(), 128 + 9);
        }

        #[test]
        fn spawn_failure_is_an_error() {
            let plan = LaunchPlan::new(
                &LaunchEnv {
                    python: Some(OsString::from("/nonexistent/python")),
                    ..LaunchEnv::default()
                },
                argv(&["launcher.exe"]),
            );
            assert!(matches!(plan.launch(), Err(LaunchError::Spawn { .. })));
        }
    }
}
