//! Test runner for script-launcher
//!
//! This test runner validates the launcher end to end by:
//! 1. Setting up an SDK directory holding a `.py` script
//! 2. Using the installer to place the launcher next to it as `<name>.exe`
//! 3. Running the launcher with the fake interpreter (executable or library)
//! 4. Checking the argv, environment and exit code the interpreter saw
//!
//! Usage: test-runner --launcher <path> --installer <path> --test-binaries <dir>
//!
//! The fake interpreter prints one JSON line describing what it received;
//! its exit code is read from the first line of the script.

use anyhow::{bail, ensure, Context, Result};
use serde_json::Value;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

/// Executable extension
#[cfg(windows)]
const EXE_EXT: &str = ".exe";
#[cfg(not(windows))]
const EXE_EXT: &str = "";

/// File name of the fake interpreter cdylib
#[cfg(windows)]
const LIBRARY_NAME: &str = "fake_interpreter.dll";
#[cfg(target_os = "macos")]
const LIBRARY_NAME: &str = "libfake_interpreter.dylib";
#[cfg(not(any(windows, target_os = "macos")))]
const LIBRARY_NAME: &str = "libfake_interpreter.so";

/// Variables that change the launcher's behavior; cleared unless a test sets them
const LAUNCHER_VARS: &[&str] = &[
    "EMSDK_PYTHON",
    "EMSDK_PYTHON_LIBRARY",
    "_EMCC_CCACHE",
    "EM_WORKAROUND_PYTHON_BUG_34780",
    "_PYTHON_SYSCONFIGDATA_NAME",
];

/// Test configuration
struct TestConfig {
    /// Path to the built script-launcher binary
    launcher_path: PathBuf,
    /// Path to the install-launcher binary
    installer_path: PathBuf,
    /// Directory containing test binaries (fake-python, fake-ccache, the library)
    test_binaries_dir: PathBuf,
    /// Working directory for test artifacts
    work_dir: PathBuf,
}

/// The value following the flag at `args[*i]`
fn next_value(args: &[String], i: &mut usize) -> Result<PathBuf> {
    *i += 1;
    args.get(*i)
        .map(PathBuf::from)
        .with_context(|| format!("{} requires a value", args[*i - 1]))
}

impl TestConfig {
    fn from_args() -> Result<Self> {
        let args: Vec<String> = env::args().collect();

        let mut launcher_path = None;
        let mut installer_path = None;
        let mut test_binaries_dir = None;
        let mut work_dir = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--launcher" => launcher_path = Some(next_value(&args, &mut i)?),
                "--installer" => installer_path = Some(next_value(&args, &mut i)?),
                "--test-binaries" => test_binaries_dir = Some(next_value(&args, &mut i)?),
                "--work-dir" => work_dir = Some(next_value(&args, &mut i)?),
                "--help" | "-h" => {
                    println!("Usage: test-runner --launcher <path> --installer <path> --test-binaries <dir> [--work-dir <dir>]");
                    println!();
                    println!("Options:");
                    println!("  --launcher       Path to the script-launcher binary");
                    println!("  --installer      Path to the install-launcher binary");
                    println!("  --test-binaries  Directory containing fake-python, fake-ccache and {}", LIBRARY_NAME);
                    println!("  --work-dir       Working directory for test artifacts (default: temp dir)");
                    std::process::exit(0);
                }
                other => bail!("Unknown argument: {}", other),
            }
            i += 1;
        }

        let launcher_path = launcher_path.context("--launcher is required")?;
        let installer_path = installer_path.context("--installer is required")?;
        let test_binaries_dir = test_binaries_dir.context("--test-binaries is required")?;
        let work_dir = work_dir.unwrap_or_else(|| env::temp_dir().join("script-launcher-tests"));

        // Validate paths exist
        ensure!(launcher_path.exists(), "Launcher not found: {}", launcher_path.display());
        ensure!(installer_path.exists(), "Installer not found: {}", installer_path.display());
        ensure!(
            test_binaries_dir.exists(),
            "Test binaries dir not found: {}",
            test_binaries_dir.display()
        );

        Ok(Self {
            launcher_path,
            installer_path,
            test_binaries_dir,
            work_dir,
        })
    }

    fn test_binary(&self, name: &str) -> PathBuf {
        self.test_binaries_dir.join(format!("{}{}", name, EXE_EXT))
    }

    fn fake_python(&self) -> PathBuf {
        self.test_binary("fake-python")
    }
}

/// An SDK directory with one script and its installed launcher
struct Sdk {
    dir: PathBuf,
    script: PathBuf,
    launcher: PathBuf,
}

impl Sdk {
    /// Create `<work>/<test>/emcc.py` requesting `exit_code` and install the
    /// launcher for it.
    fn new(config: &TestConfig, test_name: &str, exit_code: i32) -> Result<Self> {
        let dir = config.work_dir.join(test_name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create test dir {}", dir.display()))?;

        let script = dir.join("emcc.py");
        fs::write(&script, format!("{}\nimport sys\n", exit_code))
            .context("Failed to write emcc.py")?;

        run_installer(config, &dir, None)?;

        Ok(Self {
            launcher: dir.join("emcc.exe"),
            script: absolute(&script)?,
            dir,
        })
    }

    fn command(&self, config: &TestConfig, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.launcher);
        for var in LAUNCHER_VARS {
            cmd.env_remove(var);
        }
        cmd.env("EMSDK_PYTHON", config.fake_python());
        cmd.args(args);
        cmd
    }
}

/// The script path as the launcher reports it: fully qualified, with
/// symlinks resolved on Unix where the launcher's own path comes resolved.
fn absolute(path: &Path) -> Result<PathBuf> {
    #[cfg(windows)]
    let resolved = std::path::absolute(path);
    #[cfg(not(windows))]
    let resolved = fs::canonicalize(path);
    resolved.with_context(|| format!("Failed to resolve {}", path.display()))
}

/// Install the launcher for every script in `dir`; returns the installer's stderr.
/// `rust_log` sets the installer's log filter, which starts out cleared.
fn run_installer(config: &TestConfig, dir: &Path, rust_log: Option<&str>) -> Result<String> {
    let mut cmd = Command::new(&config.installer_path);
    cmd.env_remove("RUST_LOG");
    if let Some(filter) = rust_log {
        cmd.env("RUST_LOG", filter);
    }
    let output = cmd
        .arg("--template")
        .arg(&config.launcher_path)
        .arg(dir)
        .output()
        .context("Failed to run installer")?;

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    ensure!(output.status.success(), "Installer failed: {}", stderr);
    Ok(stderr)
}

/// What the fake interpreter reported, plus the launcher's own exit code
struct Report {
    json: Value,
    stderr: String,
    exit_code: i32,
}

impl Report {
    fn argv(&self) -> Vec<&str> {
        self.json["argv"]
            .as_array()
            .map(|args| args.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn env(&self, name: &str) -> Option<&str> {
        self.json["env"][name].as_str()
    }

    fn mode(&self) -> &str {
        self.json["mode"].as_str().unwrap_or("")
    }

    /// Check argv[1..] is `-E <script> <args...>`.
    fn expect_args(&self, sdk: &Sdk, args: &[&str]) -> Result<()> {
        let script = sdk.script.to_string_lossy();
        let mut expected = vec!["-E", script.as_ref()];
        expected.extend_from_slice(args);

        let argv = self.argv();
        ensure!(
            argv.get(1..) == Some(&expected[..]),
            "Unexpected argv: {:?}. Expected [<interpreter>] + {:?}",
            argv,
            expected
        );
        Ok(())
    }
}

/// Run the launcher and parse the interpreter's report
fn run_launcher(cmd: &mut Command) -> Result<Report> {
    let output = cmd.output().context("Failed to run launcher")?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    let line = stdout
        .lines()
        .find(|line| line.starts_with('{'))
        .with_context(|| format!("No report from interpreter (exit {}): {}", exit_code, stderr))?;
    let json = serde_json::from_str(line)
        .with_context(|| format!("Invalid report: {}", line))?;

    Ok(Report {
        json,
        stderr,
        exit_code,
    })
}

/// Test: emcc --version reaches the interpreter after -E and the script
fn test_version_passthrough(config: &TestConfig) -> Result<()> {
    println!("  Running test: version_passthrough");

    let sdk = Sdk::new(config, "test_version_passthrough", 0)?;
    let report = run_launcher(&mut sdk.command(config, &["--version"]))?;

    ensure!(
        report.exit_code == 0,
        "Launcher failed with exit code {}: {}",
        report.exit_code,
        report.stderr
    );
    ensure!(report.mode() == "child", "Expected a child process, got {}", report.mode());
    report.expect_args(&sdk, &["--version"])?;

    println!("    PASS");
    Ok(())
}

/// Test: spaces, quotes and backslashes survive re-quoting
fn test_quoted_arguments(config: &TestConfig) -> Result<()> {
    println!("  Running test: quoted_arguments");

    let sdk = Sdk::new(config, "test_quoted_arguments", 0)?;
    let args = [
        "hello world",
        "say \"hi\"",
        r"C:\dir with space\",
        r"a\\b",
        r#"\"quoted\""#,
        "",
        "-DNAME=\"x y\"",
    ];
    let report = run_launcher(&mut sdk.command(config, &args))?;

    ensure!(report.exit_code == 0, "Launcher failed: {}", report.stderr);
    report.expect_args(&sdk, &args)?;

    println!("    PASS");
    Ok(())
}

/// Test: the interpreter's exit code becomes the launcher's
fn test_exit_code_propagation(config: &TestConfig) -> Result<()> {
    println!("  Running test: exit_code_propagation");

    let sdk = Sdk::new(config, "test_exit_code_propagation", 42)?;
    let report = run_launcher(&mut sdk.command(config, &[]))?;

    ensure!(
        report.exit_code == 42,
        "Expected exit code 42, got {}: {}",
        report.exit_code,
        report.stderr
    );

    println!("    PASS");
    Ok(())
}

/// Test: _PYTHON_SYSCONFIGDATA_NAME never reaches the interpreter
fn test_sysconfig_cleared(config: &TestConfig) -> Result<()> {
    println!("  Running test: sysconfig_cleared");

    let sdk = Sdk::new(config, "test_sysconfig_cleared", 0)?;
    let mut cmd = sdk.command(config, &[]);
    cmd.env("_PYTHON_SYSCONFIGDATA_NAME", "_sysconfigdata_x86_64_linux");
    let report = run_launcher(&mut cmd)?;

    ensure!(
        report.env("_PYTHON_SYSCONFIGDATA_NAME").is_none(),
        "_PYTHON_SYSCONFIGDATA_NAME leaked: {:?}",
        report.env("_PYTHON_SYSCONFIGDATA_NAME")
    );
    // Unrelated configuration is inherited
    let python = config.fake_python();
    ensure!(
        report.env("EMSDK_PYTHON") == python.to_str(),
        "EMSDK_PYTHON not inherited: {:?}",
        report.env("EMSDK_PYTHON")
    );

    println!("    PASS");
    Ok(())
}

/// Test: _EMCC_CCACHE runs the interpreter through ccache from PATH
fn test_ccache_prefix(config: &TestConfig) -> Result<()> {
    println!("  Running test: ccache_prefix");

    let sdk = Sdk::new(config, "test_ccache_prefix", 42)?;

    // Put the fake wrapper first on PATH under the name the launcher runs
    let bin_dir = sdk.dir.join("bin");
    fs::create_dir_all(&bin_dir).context("Failed to create bin dir")?;
    let ccache = bin_dir.join(format!("ccache{}", EXE_EXT));
    fs::copy(config.test_binary("fake-ccache"), &ccache).context("Failed to copy fake-ccache")?;

    let mut paths = vec![bin_dir];
    paths.extend(env::split_paths(&env::var_os("PATH").unwrap_or_default()));
    let path: OsString = env::join_paths(paths).context("Failed to build PATH")?;

    let mut cmd = sdk.command(config, &["-c", "hello.c"]);
    cmd.env("_EMCC_CCACHE", "1").env("PATH", path);
    let report = run_launcher(&mut cmd)?;

    ensure!(
        report.exit_code == 42,
        "Exit code lost through the wrapper: {}: {}",
        report.exit_code,
        report.stderr
    );
    let python = config.fake_python();
    let wrapped = format!("WRAPPED:{}", python.display());
    ensure!(
        report.stderr.lines().any(|line| line == wrapped),
        "Wrapper did not receive the interpreter first: {}",
        report.stderr
    );
    ensure!(
        report.stderr.contains("CCACHE_ENV:<unset>"),
        "_EMCC_CCACHE leaked to the wrapper: {}",
        report.stderr
    );
    ensure!(report.env("_EMCC_CCACHE").is_none(), "_EMCC_CCACHE leaked to the interpreter");
    report.expect_args(&sdk, &["-c", "hello.c"])?;

    println!("    PASS");
    Ok(())
}

/// Test: EMSDK_PYTHON_LIBRARY calls the entry point in-process
fn test_in_process_library(config: &TestConfig) -> Result<()> {
    println!("  Running test: in_process_library");

    let library = config.test_binaries_dir.join(LIBRARY_NAME);
    ensure!(library.exists(), "Interpreter library not found: {}", library.display());

    let sdk = Sdk::new(config, "test_in_process_library", 3)?;
    let mut cmd = sdk.command(config, &["--version", "a b"]);
    cmd.env("EMSDK_PYTHON_LIBRARY", &library)
        .env("_PYTHON_SYSCONFIGDATA_NAME", "_sysconfigdata_host");
    let report = run_launcher(&mut cmd)?;

    ensure!(report.mode() == "in-process", "Expected in-process, got {}", report.mode());
    ensure!(
        report.exit_code == 3,
        "Expected the entry point's return value 3, got {}: {}",
        report.exit_code,
        report.stderr
    );
    ensure!(
        report.json["null_terminated"] == Value::Bool(true),
        "argv is not null-terminated"
    );
    // In-process the launcher keeps its own program name
    let argv = report.argv();
    ensure!(
        argv.first().is_some_and(|arg0| arg0.ends_with("emcc.exe")),
        "Unexpected argv[0]: {:?}",
        argv.first()
    );
    report.expect_args(&sdk, &["--version", "a b"])?;
    ensure!(
        report.env("_PYTHON_SYSCONFIGDATA_NAME").is_none(),
        "_PYTHON_SYSCONFIGDATA_NAME visible to the embedded interpreter"
    );

    println!("    PASS");
    Ok(())
}

/// Test: a second install finds the launcher up to date
fn test_installer_idempotent(config: &TestConfig) -> Result<()> {
    println!("  Running test: installer_idempotent");

    // Sdk::new runs the first install
    let sdk = Sdk::new(config, "test_installer_idempotent", 0)?;
    ensure!(sdk.launcher.exists(), "Launcher not installed: {}", sdk.launcher.display());

    // The summary is not a log record; a strict filter must not hide it
    let stderr = run_installer(config, &sdk.dir, Some("error"))?;
    if !stderr.contains("emcc.exe: up to date") {
        bail!("Second install was not up to date: {}", stderr);
    }

    println!("    PASS");
    Ok(())
}

fn main() -> ExitCode {
    println!("=== Script Launcher Test Suite ===");
    println!();

    let config = match TestConfig::from_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!("Use --help for usage information");
            return ExitCode::from(1);
        }
    };

    // Clean and recreate work directory
    if config.work_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&config.work_dir) {
            eprintln!("Warning: Failed to clean work dir: {}", e);
        }
    }
    if let Err(e) = fs::create_dir_all(&config.work_dir) {
        eprintln!("Error: Failed to create work dir: {}", e);
        return ExitCode::from(1);
    }

    println!("Configuration:");
    println!("  Launcher:      {}", config.launcher_path.display());
    println!("  Installer:     {}", config.installer_path.display());
    println!("  Test binaries: {}", config.test_binaries_dir.display());
    println!("  Work dir:      {}", config.work_dir.display());
    println!();

    let tests: Vec<(&str, fn(&TestConfig) -> Result<()>)> = vec![
        ("version_passthrough", test_version_passthrough),
        ("quoted_arguments", test_quoted_arguments),
        ("exit_code_propagation", test_exit_code_propagation),
        ("sysconfig_cleared", test_sysconfig_cleared),
        ("ccache_prefix", test_ccache_prefix),
        ("in_process_library", test_in_process_library),
        ("installer_idempotent", test_installer_idempotent),
    ];

    let mut passed = 0;
    let mut failed = 0;

    println!("Running {} tests...", tests.len());
    println!();

    for (_name, test_fn) in &tests {
        match test_fn(&config) {
            Ok(()) => {
                passed += 1;
            }
            Err(e) => {
                println!("  FAILED: {:#}", e);
                failed += 1;
            }
        }
    }

    println!();
    println!("=== Results ===");
    println!("Passed: {}", passed);
    println!("Failed: {}", failed);
    println!();

    if failed > 0 {
        ExitCode::from(1)
    } else {
        println!("All tests passed!");
        ExitCode::SUCCESS
    }
}
