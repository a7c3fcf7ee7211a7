use anyhow::{bail, Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use walkdir::WalkDir;

/// Extension of the scripts a launcher is installed for
const SCRIPT_EXTENSION: &str = "py";

/// Extension the launcher derives the script path from, on every platform
const LAUNCHER_EXTENSION: &str = "exe";

/// Install the script launcher as <name>.exe next to each <name>.py
#[derive(Parser, Debug)]
#[command(name = "install-launcher", version)]
struct Cli {
    /// Built script-launcher binary to copy
    #[arg(long, value_name = "LAUNCHER")]
    template: PathBuf,

    /// Reinstall even when the installed launcher is up to date
    #[arg(long)]
    force: bool,

    /// Report what would be done without writing anything
    #[arg(long)]
    dry_run: bool,

    /// .py scripts, or directories whose .py files get a launcher
    #[arg(required = true, value_name = "SCRIPT_OR_DIR")]
    inputs: Vec<PathBuf>,
}

/// What installing a launcher for one script amounts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Created,
    Replaced,
    UpToDate,
}

impl Action {
    fn describe(self, dry_run: bool) -> &'static str {
        match (self, dry_run) {
            (Action::Created, false) => "installed",
            (Action::Created, true) => "would install",
            (Action::Replaced, false) => "updated",
            (Action::Replaced, true) => "would update",
            (Action::UpToDate, _) => "up to date",
        }
    }
}

/// The per-script line printed to stderr whatever the log filter says
fn summary(target: &Path, action: Action, dry_run: bool) -> String {
    format!("{}: {}", target.display(), action.describe(dry_run))
}

type Digest256 = [u8; 32];

fn file_digest(path: &Path) -> Result<Digest256> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hasher.finalize().into())
}

fn is_script(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION)
        && path.file_stem().is_some_and(|stem| !stem.is_empty())
}

/// Expand the inputs into the scripts to install for. Directories are read
/// one level deep, in file name order.
fn collect_scripts(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();

    for input in inputs {
        let metadata = fs::metadata(input)
            .with_context(|| format!("Failed to stat {}", input.display()))?;

        if !metadata.is_dir() {
            if !is_script(input) {
                bail!("Not a .{} script: {}", SCRIPT_EXTENSION, input.display());
            }
            scripts.push(input.clone());
            continue;
        }

        for entry in WalkDir::new(input)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("Failed to read {}", input.display()))?;
            if entry.file_type().is_file() && is_script(entry.path()) {
                scripts.push(entry.into_path());
            }
        }
    }

    Ok(scripts)
}

/// `dir/name.py` -> `dir/name.exe`
fn launcher_path(script: &Path) -> PathBuf {
    script.with_extension(LAUNCHER_EXTENSION)
}

struct Installer {
    template: PathBuf,
    template_canon: PathBuf,
    template_digest: Digest256,
    force: bool,
    dry_run: bool,
}

impl Installer {
    fn new(template: &Path, force: bool, dry_run: bool) -> Result<Self> {
        let template_canon = fs::canonicalize(template)
            .with_context(|| format!("Failed to resolve template path {}", template.display()))?;
        let template_digest = file_digest(template)?;

        Ok(Self {
            template: template.to_path_buf(),
            template_canon,
            template_digest,
            force,
            dry_run,
        })
    }

    fn plan(&self, target: &Path) -> Result<Action> {
        if !target.exists() {
            return Ok(Action::Created);
        }

        // Prevent overwriting the input file
        let target_canon = fs::canonicalize(target)
            .with_context(|| format!("Failed to resolve {}", target.display()))?;
        if target_canon == self.template_canon {
            bail!(
                "Refusing to overwrite the template itself: {}",
                target.display()
            );
        }

        if !self.force && file_digest(target)? == self.template_digest {
            return Ok(Action::UpToDate);
        }
        Ok(Action::Replaced)
    }

    fn install(&self, script: &Path) -> Result<Action> {
        let target = launcher_path(script);
        let action = self.plan(&target)?;
        log::debug!("{} -> {}: {:?}", script.display(), target.display(), action);

        if action != Action::UpToDate && !self.dry_run {
            fs::copy(&self.template, &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    self.template.display(),
                    target.display()
                )
            })?;

            // Make executable (Unix only)
            #[cfg(unix)]
            fs::set_permissions(&target, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("Failed to set permissions on {}", target.display()))?;
        }

        eprintln!("{}", summary(&target, action, self.dry_run));
        Ok(action)
    }
}

fn run(cli: &Cli) -> Result<Vec<Action>> {
    let installer = Installer::new(&cli.template, cli.force, cli.dry_run)?;
    let scripts = collect_scripts(&cli.inputs)?;
    if scripts.is_empty() {
        log::warn!("No .{} scripts found", SCRIPT_EXTENSION);
    }

    scripts
        .iter()
        .map(|script| installer.install(script))
        .collect()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
