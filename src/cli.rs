use crate::{
    bundle::{ArchiveKind, ResourceBundle, DEFAULT_NAME},
    config::AppConfig,
    error::PatchError,
    fetch::{self, FetchSettings},
    game::{self, GameTarget},
    install::{InstallOptions, InstallOutcome, InstallReport, InstallState, InstallationManager},
    progress::{OperationStatus, Phase},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

/// The font the patch already ships; choosing it means "keep the bundled one".
const BUNDLED_FONT_NAME: &str = "SourceHanSansCN-Normal.otf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalOptions {
    pub format: OutputFormat,
    pub game: Option<PathBuf>,
    pub verbosity: Verbosity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Target(Option<PathBuf>),
    Install(InstallArgs),
    Update,
    Uninstall,
    Status,
    Font(FontChange),
    Mirror(MirrorChange),
    Proxy(ProxyChange),
    Paths,
    Help,
    Version,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallArgs {
    bundle: Option<PathBuf>,
    version: Option<String>,
    language: Option<String>,
    force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontChange {
    Show,
    Set(PathBuf),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorChange {
    Show,
    Enabled(bool),
    Url(String),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyChange {
    Show,
    Set(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub global: GlobalOptions,
    pub command: CliCommand,
}

pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let (global, tokens) = parse_global_options(args)?;
    let command = if tokens.iter().any(|arg| arg == "--help" || arg == "-h") {
        CliCommand::Help
    } else if matches!(tokens.first().map(String::as_str), Some("--version" | "-V")) {
        CliCommand::Version
    } else {
        parse_command(&tokens)?
    };
    Ok(Invocation { global, command })
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut game = None;
    let mut verbosity = Verbosity::Normal;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = parse_format(value)?;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--game=") {
            game = Some(PathBuf::from(value));
            continue;
        }
        match arg.as_str() {
            "--format" => {
                let value = iter.next().context("--format requires text or json")?;
                format = parse_format(value)?;
            }
            "--game" => {
                let value = iter.next().context("--game requires a path")?;
                game = Some(PathBuf::from(value));
            }
            "-v" | "--verbose" => verbosity = Verbosity::Verbose,
            "-q" | "--quiet" => verbosity = Verbosity::Quiet,
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((
        GlobalOptions {
            format,
            game,
            verbosity,
        },
        tokens,
    ))
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).with_context(|| format!("Unknown format: {value}"))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "target" => CliCommand::Target(single_optional(rest, "target")?.map(PathBuf::from)),
        "install" => CliCommand::Install(parse_install(rest)?),
        "update" => {
            no_arguments(rest, "update")?;
            CliCommand::Update
        }
        "uninstall" => {
            no_arguments(rest, "uninstall")?;
            CliCommand::Uninstall
        }
        "status" => {
            no_arguments(rest, "status")?;
            CliCommand::Status
        }
        "font" => CliCommand::Font(match single_optional(rest, "font")?.as_deref() {
            None => FontChange::Show,
            Some("--reset") => FontChange::Reset,
            Some(path) => FontChange::Set(PathBuf::from(path)),
        }),
        "mirror" => CliCommand::Mirror(parse_mirror(rest)?),
        "proxy" => CliCommand::Proxy(match single_optional(rest, "proxy")?.as_deref() {
            None => ProxyChange::Show,
            Some("--clear") => ProxyChange::Clear,
            Some(url) => ProxyChange::Set(url.to_string()),
        }),
        "paths" => CliCommand::Paths,
        "help" => CliCommand::Help,
        "version" => CliCommand::Version,
        other => bail!("Unknown command: {other} (see --help)"),
    };
    Ok(command)
}

fn parse_install(args: &[String]) -> Result<InstallArgs> {
    let mut parsed = InstallArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--bundle" => {
                let value = iter.next().context("--bundle requires an archive or directory")?;
                parsed.bundle = Some(PathBuf::from(value));
            }
            "--version" => {
                let value = iter.next().context("--version requires a value")?;
                parsed.version = Some(value.to_string());
            }
            "--lang" => {
                let value = iter.next().context("--lang requires a value")?;
                parsed.language = Some(value.to_string());
            }
            "--force" | "-f" => parsed.force = true,
            other => bail!("Unknown install option: {other}"),
        }
    }
    Ok(parsed)
}

fn parse_mirror(args: &[String]) -> Result<MirrorChange> {
    match args {
        [] => Ok(MirrorChange::Show),
        [flag] if flag == "on" => Ok(MirrorChange::Enabled(true)),
        [flag] if flag == "off" => Ok(MirrorChange::Enabled(false)),
        [flag] if flag == "--reset" => Ok(MirrorChange::Reset),
        [flag, url] if flag == "--url" => Ok(MirrorChange::Url(url.to_string())),
        _ => bail!("Usage: mirror [on|off|--url <prefix>|--reset]"),
    }
}

fn single_optional(args: &[String], command: &str) -> Result<Option<String>> {
    match args {
        [] => Ok(None),
        [value] => Ok(Some(value.to_string())),
        _ => bail!("{command} takes at most one argument"),
    }
}

fn no_arguments(args: &[String], command: &str) -> Result<()> {
    if let Some(extra) = args.first() {
        bail!("{command} takes no arguments (got {extra})");
    }
    Ok(())
}

pub fn run(invocation: Invocation) -> Result<()> {
    let Invocation { global, command } = invocation;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("limbus-localizer v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut config = AppConfig::load_or_create()?;
            run_command(&mut config, &global, command)
        }
    }
}

fn run_command(config: &mut AppConfig, global: &GlobalOptions, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::Target(path) => select_target(config, global, path.as_deref()),
        CliCommand::Install(args) => install(config, global, &args),
        CliCommand::Update => install(config, global, &InstallArgs::default()),
        CliCommand::Uninstall => uninstall(config, global),
        CliCommand::Status => show_status(config, global),
        CliCommand::Font(change) => change_font(config, global, change),
        CliCommand::Mirror(change) => change_mirror(config, global, change),
        CliCommand::Proxy(change) => change_proxy(config, global, change),
        CliCommand::Paths => list_paths(config, global),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

/// `--game` wins, then the saved path, then auto-detection (which is saved).
fn resolve_target(config: &mut AppConfig, global: &GlobalOptions) -> Result<GameTarget> {
    if let Some(path) = &global.game {
        return Ok(GameTarget::validate(path)?);
    }
    if let Some(path) = config.game_path.clone() {
        return GameTarget::validate(&path)
            .context("saved game directory is no longer valid; run `target <path>`");
    }
    let target = game::locate(None).context("game not found; run `target <path>`")?;
    tracing::info!(path = %target.root().display(), "using detected game directory");
    config.game_path = Some(target.root().to_path_buf());
    config.save()?;
    Ok(target)
}

#[derive(Serialize)]
struct TargetOutput {
    game_root: String,
    saved: bool,
}

fn select_target(config: &mut AppConfig, global: &GlobalOptions, path: Option<&Path>) -> Result<()> {
    let (target, saved) = match path {
        Some(path) => {
            let target = GameTarget::validate(path)?;
            config.game_path = Some(target.root().to_path_buf());
            config.save()?;
            (target, true)
        }
        None => (resolve_target(config, global)?, false),
    };
    let output = TargetOutput {
        game_root: target.root().display().to_string(),
        saved,
    };
    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            if saved {
                println!("Game directory set: {}", output.game_root);
            } else {
                println!("Game directory: {}", output.game_root);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InstallOutput {
    outcome: &'static str,
    version: String,
    previous: Option<String>,
    written: usize,
    removed: usize,
    backed_up: usize,
    warnings: Vec<String>,
}

fn install(config: &mut AppConfig, global: &GlobalOptions, args: &InstallArgs) -> Result<()> {
    let target = resolve_target(config, global)?;
    let manager = InstallationManager::new(target, &config.state_root());
    let status = OperationStatus::new();

    let bundle = match &args.bundle {
        Some(path) => load_local_bundle(path, args.version.as_deref())?,
        None => {
            let settings = FetchSettings::from_config(config);
            let work_dir = config.download_dir();
            with_progress(&status, global, || {
                fetch::fetch_bundle(&settings, &status, &work_dir, args.version.as_deref())
            })
            .map_err(explain)?
        }
    };
    let bundle = apply_font(bundle, config.font_path.as_deref())?;

    let options = InstallOptions {
        force: args.force,
        language: args.language.clone(),
    };
    let report = with_progress(&status, global, || manager.install(&bundle, &options, &status))
        .map_err(explain)?;
    print_install(&report, global.format)
}

fn load_local_bundle(path: &Path, version: Option<&str>) -> Result<ResourceBundle> {
    let version = match version {
        Some(version) => version.to_string(),
        None => path
            .file_stem()
            .map(|stem| format!("local-{}", stem.to_string_lossy()))
            .context("cannot derive a version from the bundle path; pass --version")?,
    };
    let bundle = if path.is_dir() {
        ResourceBundle::from_dir(path, &version, DEFAULT_NAME)?
    } else {
        let kind = ArchiveKind::from_path(path)
            .with_context(|| format!("unsupported bundle archive: {}", path.display()))?;
        ResourceBundle::from_archive(path, kind, &version, DEFAULT_NAME)?
    };
    Ok(bundle)
}

fn apply_font(bundle: ResourceBundle, font: Option<&Path>) -> Result<ResourceBundle> {
    let Some(font) = font else {
        return Ok(bundle);
    };
    if font.file_name().is_some_and(|name| name == BUNDLED_FONT_NAME) {
        tracing::info!("bundled font selected, keeping it");
        return Ok(bundle);
    }
    tracing::info!(font = %font.display(), "using custom font");
    Ok(bundle.with_font(font)?)
}

fn print_install(report: &InstallReport, format: OutputFormat) -> Result<()> {
    let (outcome, version, previous) = match &report.outcome {
        InstallOutcome::Installed { version, previous } => ("installed", version, previous.clone()),
        InstallOutcome::UpToDate { version } => ("up-to-date", version, None),
    };
    let output = InstallOutput {
        outcome,
        version: version.clone(),
        previous,
        written: report.written,
        removed: report.removed,
        backed_up: report.backed_up,
        warnings: report.warnings.iter().map(ToString::to_string).collect(),
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            for warning in &output.warnings {
                println!("Warning: {warning}");
            }
            match (&report.outcome, &output.previous) {
                (InstallOutcome::UpToDate { .. }, _) => {
                    println!("Already up to date ({}). Use --force to reinstall.", output.version)
                }
                (_, Some(previous)) => println!(
                    "Updated {previous} -> {} ({} written, {} removed)",
                    output.version, output.written, output.removed
                ),
                (_, None) => println!(
                    "Installed {} ({} files written, {} originals backed up)",
                    output.version, output.written, output.backed_up
                ),
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct UninstallOutput {
    version: Option<String>,
    removed: usize,
    missing: Vec<String>,
    warnings: Vec<String>,
}

fn uninstall(config: &mut AppConfig, global: &GlobalOptions) -> Result<()> {
    let target = resolve_target(config, global)?;
    let manager = InstallationManager::new(target, &config.state_root());
    let status = OperationStatus::new();
    let report = with_progress(&status, global, || manager.uninstall(&status)).map_err(explain)?;
    let output = UninstallOutput {
        version: report.version,
        removed: report.removed,
        missing: report.missing,
        warnings: report.warnings.iter().map(ToString::to_string).collect(),
    };
    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            for warning in &output.warnings {
                println!("Warning: {warning}");
            }
            match &output.version {
                None => println!("Nothing installed."),
                Some(version) => {
                    println!("Uninstalled {version} ({} files removed)", output.removed);
                    if !output.missing.is_empty() {
                        println!("Already missing: {}", output.missing.join(", "));
                    }
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusOutput {
    game_root: String,
    state: String,
    version: Option<String>,
    installed_at: Option<String>,
    files: usize,
    backups: usize,
    missing: Vec<String>,
    modified: Vec<String>,
    degraded: Option<String>,
    affected: Vec<String>,
    warnings: Vec<String>,
}

fn show_status(config: &mut AppConfig, global: &GlobalOptions) -> Result<()> {
    let target = resolve_target(config, global)?;
    let manager = InstallationManager::new(target, &config.state_root());
    let status = manager.status();
    let verification = status.verification.unwrap_or_default();
    let record = status.record.as_ref();
    let output = StatusOutput {
        game_root: manager.target().root().display().to_string(),
        state: status.state.label(),
        version: record.map(|record| record.version.clone()),
        installed_at: record.map(|record| record.installed_at.clone()),
        files: record.map(|record| record.files.len()).unwrap_or(0),
        backups: record.map(|record| record.backups.len()).unwrap_or(0),
        missing: verification.missing,
        modified: verification.modified,
        degraded: record
            .and_then(|record| record.degraded.as_ref())
            .map(|marker| marker.reason.clone()),
        affected: match &status.state {
            InstallState::Degraded { affected, .. } => affected.clone(),
            _ => Vec::new(),
        },
        warnings: status.warnings.iter().map(ToString::to_string).collect(),
    };
    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Game: {}", output.game_root);
            println!("State: {}", output.state);
            if let Some(installed_at) = &output.installed_at {
                println!("Installed at: {installed_at}");
                println!("Files: {} ({} originals backed up)", output.files, output.backups);
            }
            if !output.missing.is_empty() {
                println!("Missing: {}", output.missing.join(", "));
            }
            if !output.modified.is_empty() {
                println!("Modified: {}", output.modified.join(", "));
            }
            if let Some(reason) = &output.degraded {
                println!("Degraded: {reason}");
                for path in &output.affected {
                    println!("  {path}");
                }
                println!("Run `install --force` to repair.");
            }
            for warning in &output.warnings {
                println!("Warning: {warning}");
            }
        }
    }
    Ok(())
}

fn change_font(config: &mut AppConfig, global: &GlobalOptions, change: FontChange) -> Result<()> {
    match change {
        FontChange::Show => {}
        FontChange::Reset => {
            config.font_path = None;
            config.save()?;
        }
        FontChange::Set(path) => {
            let ext = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase);
            if !matches!(ext.as_deref(), Some("ttf" | "otf")) {
                bail!("Font must be a .ttf or .otf file: {}", path.display());
            }
            if !path.is_file() {
                bail!("Font file not found: {}", path.display());
            }
            let path = path.canonicalize().unwrap_or(path);
            config.font_path = Some(path);
            config.save()?;
        }
    }
    let font = config.font_path.as_ref().map(|path| path.display().to_string());
    print_setting(global.format, "font", font.as_deref(), "bundled font")
}

#[derive(Serialize)]
struct MirrorOutput {
    enabled: bool,
    url: Option<String>,
}

fn change_mirror(config: &mut AppConfig, global: &GlobalOptions, change: MirrorChange) -> Result<()> {
    match change {
        MirrorChange::Show => {}
        MirrorChange::Enabled(enabled) => {
            config.use_mirror = enabled;
            config.save()?;
        }
        MirrorChange::Url(url) => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("Mirror prefix must be an http(s) URL: {url}");
            }
            config.mirror_url = Some(url);
            config.use_mirror = true;
            config.save()?;
        }
        MirrorChange::Reset => {
            config.mirror_url = None;
            config.save()?;
        }
    }
    let output = MirrorOutput {
        enabled: config.use_mirror,
        url: config.mirror_url.clone(),
    };
    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            let url = output
                .url
                .clone()
                .unwrap_or_else(|| format!("{} (default)", crate::config::DEFAULT_MIRROR_URL));
            let state = if output.enabled { "on" } else { "off" };
            println!("Mirror: {state}, prefix {url}");
        }
    }
    Ok(())
}

fn change_proxy(config: &mut AppConfig, global: &GlobalOptions, change: ProxyChange) -> Result<()> {
    match change {
        ProxyChange::Show => {}
        ProxyChange::Set(url) => {
            config.http_proxy = Some(url);
            config.save()?;
        }
        ProxyChange::Clear => {
            config.http_proxy = None;
            config.save()?;
        }
    }
    print_setting(global.format, "proxy", config.http_proxy.as_deref(), "none")
}

#[derive(Serialize)]
struct SettingOutput<'a> {
    setting: &'a str,
    value: Option<&'a str>,
}

fn print_setting(format: OutputFormat, setting: &str, value: Option<&str>, unset: &str) -> Result<()> {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&SettingOutput { setting, value })?
        ),
        OutputFormat::Text => println!("{setting}: {}", value.unwrap_or(unset)),
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    config: String,
    state_root: String,
    downloads: String,
    game_root: Option<String>,
    state_dir: Option<String>,
    record: Option<String>,
    game_config: Option<String>,
    error: Option<String>,
}

fn list_paths(config: &mut AppConfig, global: &GlobalOptions) -> Result<()> {
    let mut output = PathsOutput {
        config: config.path().display().to_string(),
        state_root: config.state_root().display().to_string(),
        downloads: config.download_dir().display().to_string(),
        game_root: None,
        state_dir: None,
        record: None,
        game_config: None,
        error: None,
    };
    match resolve_target(config, global) {
        Ok(target) => {
            let manager = InstallationManager::new(target, &config.state_root());
            output.game_root = Some(manager.target().root().display().to_string());
            output.state_dir = Some(manager.store().dir().display().to_string());
            output.record = Some(manager.store().record_path().display().to_string());
            output.game_config = Some(
                manager
                    .target()
                    .lang_dir()
                    .join("config.json")
                    .display()
                    .to_string(),
            );
        }
        Err(err) => output.error = Some(format!("{err:#}")),
    }

    match global.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            println!("Config: {}", output.config);
            println!("State root: {}", output.state_root);
            println!("Downloads: {}", output.downloads);
            if let Some(game_root) = &output.game_root {
                println!("Game root: {game_root}");
            }
            if let Some(state_dir) = &output.state_dir {
                println!("State dir: {state_dir}");
            }
            if let Some(record) = &output.record {
                println!("Install record: {record}");
            }
            if let Some(game_config) = &output.game_config {
                println!("Game config: {game_config}");
            }
            if let Some(error) = &output.error {
                println!("Warning: {error}");
            }
        }
    }
    Ok(())
}

/// Prints the files a failed operation left behind and whether a re-run is
/// safe, then hands the error on.
fn explain(err: PatchError) -> anyhow::Error {
    let affected = err.affected_files();
    if !affected.is_empty() {
        eprintln!("Affected files:");
        for path in affected {
            eprintln!("  {path}");
        }
    }
    if let PatchError::FileAccess { rolled_back: true, .. } | PatchError::Cancelled { rolled_back: true } = &err {
        eprintln!("All changes were rolled back.");
    }
    eprintln!("Hint: {}", err.retry_hint());
    anyhow::Error::new(err)
}

/// Runs `op` while a watcher thread logs phase and percentage changes.
fn with_progress<T>(status: &OperationStatus, global: &GlobalOptions, op: impl FnOnce() -> T) -> T {
    if global.verbosity == Verbosity::Quiet {
        return op();
    }
    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| watch_progress(status, &done));
        let result = op();
        done.store(true, Ordering::SeqCst);
        result
    })
}

fn watch_progress(status: &OperationStatus, done: &AtomicBool) {
    let mut last: Option<(Phase, Option<u8>)> = None;
    while !done.load(Ordering::SeqCst) {
        let snapshot = status.snapshot();
        let bucket = snapshot.percent().map(|percent| percent / 10 * 10);
        if snapshot.phase != Phase::Idle && last != Some((snapshot.phase, bucket)) {
            match bucket {
                Some(percent) => tracing::info!(
                    phase = snapshot.phase.label(),
                    percent,
                    current = snapshot.current.as_deref().unwrap_or(""),
                    "progress"
                ),
                None => tracing::info!(phase = snapshot.phase.label(), "progress"),
            }
            last = Some((snapshot.phase, bucket));
        }
        thread::sleep(Duration::from_millis(150));
    }
}

fn print_help() {
    println!("limbus-localizer v{}", env!("CARGO_PKG_VERSION"));
    println!("Installs and removes the Limbus Company localization patch.");
    println!();
    println!("Usage:");
    println!("  limbus-localizer target [<path>]              Show or set the game directory");
    println!("  limbus-localizer install [options]            Download and install the patch");
    println!("  limbus-localizer update                       Install the latest patch if it changed");
    println!("  limbus-localizer uninstall                    Remove the patch and restore the game");
    println!("  limbus-localizer status                       Show install state and verify files");
    println!("  limbus-localizer font [<path>|--reset]        Show or set a custom .ttf/.otf font");
    println!("  limbus-localizer mirror [on|off|--url <prefix>|--reset]");
    println!("                                                Configure the download mirror");
    println!("  limbus-localizer proxy [<url>|--clear]        Configure an HTTP proxy");
    println!("  limbus-localizer paths                        Show config, state and game paths");
    println!();
    println!("Install options:");
    println!("  --bundle <archive|dir>                        Install from a local zip/7z or folder");
    println!("  --version <v>                                 Version label for the bundle");
    println!("  --lang <name>                                 Value written to the game's lang setting");
    println!("  -f, --force                                   Reinstall even if up to date");
    println!();
    println!("Global options:");
    println!("  --game <path>                                 Game directory for this run");
    println!("  --format <text|json>                          Output format");
    println!("  -v, --verbose                                 Debug logging");
    println!("  -q, --quiet                                   Warnings only");
    println!("  -h, --help                                    Show help");
    println!("  -V, --version                                 Show version");
    println!();
    println!("Set RUST_LOG to override the log filter.");
}
