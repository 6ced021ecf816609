//! Command-line interface for codemend.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tokio::sync::{broadcast, mpsc};
use walkdir::WalkDir;

use crate::analysis::{AnalyzerSet, Engine, EngineError, ExternalAnalyzer, Language, SourceUnit};
use crate::config::{Config, PythonBackend, TEMPLATE};
use crate::converge::{CancelToken, Controller, Failure, Outcome, SessionResult};
use crate::logging::LogLevel;
use crate::oracle::{FixOracle, HttpFixOracle};
use crate::progress::ProgressEvent;
use crate::report::{self, FileReport};
use crate::server::Server;
use crate::service::Service;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Analyze JavaScript and Python snippets and drive them to a clean state.
///
/// codemend runs a set of syntax-tree rules over a snippet and, when a fix
/// endpoint is configured, repeatedly asks it for corrected code until the
/// analysis comes back clean or the iteration bound is reached.
#[derive(Parser)]
#[command(name = "codemend")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log verbosity (RUST_LOG directives are applied on top)
    #[arg(long, global = true, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to codemend.yaml (default: auto-discover)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a file, a directory, or stdin (`-`)
    #[command(visible_alias = "check")]
    Analyze(AnalyzeArgs),
    /// Run the analyze/fix loop on a single snippet
    Fix(FixArgs),
    /// Serve the HTTP API
    Serve(ServeArgs),
    /// Write a starting codemend.yaml
    Init(InitArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// Arguments for the analyze command.
#[derive(Parser)]
pub struct AnalyzeArgs {
    /// File, directory, or `-` for stdin
    pub path: PathBuf,

    /// Language of the input (default: from the file extension)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,
}

/// Arguments for the fix command.
#[derive(Parser)]
pub struct FixArgs {
    /// File, or `-` for stdin
    pub path: PathBuf,

    /// Language of the input (default: from the file extension)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Write the final code here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override loop.max_iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,
}

/// Arguments for the serve command.
#[derive(Parser)]
pub struct ServeArgs {
    /// Override server.host
    #[arg(long)]
    pub host: Option<String>,

    /// Override server.port
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Output file path
    #[arg(short, long, default_value = "codemend.yaml")]
    pub output: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Run the parsed command and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let config_path = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Analyze(args) => run_analyze(args, config_path).await,
        Commands::Fix(args) => run_fix(args, config_path).await,
        Commands::Serve(args) => run_serve(args, config_path).await,
        Commands::Init(args) => run_init(args),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_ERROR
        }
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    Ok(Config::load(explicit, &cwd)?)
}

/// Engine with the configured rules, limits and Python backend.
pub fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let mut analyzers = AnalyzerSet::native(Arc::new(config.rule_policy()))?;
    if config.python.backend == PythonBackend::Interpreter {
        let external = ExternalAnalyzer::new(
            &config.python.command,
            Duration::from_millis(config.python.timeout_ms),
        )?;
        analyzers = analyzers.with_python_backend(external);
    }
    Ok(Engine::new(analyzers, config.limits.max_code_length))
}

/// HTTP oracle for the configured endpoint, if there is one.
pub fn build_oracle(config: &Config) -> anyhow::Result<Option<Arc<dyn FixOracle>>> {
    let Some(endpoint) = config.oracle.endpoint.as_deref() else {
        return Ok(None);
    };
    let mut oracle =
        HttpFixOracle::new(endpoint, Duration::from_millis(config.oracle.timeout_ms))?
            .with_retry(config.retry_policy());
    if let Some(key) = config.oracle.api_key() {
        oracle = oracle.with_bearer_token(key);
    }
    Ok(Some(Arc::new(oracle)))
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if is_stdin(path) {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// `--language` wins; otherwise the extension decides.
pub fn resolve_language(explicit: Option<&str>, path: &Path) -> anyhow::Result<Language> {
    if let Some(name) = explicit {
        return Ok(Language::from_str(name)?);
    }
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(Language::from_extension)
        .with_context(|| {
            format!(
                "cannot infer language for {}; pass --language",
                path.display()
            )
        })
}

/// Collect analyzable files under `root`, honoring `excluded_paths`.
pub fn collect_files(root: &Path, config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            // Skip hidden directories
            let name = e.file_name().to_string_lossy();
            !(e.depth() > 0 && e.file_type().is_dir() && name.starts_with('.'))
        })
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if config.is_path_excluded(relative) {
            continue;
        }
        let known = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
            .is_some();
        if known {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Analyze every file in parallel with the in-process analyzers.
fn scan(root: &Path, files: &[PathBuf], engine: &Engine) -> Vec<FileReport> {
    files
        .par_iter()
        .filter_map(|path| {
            let language = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(Language::from_extension)?;
            let code = match std::fs::read_to_string(path) {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable file: {}", e);
                    return None;
                }
            };
            let unit = SourceUnit::new(code, language);
            match engine.analyze_native(&unit) {
                Ok(report) => Some(FileReport {
                    path: path
                        .strip_prefix(root)
                        .unwrap_or(path)
                        .display()
                        .to_string(),
                    language,
                    report,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping file: {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Run the analyze command.
pub async fn run_analyze(args: &AnalyzeArgs, config_path: Option<&Path>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    let display = args.path.display().to_string();

    let files = if !is_stdin(&args.path) && args.path.is_dir() {
        let files = collect_files(&args.path, &config)?;
        if files.is_empty() {
            eprintln!("Warning: no files to scan");
            return Ok(EXIT_SUCCESS);
        }
        scan(&args.path, &files, &engine)
    } else {
        let language = resolve_language(args.language.as_deref(), &args.path)?;
        let unit = SourceUnit::new(read_input(&args.path)?, language);
        let report = match engine.analyze(&unit).await {
            Ok(report) => report,
            Err(e @ EngineError::InputTooLarge { .. }) => {
                eprintln!("Error: {}", e);
                return Ok(EXIT_ERROR);
            }
            Err(e) => return Err(e.into()),
        };
        vec![FileReport {
            path: display.clone(),
            language,
            report,
        }]
    };

    match args.format {
        OutputFormat::Json => report::write_json(&display, &files)?,
        OutputFormat::Pretty => report::write_pretty(&display, &files),
    }

    if files.iter().all(|f| f.report.is_clean()) {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILED)
    }
}

/// Progress bar fed by session events until the channel closes.
fn spawn_progress_bar(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
) -> tokio::task::JoinHandle<()> {
    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar().template("{bar:30.cyan} {pos:>3}% {msg}") {
        bar.set_style(style);
    }
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            bar.set_position(u64::from(event.percent()));
            bar.set_message(event.message().to_string());
            if event.is_terminal() {
                break;
            }
        }
        bar.finish_and_clear();
    })
}

fn session_exit_code(result: &SessionResult) -> i32 {
    match &result.outcome {
        Outcome::Done { .. } => EXIT_SUCCESS,
        Outcome::Failed {
            failure: Failure::Syntax,
            ..
        } => EXIT_FAILED,
        Outcome::Failed { .. } | Outcome::Cancelled { .. } => EXIT_ERROR,
        Outcome::Reported { .. } | Outcome::Abandoned { .. } => EXIT_FAILED,
    }
}

/// Run the fix command.
pub async fn run_fix(args: &FixArgs, config_path: Option<&Path>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    let language = resolve_language(args.language.as_deref(), &args.path)?;
    let code = read_input(&args.path)?;

    let engine = Arc::new(build_engine(&config)?);
    let oracle = build_oracle(&config)?
        .context("no fix endpoint configured (set oracle.endpoint in codemend.yaml)")?;

    let mut settings = config.loop_settings();
    if let Some(max) = args.max_iterations {
        settings.max_iterations = max;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let bar = spawn_progress_bar(rx);
    let controller = Controller::new(engine, oracle)
        .with_settings(settings)
        .with_observer(Arc::new(tx));

    let cancel = CancelToken::new();
    let on_interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = controller
        .run(SourceUnit::new(code, language), &cancel)
        .await;
    on_interrupt.abort();
    drop(controller);
    let _ = bar.await;

    let display = args.path.display().to_string();
    match args.format {
        OutputFormat::Json => report::write_session_json(&result)?,
        OutputFormat::Pretty => report::write_session_pretty(&display, &result),
    }

    if let Some(code) = result.outcome.code() {
        match &args.output {
            Some(output) => std::fs::write(output, code)
                .with_context(|| format!("failed to write {}", output.display()))?,
            None if args.format == OutputFormat::Pretty && result.was_fixed() => {
                println!("{}", code);
            }
            None => {}
        }
    }

    Ok(session_exit_code(&result))
}

/// Run the serve command.
pub async fn run_serve(args: &ServeArgs, config_path: Option<&Path>) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    let engine = Arc::new(build_engine(&config)?);

    let (events, _) = broadcast::channel::<ProgressEvent>(config.server.event_buffer);
    let controller = match build_oracle(&config)? {
        Some(oracle) => Controller::new(engine, oracle),
        None => {
            tracing::info!("no fix endpoint configured; sessions will only report");
            Controller::report_only(engine)
        }
    }
    .with_settings(config.loop_settings())
    .with_observer(Arc::new(events.clone()));

    let host = args.host.as_deref().unwrap_or(&config.server.host);
    let port = args.port.unwrap_or(config.server.port);
    let listener = Server::bind(host, port).await?;

    let server = Server::new(
        Service::new(controller),
        events,
        config.limits.max_body_bytes,
    );
    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(EXIT_SUCCESS)
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if args.output.exists() && !args.force {
        eprintln!("Error: file already exists: {}", args.output.display());
        eprintln!("Use --force to overwrite it");
        return Ok(EXIT_ERROR);
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() && parent != Path::new(".") {
            std::fs::create_dir_all(parent).context("failed to create directory")?;
        }
    }

    std::fs::write(&args.output, TEMPLATE)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!("Created {}", args.output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set oracle.endpoint to enable fixes");
    println!("  2. Run: codemend analyze . --config {}", args.output.display());

    Ok(EXIT_SUCCESS)
}
