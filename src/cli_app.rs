//! CLI definition and command implementations.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use windowed_cache::core::config::Config;
use windowed_cache::core::errors::CacheError;
use windowed_cache::prefetch::queue::{PrefetchListener, PrefetchQueue};
use windowed_cache::source::memory::{MemorySource, MemorySourceHandle};
use windowed_cache::window::cache::WindowCache;
use windowed_cache::window::notifier::CacheListener;

/// Windowed cache driver: exercise the cache engines against synthetic data.
#[derive(Debug, Parser)]
#[command(
    name = "wcache",
    author,
    version,
    about = "Windowed data cache - simulation and diagnostics",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scroll a window cache over an in-memory source and report callbacks.
    Simulate(SimulateArgs),
    /// Consume records through a prefetch queue.
    Slideshow(SlideshowArgs),
    /// View or validate configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Serialize)]
struct SimulateArgs {
    /// Number of records in the synthetic source.
    #[arg(long, default_value_t = 1000)]
    size: usize,
    /// Number of window moves.
    #[arg(long, default_value_t = 50)]
    steps: usize,
    /// Active window width (at most the configured capacity).
    #[arg(long, default_value_t = 20)]
    window: usize,
    /// Seed for the scroll walk.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Mutate one visible record every N steps (0 disables).
    #[arg(long, default_value_t = 10)]
    mutate_every: usize,
    /// Per-step wait for the loader to go idle, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,
}

#[derive(Debug, Clone, Args, Serialize)]
struct SlideshowArgs {
    /// Number of records in the synthetic source.
    #[arg(long, default_value_t = 20)]
    size: usize,
    /// Records to consume (defaults to all of them).
    #[arg(long)]
    count: Option<usize>,
    /// Truncate each record to this many characters.
    #[arg(long, default_value_t = 32)]
    max_len: usize,
    /// Per-record wait, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    wait_ms: u64,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand, Serialize)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Engine or environment failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<CacheError> for CliError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidConfig { .. }
            | CacheError::MissingConfig { .. }
            | CacheError::ConfigParse { .. }
            | CacheError::InvalidArgument { .. } => Self::User(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    init_tracing(cli);
    match &cli.command {
        Command::Simulate(args) => run_simulate(cli, args),
        Command::Slideshow(args) => run_slideshow(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

fn init_tracing(cli: &Cli) {
    let fallback = if cli.verbose {
        "windowed_cache=debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env("WCACHE_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    // A second init (tests driving `run` twice) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum CacheEvent {
    SizeChanged {
        size: usize,
    },
    ContentChanged {
        index: usize,
        old: Option<String>,
        new: String,
    },
}

/// Listener that buffers events until the driver flushes them.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<CacheEvent>>>);

impl EventLog {
    fn drain(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl CacheListener<String> for EventLog {
    fn on_size_changed(&mut self, size: usize) {
        self.0.lock().push(CacheEvent::SizeChanged { size });
    }

    fn on_content_changed(&mut self, index: usize, old: Option<&String>, new: &String) {
        self.0.lock().push(CacheEvent::ContentChanged {
            index,
            old: old.cloned(),
            new: new.clone(),
        });
    }
}

fn synthetic_records(size: usize) -> Vec<String> {
    (0..size).map(|i| format!("record-{i:05}")).collect()
}

fn run_simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    if args.window > config.window.capacity {
        return Err(CliError::User(format!(
            "window {} exceeds cache capacity {}",
            args.window, config.window.capacity
        )));
    }
    let mode = output_mode(cli);
    let settle = Duration::from_millis(args.settle_ms);

    let (source, handle) = MemorySource::new(synthetic_records(args.size));
    let log = EventLog::default();
    let mut cache = WindowCache::with_listener(source, &config, log.clone())?;
    if !cache.wait_idle(settle) {
        return Err(CliError::Runtime("initial load did not settle".to_string()));
    }
    emit_events(mode, 0, &log.drain())?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let width = args.window.min(cache.size());
    let mut start = 0_usize;
    for step in 1..=args.steps {
        start = next_window_start(&mut rng, start, width, cache.size());
        cache.set_active_window(start, start + width)?;

        if args.mutate_every > 0 && step % args.mutate_every == 0 && width > 0 {
            mutate_visible(&mut rng, &handle, start, width, step);
        }
        if !cache.wait_idle(settle) {
            tracing::warn!(step, "loader did not settle within {settle:?}");
        }
        emit_events(mode, step, &log.drain())?;
    }

    let stats = cache.stats();
    match mode {
        OutputMode::Human => {
            println!(
                "done: {} steps, {} tasks, {} batches ({} records), {} rechains, {} discarded",
                args.steps,
                stats.tasks_created,
                stats.batches_fetched,
                stats.records_fetched,
                stats.rechains,
                stats.tasks_discarded
            );
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "simulate",
                "args": args,
                "config_hash": config.stable_hash()?,
                "stats": stats,
            }))?;
        }
    }
    Ok(())
}

/// Small scroll most of the time, an occasional jump anywhere.
fn next_window_start(rng: &mut StdRng, start: usize, width: usize, size: usize) -> usize {
    let max_start = size.saturating_sub(width);
    if max_start == 0 {
        return 0;
    }
    if rng.random_bool(0.1) {
        return rng.random_range(0..=max_start);
    }
    let step = rng.random_range(0..=width.max(1));
    if rng.random_bool(0.5) {
        start.saturating_sub(step)
    } else {
        (start + step).min(max_start)
    }
}

fn mutate_visible(
    rng: &mut StdRng,
    handle: &MemorySourceHandle<String>,
    start: usize,
    width: usize,
    step: usize,
) {
    let index = start + rng.random_range(0..width);
    if let Some(current) = handle.get(index) {
        let base = current.split('@').next().unwrap_or(&current).to_string();
        handle.set(index, format!("{base}@step{step}"));
        tracing::debug!(index, step, "mutated record");
    }
}

fn emit_events(mode: OutputMode, step: usize, events: &[CacheEvent]) -> Result<(), CliError> {
    for event in events {
        match mode {
            OutputMode::Human => match event {
                CacheEvent::SizeChanged { size } => println!("step {step}: size {size}"),
                CacheEvent::ContentChanged { index, old, new } => println!(
                    "step {step}: [{index}] {} -> {new}",
                    old.as_deref().unwrap_or("-")
                ),
            },
            OutputMode::Json => {
                let mut payload = serde_json::to_value(event)?;
                if let Value::Object(map) = &mut payload {
                    map.insert("step".to_string(), json!(step));
                    map.insert("ts".to_string(), json!(chrono::Utc::now().to_rfc3339()));
                }
                write_json_line(&payload)?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// slideshow
// ---------------------------------------------------------------------------

/// Counts content-available signals for the summary line.
#[derive(Clone, Default)]
struct AvailabilityCounter(Arc<Mutex<u64>>);

impl PrefetchListener for AvailabilityCounter {
    fn on_content_available(&mut self) {
        *self.0.lock() += 1;
    }
}

fn run_slideshow(cli: &Cli, args: &SlideshowArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let mode = output_mode(cli);
    let wait = Duration::from_millis(args.wait_ms);
    let max_len = args.max_len;

    let (source, _handle) = MemorySource::new(synthetic_records(args.size));
    let mut queue = PrefetchQueue::new(
        source,
        move |record: String| Some(record.chars().take(max_len).collect::<String>()),
        &config,
    )?;
    let signals = AvailabilityCounter::default();
    queue.set_listener(signals.clone());

    let wanted = args.count.unwrap_or(args.size);
    let mut taken = 0;
    while taken < wanted && queue.wait_for_next(wait) {
        let record = queue.take_next()?;
        match mode {
            OutputMode::Human => println!("{taken:>4}: {record}"),
            OutputMode::Json => write_json_line(&json!({
                "event": "record",
                "position": taken,
                "record": record,
                "in_flight": queue.in_flight(),
                "queued": queue.queued(),
                "ts": chrono::Utc::now().to_rfc3339(),
            }))?,
        }
        taken += 1;
    }

    let stats = queue.stats();
    let available = *signals.0.lock();
    match mode {
        OutputMode::Human => println!(
            "done: {taken} records, {} fetches, {} absent, {available} availability signals",
            stats.fetches_issued, stats.items_absent
        ),
        OutputMode::Json => write_json_line(&json!({
            "command": "slideshow",
            "taken": taken,
            "availability_signals": available,
            "stats": stats,
        }))?,
    }
    if taken < wanted {
        return Err(CliError::Runtime(format!(
            "only {taken} of {wanted} records arrived"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// output
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("WCACHE_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
