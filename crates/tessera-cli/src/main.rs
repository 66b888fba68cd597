//! Command-line driver for the tessera model checker.

mod signals;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use miette::Diagnostic;
use tessera_mc::{
    CheckerKind, ConfigError, ExploreError, ExploreOutcome, Explorer, ProgressCounters, Settings,
};
use tessera_models::{by_name, ModelArgs, ModelError, MODELS};
use tessera_store::BackendKind;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status of a run stopped by a signal.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(
        code(tessera::config),
        help("settings are KEY=VALUE; see `tessera run --help`")
    )]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(tessera::model), help("`tessera models` lists the built-in models"))]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(code(tessera::explore))]
    Explore(#[from] ExploreError),
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(
    name = "tessera",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("TESSERA_GIT_HASH"),
        " ",
        env!("TESSERA_BUILD_TARGET"),
        ")"
    )
)]
#[command(about = "Parallel explicit-state model checker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explore the full state space of a built-in model
    Run(RunArgs),

    /// List the built-in models, storage backends and checkers
    Models,
}

#[derive(Args)]
struct RunArgs {
    /// Model name (see `tessera models`)
    #[arg(value_name = "MODEL")]
    model: String,

    /// Worker threads (0 = all cores)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Work distribution: singlecore_simple, multicore_simple, multicore_bitbetter
    #[arg(long)]
    checker: Option<String>,

    /// Storage backend: stdmap, cchm, treedbs_stdmap, treedbs_cchm, treedbsmod, dtree
    #[arg(long)]
    storage: Option<String>,

    /// Override a setting, e.g. `-s root_log2=24`
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Model parameter, e.g. `--model-arg procs=3`
    #[arg(short = 'a', long = "model-arg", value_name = "KEY=VALUE")]
    model_arg: Vec<String>,

    /// Log progress every N seconds (0 = never)
    #[arg(long, default_value = "0", value_name = "SECS")]
    progress: u64,

    /// Print the effective settings before running
    #[arg(long)]
    show_settings: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    // Install miette's fancy error handler
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();

    // Initialize logging
    let level = match &cli.command {
        Commands::Run(args) if args.verbose => "debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Models => {
            cmd_models();
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => {
            std::io::stdout().flush().ok();
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(1);
        }
    }
}

/// Collect settings from `-s` overrides, then the dedicated flags.
fn settings_from(args: &RunArgs) -> CliResult<Settings> {
    let mut settings = Settings::new();
    for item in &args.set {
        settings.apply(item)?;
    }
    if let Some(threads) = args.threads {
        settings.set("threads", threads.to_string())?;
    }
    if let Some(checker) = &args.checker {
        settings.set("checker", checker.as_str())?;
    }
    if let Some(storage) = &args.storage {
        settings.set("storage", storage.as_str())?;
    }
    Ok(settings)
}

/// Returns `false` if the run was interrupted.
fn cmd_run(args: RunArgs) -> CliResult<bool> {
    let settings = settings_from(&args)?;
    if args.show_settings {
        print!("{settings}");
    }
    let mut config = settings.explore_config()?;
    let progress = Arc::new(ProgressCounters::new());
    config.progress = Some(Arc::clone(&progress));

    let model_args = ModelArgs::parse(args.model_arg.as_slice())?;
    let model = by_name(&args.model, &model_args)?;

    let mut explorer = Explorer::new(model, config)?;
    let stop = Arc::new(AtomicBool::new(false));
    signals::install(Arc::clone(&stop));
    explorer.set_stop_flag(stop);

    let interval = Duration::from_secs(args.progress);
    let done = AtomicBool::new(false);
    let outcome = thread::scope(|scope| {
        if !interval.is_zero() {
            scope.spawn(|| report_progress(&progress, &done, interval));
        }
        let outcome = explorer.run();
        done.store(true, Ordering::Release);
        outcome
    })?;

    let complete = !matches!(outcome, ExploreOutcome::Interrupted(_));
    match &outcome {
        ExploreOutcome::Complete(_) => info!("exploration complete"),
        ExploreOutcome::StateLimitReached(s) => {
            warn!(states = s.states, "state limit reached, state space not exhausted")
        }
        ExploreOutcome::Interrupted(s) => warn!(states = s.states, "interrupted"),
    }
    print!("{}", outcome.summary());
    Ok(complete)
}

fn report_progress(progress: &ProgressCounters, done: &AtomicBool, interval: Duration) {
    let start = Instant::now();
    let mut next = interval;
    while !done.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(50));
        let elapsed = start.elapsed();
        if elapsed < next {
            continue;
        }
        next += interval;
        info!(
            secs = elapsed.as_secs(),
            states = progress.states.load(Ordering::Relaxed),
            checked = progress.checked.load(Ordering::Relaxed),
            queue = progress.queue_len.load(Ordering::Relaxed),
            phase = ?progress.phase(),
            "progress"
        );
    }
}

fn cmd_models() {
    println!("models:");
    for (name, description) in MODELS {
        println!("  {name:<10} {description}");
    }
    println!("storage backends:");
    for kind in BackendKind::ALL {
        let default = if kind == BackendKind::default() { " (default)" } else { "" };
        println!("  {kind}{default}");
    }
    println!("checkers:");
    for kind in CheckerKind::ALL {
        let default = if kind == CheckerKind::default() { " (default)" } else { "" };
        println!("  {kind}{default}");
    }
}
