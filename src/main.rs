//! Price Watch
//!
//! Watches fixed screen regions of a market UI, reads the prices and
//! quantities shown there with Tesseract, and appends one CSV row per
//! cycle.

mod capture;
mod error;
mod monitor;
mod ocr;
mod paths;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::capture::open_backend;
use crate::monitor::config::BoundsConfig;
use crate::monitor::{
    load_config, read_config, spawn_stdin_control, CsvSink, Lifecycle, Monitor, MonitorConfig,
};
use crate::ocr::{normalize, parse_value, ValueKind};

const LOG_FILE: &str = "pricewatch.log";

#[derive(Parser)]
#[command(name = "pricewatch", version, about = "OCR price monitor for fixed screen regions")]
struct Cli {
    /// Config file (default: config.json next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start monitoring. Type `p` + Enter to pause/resume, `q` + Enter to quit.
    Run {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Run a single cycle and print the row
    Once,
    /// Print the grid and region map for the current screen
    Regions,
    /// Normalize and parse a literal OCR string
    Parse {
        text: String,
        #[arg(long, value_enum, default_value = "price")]
        kind: KindArg,
    },
    /// Check Tesseract and download language data if missing
    Setup,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Price,
    Quantity,
}

impl From<KindArg> for ValueKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Price => ValueKind::Price,
            KindArg::Quantity => ValueKind::Quantity,
        }
    }
}

/// Console layer on stderr plus an append-only log file under `logs/`.
fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_path = paths::get_logs_dir().join(LOG_FILE);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(Mutex::new(log_file)),
        )
        .init();
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        let thread = std::thread::current();
        error!(
            "[PANIC] thread '{}'{}: {}",
            thread.name().unwrap_or("unnamed"),
            location,
            msg
        );
    }));
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(paths::get_config_path)
}

fn run_monitor(config: &MonitorConfig, cycles: Option<u64>) -> Result<()> {
    let mut monitor = Monitor::from_config(config)?;
    let lifecycle = Lifecycle::new();
    lifecycle.start();
    spawn_stdin_control(lifecycle.clone())?;

    let regions = config.regions.len();
    match cycles {
        Some(n) => info!("Monitoring {} regions for {} cycles", regions, n),
        None => info!("Monitoring {} regions until quit", regions),
    }
    info!("Commands: p = pause/resume, q = quit");

    monitor.run(&lifecycle, cycles);
    monitor.shutdown();
    Ok(())
}

fn run_single(config: &MonitorConfig) -> Result<()> {
    let mut monitor = Monitor::from_config(config)?;
    let cycle = monitor.run_once();
    monitor.shutdown();

    let printer = CsvSink::new(
        paths::resolve_output_path(&config.output.csv_path),
        config.region_names(),
        config.output.absent_marker.clone(),
    );
    println!("{}", printer.header());
    println!("{}", printer.format_row(&config.row_label(), &cycle));
    Ok(())
}

fn print_regions(config: &MonitorConfig) {
    let screen = match open_backend(&config.capture) {
        Ok(mut backend) => match backend.screen_size() {
            Ok(size) => {
                println!("Screen: {}x{} ({})", size.0, size.1, backend.name());
                Some(size)
            }
            Err(e) => {
                warn!("Screen size unavailable: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Capture backend unavailable: {:#}", e);
            None
        }
    };
    println!("{}", config.region_map(screen));
}

fn print_parse(text: &str, kind: ValueKind, bounds: &BoundsConfig) {
    let normalized = normalize(text);
    println!("input:      {:?}", text);
    println!("normalized: {:?}", normalized);
    match parse_value(&normalized, bounds.for_kind(kind)) {
        Ok(parsed) => println!("{}: {} ({})", kind, parsed.value, parsed.rule),
        Err(e) => println!("{}: unrecognized ({})", kind, e),
    }
}

fn run_setup(config: &MonitorConfig) -> Result<()> {
    let tesseract = &config.ocr.tesseract;
    let paths = ocr::setup::ensure_tesseract(
        tesseract.executable.as_deref(),
        tesseract.tessdata_dir.as_deref(),
        &tesseract.language,
    )?;
    println!("tesseract: {}", paths.executable.display());
    match &paths.tessdata {
        Some(dir) => println!("tessdata:  {}", dir.display()),
        None => println!("tessdata:  built-in"),
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Run { cycles } => {
            let config = load_config(&config_path(cli))?;
            run_monitor(&config, *cycles)
        }
        Command::Once => {
            let config = load_config(&config_path(cli))?;
            run_single(&config)
        }
        // Helper commands need valid settings but not a live capture backend.
        Command::Regions => {
            print_regions(&read_config(&config_path(cli))?);
            Ok(())
        }
        Command::Parse { text, kind } => {
            let config = read_config(&config_path(cli))?;
            print_parse(text, (*kind).into(), &config.bounds);
            Ok(())
        }
        Command::Setup => run_setup(&read_config(&config_path(cli))?),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure output directories exist
    paths::ensure_directories()?;
    init_logging(cli.verbose)?;
    install_panic_hook();

    let result = run(&cli);
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
