//! sensor-window CLI
//!
//! Thermal and light reading ingestion with retention and a sliding window.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::Receiver;
use sensor_window::{
    config::{horizon, Config},
    core::read_buffer,
    create_shared_buffer, create_shared_store,
    source::available_ports,
    stats::{create_shared_log_with_persistence, IngestLog},
    BaudRate, Channel, EventBus, Mode, PipelineEvent, RetentionRecord, RetentionStore, Scheduler,
    SharedStore, SourceArbiter, SyntheticGenerator, Timings, WindowBuffer, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sensor-window")]
#[command(version = VERSION)]
#[command(about = "Thermal/light sensor ingestion with retention and a sliding window", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start ingesting readings
    Run(RunArgs),

    /// List serial ports and supported baud rates
    Ports,

    /// Print or export recently stored readings
    Recent {
        /// How many minutes back to look
        #[arg(long, default_value = "10")]
        minutes: i64,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Delete stored readings older than the retention horizon
    Purge {
        /// Override the configured retention horizon
        #[arg(long)]
        minutes: Option<i64>,
    },

    /// Show configuration, store size and cumulative statistics
    Status,

    /// Show configuration
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Producer to start with
    #[arg(long)]
    mode: Option<Mode>,

    /// Serial port to connect to
    #[arg(long)]
    port: Option<String>,

    /// Baud rate (9600, 19200, 38400, 57600 or 115200)
    #[arg(long)]
    baud: Option<BaudRate>,

    /// SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Width of the display window
    #[arg(long)]
    window_minutes: Option<i64>,

    /// Age after which stored readings are purged
    #[arg(long)]
    retention_minutes: Option<i64>,

    /// Run without durable storage
    #[arg(long)]
    no_store: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Jsonl,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Ports => cmd_ports(),
        Commands::Recent {
            minutes,
            format,
            output,
        } => cmd_recent(minutes, format, output),
        Commands::Purge { minutes } => cmd_purge(minutes),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(port) = args.port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(minutes) = args.window_minutes {
        config.window_minutes = minutes;
    }
    if let Some(minutes) = args.retention_minutes {
        config.retention_minutes = minutes;
    }
    config.validate().context("invalid settings")?;

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("sensor-window v{VERSION}");
    println!();
    println!("  Mode: {}", config.mode);
    println!("  Window: {} min", config.window_minutes);
    println!("  Retention: {} min", config.retention_minutes);

    let stats = create_shared_log_with_persistence(config.stats_path());

    let store = if args.no_store {
        println!("  Storage: disabled");
        None
    } else {
        match open_store(&config) {
            Ok(store) => {
                println!("  Storage: {}", config.db_path.display());
                Some(store)
            }
            Err(e) if config.storage_required => return Err(e),
            Err(e) => {
                warn!(error = %e, "continuing without durable storage");
                eprintln!("Warning: {e:#}");
                eprintln!("Continuing without durable storage.");
                None
            }
        }
    };

    let buffer = create_shared_buffer(WindowBuffer::new(config.window_minutes));
    let events = EventBus::new();
    let display = events.subscribe();

    let generator = SyntheticGenerator::new(config.generate_interval);
    let mut arbiter = SourceArbiter::new(generator, events, stats.clone());
    if let Some(store) = &store {
        arbiter.add_sink(store.clone());
    }
    arbiter.add_sink(buffer.clone());
    arbiter
        .set_mode(config.mode)
        .context("starting synthetic generator")?;

    let printer = thread::Builder::new()
        .name("reading-printer".into())
        .spawn(move || print_events(display))
        .context("spawning output thread")?;

    match &config.serial.port {
        Some(port) => {
            if let Err(e) = arbiter.connect(port, config.serial.baud_rate) {
                eprintln!("Warning: {e}");
            }
        }
        None => {
            println!();
            println!("No serial port configured. Use --port or `sensor-window ports`.");
        }
    }

    let mut scheduler = Scheduler::new(
        arbiter,
        buffer.clone(),
        store,
        stats.clone(),
        Timings::from(&config),
    );
    let seeded = scheduler.seed_window();
    println!("  Window seeded with {seeded} stored readings");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    scheduler.run(&running);

    println!();
    println!("Stopping...");
    scheduler.shutdown();
    drop(scheduler);
    if printer.join().is_err() {
        eprintln!("Warning: output thread panicked");
    }

    let window = read_buffer(&buffer);
    println!("Window holds {} readings", window.len());
    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Print readings and link status until the bus goes away.
fn print_events(events: Receiver<PipelineEvent>) {
    for event in events {
        match event {
            PipelineEvent::Reading(reading) => println!(
                "[{}] thermal: {} | light: {}",
                reading.timestamp.format("%H:%M:%S"),
                reading.thermal_state().label(),
                reading.light
            ),
            PipelineEvent::Status(status) => println!("[status] {}", status.message),
        }
    }
}

fn cmd_ports() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Serial ports:");
        for port in ports {
            println!("  {port}");
        }
    }

    println!();
    let rates: Vec<String> = BaudRate::ALL.iter().map(ToString::to_string).collect();
    println!(
        "Supported baud rates: {} (default {})",
        rates.join(", "),
        BaudRate::default()
    );
    Ok(())
}

fn cmd_recent(minutes: i64, format: OutputFormat, output: Option<PathBuf>) -> Result<()> {
    let max_age = horizon("--minutes", minutes)?;
    let config = Config::load().context("loading configuration")?;
    let store = open_existing_store(&config)?;
    let records = store
        .query_recent(max_age)
        .context("querying stored readings")?;

    let rendered = render_records(&records, format)?;
    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Exported {} readings to {}", records.len(), path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn render_records(records: &[RetentionRecord], format: OutputFormat) -> Result<String> {
    let rendered = match format {
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(records)?;
            json.push('\n');
            json
        }
        OutputFormat::Jsonl => {
            let mut lines = String::new();
            for record in records {
                lines.push_str(&serde_json::to_string(record)?);
                lines.push('\n');
            }
            lines
        }
        OutputFormat::Table => {
            let mut table = format!(
                "{:<8} {:<24} {:<12} {}\n",
                "id", "timestamp", "thermal", "light"
            );
            for record in records {
                let reading = record.reading();
                table.push_str(&format!(
                    "{:<8} {:<24} {:<12} {}\n",
                    record.id,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                    reading.thermal_state().label(),
                    reading.value(Channel::Light)
                ));
            }
            table
        }
    };
    Ok(rendered)
}

fn cmd_purge(minutes: Option<i64>) -> Result<()> {
    let config = Config::load().context("loading configuration")?;
    let minutes = minutes.unwrap_or(config.retention_minutes);
    let max_age = horizon("--minutes", minutes)?;

    let store = open_existing_store(&config)?;
    let removed = store
        .purge_older_than(max_age)
        .context("purging stored readings")?;

    let stats = IngestLog::with_persistence(config.stats_path());
    stats.record_purged(removed as u64);
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save ingest stats: {e}");
    }

    println!("Purged {removed} readings older than {minutes} minutes.");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("sensor-window Status");
    println!("====================");
    println!();
    println!("Configuration:");
    println!("  Mode: {}", config.mode);
    println!(
        "  Serial port: {} @ {} baud",
        config.serial.port.as_deref().unwrap_or("(none)"),
        config.serial.baud_rate
    );
    println!("  Window: {} min", config.window_minutes);
    println!("  Retention: {} min", config.retention_minutes);
    println!();

    if config.db_path.exists() {
        let store = RetentionStore::open(&config.db_path)
            .with_context(|| format!("opening {}", config.db_path.display()))?;
        println!("Store: {}", config.db_path.display());
        println!("  Stored readings: {}", store.count()?);
        if let Some(latest) = store
            .query_recent(config.retention())?
            .last()
            .map(RetentionRecord::reading)
        {
            println!(
                "  Latest: thermal {} | light {} at {}",
                latest.thermal_state().label(),
                latest.light,
                latest.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
    } else {
        println!("No store found at {}", config.db_path.display());
    }
    println!();

    if config.stats_path().exists() {
        let stats = IngestLog::with_persistence(config.stats_path()).stats();
        println!("Cumulative Statistics:");
        println!("  Readings forwarded: {}", stats.readings_forwarded);
        println!("  Readings discarded: {}", stats.readings_discarded);
        println!("  Malformed lines: {}", stats.malformed_lines);
        println!("  Delivery failures: {}", stats.delivery_failures);
        println!("  Link disconnects: {}", stats.disconnects);
        println!("  Records purged: {}", stats.records_purged);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().context("loading configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn open_store(config: &Config) -> Result<SharedStore> {
    let store = RetentionStore::open(&config.db_path)
        .with_context(|| format!("opening store at {}", config.db_path.display()))?;
    Ok(create_shared_store(store))
}

fn open_existing_store(config: &Config) -> Result<RetentionStore> {
    if !config.db_path.exists() {
        bail!(
            "no store at {}; run `sensor-window run` first",
            config.db_path.display()
        );
    }
    RetentionStore::open(&config.db_path)
        .with_context(|| format!("opening store at {}", config.db_path.display()))
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
