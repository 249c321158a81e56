//! Slotmeter - rolling per-slot means over a remote numeric source
//!
//! Polls a JSON endpoint (by default the ANU quantum random number API)
//! once per slot every cycle, folds each sample into that slot's rolling
//! mean, and logs the resulting label. The slot count can be changed while
//! running by typing on stdin.
//!
//! Exit codes:
//!   0 - Stopped normally (quit or Ctrl-C)
//!   1 - Startup error (invalid arguments, config, HTTP client)

mod aggregate;
mod cli;
mod config;
mod console;
mod error;
mod pool;
mod scheduler;
mod sink;
mod source;

use anyhow::{Context, Result};
use cli::Args;
use config::{Config, CONFIG_FILE_NAME};
use console::{parse_command, ConsoleCommand};
use scheduler::{Monitor, MonitorHandle};
use sink::LogSink;
use source::HttpSampleSource;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config is read before logging so its verbosity setting can apply
    let loaded = load_config(&args);
    if let (Err(e), Some(_)) = (&loaded, &args.config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    let mut config = match &loaded {
        Ok(Some((config, _))) => config.clone(),
        _ => Config::default(),
    };
    config.merge_with_args(&args);

    init_logging(&args, config.general.verbose);

    info!("Slotmeter v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    match loaded {
        Ok(Some((_, path))) => info!("Loaded config from {}", path.display()),
        Ok(None) => debug!("No config file found, using defaults"),
        Err(e) => warn!("Failed to load config: {:#}", e),
    }

    if let Err(e) = run(config).await {
        error!("Monitor failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .slotmeter.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the source URL, field, interval, and slot count.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn init_logging(args: &Args, verbose_config: bool) {
    let level = if !args.quiet && verbose_config {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from the explicit path or the default location.
fn load_config(args: &Args) -> Result<Option<(Config, PathBuf)>> {
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok(Some((config, config_path.clone())));
    }

    Ok(Config::load_default()?.map(|config| (config, PathBuf::from(CONFIG_FILE_NAME))))
}

/// Start the monitor and serve console commands until quit or Ctrl-C.
async fn run(config: Config) -> Result<()> {
    let source = HttpSampleSource::new(&config.source).context("Failed to create HTTP client")?;

    println!("📡 Source: {}", source.url());
    println!("   Field: {}", config.source.field);
    println!("   Slots: {}", config.scheduler.initial_slots);
    println!("   Interval: {}ms", config.scheduler.interval_ms);
    println!("   Type a number to change the slot count, 'status' or 'quit'.");

    let slots = config.scheduler.initial_slots;
    let (monitor, handle) = Monitor::new(source, LogSink::new(slots), slots);
    let monitor_task = tokio::spawn(monitor.with_interval(config.scheduler.interval()).run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }

            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    debug!("stdin closed; running until Ctrl-C");
                    stdin_open = false;
                    continue;
                };

                if !handle_console_line(&handle, &line).await {
                    break;
                }
            }
        }
    }

    // The monitor may already be gone; either way we are done with it.
    let _ = handle.shutdown().await;
    monitor_task.await.context("Monitor task panicked")?;

    println!("\n✅ Stopped.");
    Ok(())
}

/// Act on one console line. Returns false when the user asked to quit.
async fn handle_console_line(handle: &MonitorHandle, line: &str) -> bool {
    match parse_command(line) {
        ConsoleCommand::SetSlots(n) => match handle.set_slot_count(n).await {
            Ok(()) => println!("🔁 Slot count set to {}", n),
            Err(e) => println!("❌ {}", e),
        },
        ConsoleCommand::Status => match handle.snapshot().await {
            Ok(snapshot) => print_status(&snapshot),
            Err(e) => println!("❌ {}", e),
        },
        ConsoleCommand::Quit => return false,
        ConsoleCommand::Empty => {}
        ConsoleCommand::Unknown(input) => {
            println!("❓ Unknown command '{}'. Try a number, 'status' or 'quit'.", input)
        }
    }
    true
}

fn print_status(snapshot: &scheduler::MonitorSnapshot) {
    println!("\n📊 Monitor Status:");
    println!("   State: {:?}", snapshot.state);
    if let Some(cycle) = snapshot.cycle {
        println!(
            "   Cycle: {} ({}/{} settled)",
            cycle, snapshot.settled, snapshot.total
        );
    }
    println!("   Cycles completed: {}", snapshot.cycles_completed);
    println!("   Requests in flight: {}", snapshot.in_flight);
    for slot in &snapshot.slots {
        let value = slot
            .value
            .map(|v| format!("{:.2}", v))
            .unwrap_or_else(|| "loading..".to_string());
        let marker = if slot.pending { " (pending)" } else { "" };
        println!("   - slot {:>3}: {}{}", slot.index, value, marker);
    }
}
