//! oddball - stimulus engine CLI
//!
//! Subcommands:
//! - `oddball run --condition <name>` - run a condition's trial list
//! - `oddball check --condition <name>` - validate a trial list without running
//! - `oddball forward-force --ip <addr> --port <port>` - stream force readings

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use oddball::{
    list_novel_sounds, parse_trial_list, ForceForwarder, LineSensor, MockTrigger, NullPlayer,
    ParallelPortTrigger, RemoteControl, SoundBank, TriggerDevice, TrialScheduler,
};
use oddconf::OddballConfig;

#[derive(Parser)]
#[command(name = "oddball")]
#[command(about = "Auditory oddball stimulus engine")]
#[command(version)]
struct Cli {
    /// Config file (overrides ./oddball.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a condition's trial list
    Run {
        /// Condition name, selects <trial_lists>/<name>.txt
        #[arg(long)]
        condition: String,

        /// Use a mock trigger instead of the parallel-port hardware
        #[arg(long)]
        mock: bool,
    },

    /// Parse and validate a condition's trial list, then exit
    Check {
        /// Condition name, selects <trial_lists>/<name>.txt
        #[arg(long)]
        condition: String,
    },

    /// Stream force-sensor readings to a UDP endpoint
    ForwardForce {
        /// IP address of the receiving peer
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        /// Port of the receiving peer
        #[arg(long, default_value = "8055")]
        port: u16,

        /// File or FIFO providing ASCII voltage ratios, one per line
        #[arg(long)]
        sensor: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = OddballConfig::load_from(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { condition, mock } => run(&config, &condition, mock),
        Commands::Check { condition } => check(&config, &condition),
        Commands::ForwardForce { ip, port, sensor } => forward_force(&config, &ip, port, &sensor),
    }
}

fn run(config: &OddballConfig, condition: &str, mock: bool) -> Result<()> {
    info!("oddball {} starting", env!("CARGO_PKG_VERSION"));
    let trials = load_condition(config, condition)?;

    // load-time validation of every stimulus file the list references
    let bank = SoundBank::load(&config.paths.sounds, &trials, config.audio.sample_rate)?;
    info!(sounds = bank.len(), "stimulus bank validated");

    let trigger: Box<dyn TriggerDevice> = if mock {
        Box::new(MockTrigger)
    } else {
        Box::new(ParallelPortTrigger::open(&config.triggers.address)?)
    };
    let remote = RemoteControl::bind(&config.remote.endpoint)?;

    let mut scheduler = TrialScheduler::new(
        config,
        &trials,
        remote,
        Box::new(NullPlayer),
        trigger,
    )?;

    prompt(">>> Press ENTER to start.")?;
    scheduler.start();
    scheduler.run()?;
    info!(responses = scheduler.responses().len(), "run complete");
    prompt(">>> Press ENTER to continue and close.")?;
    Ok(())
}

fn check(config: &OddballConfig, condition: &str) -> Result<()> {
    let trials = load_condition(config, condition)?;
    println!("trial list OK: {} entries, last index {}", trials.len(), trials.last_index());
    Ok(())
}

fn forward_force(config: &OddballConfig, ip: &str, port: u16, sensor_path: &std::path::Path) -> Result<()> {
    let mut sensor = LineSensor::new(sensor_path);
    let mut forwarder = ForceForwarder::new(&config.force, ip, port)?;

    // runs until the sensor source is exhausted (the producer closing its
    // pipe is the stop signal)
    let running = AtomicBool::new(true);
    let sent = forwarder.run(&mut sensor, &running)?;
    info!(sent, "forwarding finished");
    Ok(())
}

/// Resolve and parse `<trial_lists>/<condition>.txt`, listing the available
/// conditions when the name is unknown.
fn load_condition(config: &OddballConfig, condition: &str) -> Result<oddball::TrialList> {
    let dir = &config.paths.trial_lists;
    let path = dir.join(format!("{condition}.txt"));
    if !path.is_file() {
        let available = list_conditions(dir);
        bail!(
            "unknown condition {condition:?}, available: {}",
            if available.is_empty() {
                format!("none (no .txt files in {})", dir.display())
            } else {
                available.join(", ")
            }
        );
    }
    let vocabulary = list_novel_sounds(&config.paths.sounds)?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read trial list {}", path.display()))?;
    let trials = parse_trial_list(&text, &vocabulary)
        .with_context(|| format!("invalid trial list {}", path.display()))?;
    Ok(trials)
}

fn list_conditions(dir: &std::path::Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut conditions: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            } else {
                None
            }
        })
        .collect();
    conditions.sort();
    conditions
}

fn prompt(message: &str) -> Result<()> {
    print!("{message} ");
    std::io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(())
}
