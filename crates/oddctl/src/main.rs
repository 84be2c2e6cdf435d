//! oddctl - remote controller for a running oddball engine
//!
//! Blocking REQ side of the hold/continue protocol: one request at a time,
//! each answered with "ACK" by the engine.
//!
//! Subcommands:
//! - `oddctl hold` - pause the engine at its current trial
//! - `oddctl continue` - resume the held trial
//! - `oddctl pause-for <secs>` - hold, wait, continue

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use oddconf::OddballConfig;

#[derive(Parser)]
#[command(name = "oddctl")]
#[command(about = "Remote hold/continue controller for the oddball engine")]
#[command(version)]
struct Cli {
    /// Engine endpoint (defaults to the configured remote endpoint)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Config file (overrides ./oddball.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reply timeout in milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pause the engine at its current trial
    Hold,

    /// Resume the held trial
    #[command(name = "continue")]
    Continue,

    /// Hold, wait the given number of seconds, then continue
    PauseFor {
        /// Seconds to stay held
        secs: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let endpoint = match cli.endpoint {
        Some(endpoint) => endpoint,
        None => OddballConfig::load_from(cli.config.as_deref())?.remote.endpoint,
    };

    let controller = Controller::connect(&endpoint, cli.timeout)?;
    match cli.command {
        Commands::Hold => controller.request("hold")?,
        Commands::Continue => controller.request("continue")?,
        Commands::PauseFor { secs } => {
            controller.request("hold")?;
            info!(secs, "holding");
            std::thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
            controller.request("continue")?;
        }
    }
    Ok(())
}

struct Controller {
    // Context must outlive the socket.
    _context: zmq::Context,
    socket: zmq::Socket,
    endpoint: String,
}

impl Controller {
    fn connect(endpoint: &str, timeout_ms: i32) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::REQ)
            .context("failed to create REQ socket")?;
        socket.set_linger(0).context("failed to set LINGER")?;
        socket
            .set_rcvtimeo(timeout_ms)
            .context("failed to set receive timeout")?;
        socket
            .connect(endpoint)
            .with_context(|| format!("failed to connect to {endpoint}"))?;
        Ok(Self {
            _context: context,
            socket,
            endpoint: endpoint.to_string(),
        })
    }

    /// Send one request and wait for the engine's acknowledgment.
    fn request(&self, action: &str) -> Result<()> {
        self.socket
            .send(action, 0)
            .with_context(|| format!("failed to send {action:?}"))?;
        let reply = self
            .socket
            .recv_string(0)
            .with_context(|| {
                format!(
                    "no reply from {} - is the engine running?",
                    self.endpoint
                )
            })?
            .map_err(|_| anyhow::anyhow!("non-UTF-8 reply from the engine"))?;
        if reply != "ACK" {
            bail!("unexpected reply {reply:?}");
        }
        info!(action, reply, "acknowledged");
        println!("engine reply: {reply}");
        Ok(())
    }
}
