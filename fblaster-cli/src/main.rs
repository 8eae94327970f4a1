//! fblaster CLI - supervisor entry point
//!
//! Parses the operator's flags, resolves settings and either runs the
//! supervisor in the foreground or, with `--signal-poll`, pokes the
//! supervisor already running for the directory and exits.

mod error;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use error::CliError;
use fblaster::config::{RegistryCredentials, Settings, TrackedImages};
use fblaster::logging;
use fblaster::runtime::DockerRuntime;
use fblaster::signals;
use fblaster::supervisor::Supervisor;

#[derive(Debug, Parser)]
#[command(name = "fblaster")]
#[command(version = fblaster::VERSION)]
#[command(about = "Self-updating supervisor for docker-compose workloads", long_about = None)]
struct Cli {
    /// Tracked images, comma-separated (bare name or registry/image)
    #[arg(short = 'i', long, value_delimiter = ',')]
    images: Vec<String>,

    /// Per-registry credentials as 'registry:path' (repeatable); the file
    /// holds a single 'username:password' line
    #[arg(short = 'c', long = "credentials")]
    credentials: Vec<String>,

    /// Working directory containing docker-compose.yml
    #[arg(short = 'd', long)]
    directory: Option<PathBuf>,

    /// Graceful shutdown wait in seconds
    #[arg(short = 's', long, default_value_t = 10)]
    shutdown_timeout: u64,

    /// Registry poll period in seconds
    #[arg(short = 'I', long, default_value_t = 60)]
    poll_interval: u64,

    /// Update debounce window in seconds
    #[arg(short = 'D', long, default_value_t = 60)]
    debounce: u64,

    /// Container health poll period in seconds
    #[arg(short = 'H', long, default_value_t = 60)]
    health_check_interval: u64,

    /// Unhealthy duration in seconds before a service is restarted
    #[arg(short = 't', long, default_value_t = 60)]
    ill_health_tolerance: u64,

    /// Accept self-signed registry TLS certificates
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Send a poll signal to the supervisor running for this directory,
    /// then exit
    #[arg(short = 'S', long)]
    signal_poll: bool,
}

impl Cli {
    fn directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    fn settings(&self) -> Result<Settings, CliError> {
        let directory = self.directory();
        let credentials = RegistryCredentials::load(&directory, &self.credentials)?;
        Ok(Settings {
            directory,
            tracked: TrackedImages::new(&self.images),
            credentials,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            poll_interval: Duration::from_secs(self.poll_interval),
            debounce: Duration::from_secs(self.debounce),
            health_check_interval: Duration::from_secs(self.health_check_interval),
            ill_health_tolerance: Duration::from_secs(self.ill_health_tolerance),
            insecure: self.insecure,
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = if cli.signal_poll {
        run_signal_poll(&cli).await
    } else {
        run_supervisor(&cli).await
    };

    if let Err(e) = result {
        e.exit();
    }
}

/// Deliver a poke to the running peer and exit.
async fn run_signal_poll(cli: &Cli) -> Result<(), CliError> {
    let directory = cli.directory();
    let runtime = DockerRuntime::new(directory.clone());
    signals::send_poke(&runtime, &directory)
        .await
        .map_err(CliError::SignalPoll)?;
    println!("Poll signal delivered");
    Ok(())
}

/// Run the supervisor in the foreground until terminated.
async fn run_supervisor(cli: &Cli) -> Result<(), CliError> {
    let settings = cli.settings()?;

    let log_dir = settings.directory.join(logging::default_log_dir());
    let _guard = logging::init_logging(&log_dir, logging::default_log_file())
        .map_err(CliError::LoggingInit)?;

    tracing::info!(version = fblaster::VERSION, "fblaster starting");
    Supervisor::new(settings).run().await?;
    Ok(())
}
