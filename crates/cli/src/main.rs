mod config_commands;
mod demo_commands;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    tickwork_config::TickworkConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tickwork", about = "Recurring jobs on an expiring store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (defaults to ./tickwork.toml, then ~/.config/tickwork/).
    #[arg(long, global = true, env = "TICKWORK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a few sample jobs and let them tick.
    Demo {
        /// How long to run before stopping every job.
        #[arg(long, default_value_t = 15)]
        seconds: u64,
    },
    /// Arm sample jobs, then discard the store to exercise the recovery path.
    Teardown {
        /// Seconds to wait before tearing the store down.
        #[arg(long, default_value_t = 3)]
        after: u64,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit path wins; otherwise discover from standard locations.
fn load_config(path: Option<&Path>) -> anyhow::Result<TickworkConfig> {
    match path {
        Some(path) => Ok(tickwork_config::load_config(path)?),
        None => Ok(tickwork_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "tickwork starting");

    match cli.command {
        Commands::Demo { seconds } => {
            let config = load_config(cli.config.as_deref())?;
            demo_commands::run_demo(&config, seconds).await
        },
        Commands::Teardown { after } => {
            let config = load_config(cli.config.as_deref())?;
            demo_commands::run_teardown(&config, after).await
        },
        Commands::Config { action } => config_commands::handle_config(action, cli.config.as_deref()),
    }
}
