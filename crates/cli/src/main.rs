mod activity;
mod app;
mod rules_commands;
mod sessions_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use app::App;

#[derive(Parser)]
#[command(name = "telefeed", about = "Telefeed: mirror Telegram channels by rule", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of searching the standard locations.
    #[arg(long, global = true, env = "TELEFEED_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for rules, sessions and the mapping database.
    #[arg(long, global = true, env = "TELEFEED_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore sessions and forward messages until interrupted (default).
    Run {
        /// Append every forward, edit, delete and failure to
        /// `activity.jsonl` in the data directory.
        #[arg(long, default_value_t = false)]
        activity_log: bool,
    },
    /// Redirection rule management.
    Rules {
        #[command(subcommand)]
        action: rules_commands::RuleAction,
    },
    /// Account session management.
    Sessions {
        #[command(subcommand)]
        action: sessions_commands::SessionAction,
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "telefeed starting");

    let app = App::load(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        None => app::run(app, false).await,
        Some(Commands::Run { activity_log }) => app::run(app, activity_log).await,
        Some(Commands::Rules { action }) => rules_commands::handle_rules(&app, action).await,
        Some(Commands::Sessions { action }) => {
            sessions_commands::handle_sessions(&app, action).await
        },
    }
}
