use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ghsetup_auth::config::DEFAULT_CONFIG_FILE;
use ghsetup_auth::SetupConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

mod commands;
mod setup_ui;

use commands::app::AppArgs;

#[derive(Parser)]
#[command(
    name = "ghsetup",
    version,
    about = "Register a GitHub App from a manifest and store its credentials as repository secrets"
)]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, help = "YAML config file (missing file means defaults)")]
    config: PathBuf,

    #[arg(long, help = "Repository that receives the secrets, as OWNER/REPO")]
    repo: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the GitHub App and add APP_ID / APP_PRIVATE_KEY secrets")]
    App(AppArgs),
    #[command(about = "Store the gh token as GH_MODELS_TOKEN after checking GitHub Models access")]
    Models,
    #[command(about = "Print the app manifest without starting a flow")]
    Manifest,
}

fn expand_home(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(path.strip_prefix("~").unwrap_or(path));
        }
    }
    path.to_path_buf()
}

fn load_config(cli: &Cli) -> Result<SetupConfig> {
    let mut config = SetupConfig::load(&cli.config)?;
    if let Some(repo) = &cli.repo {
        config.secrets.repo = Some(repo.clone());
    }
    if let Commands::App(args) = &cli.command {
        args.apply(&mut config);
    }
    config.state_dir = expand_home(&config.state_dir);
    config.validate()?;
    Ok(config)
}

fn init_logging(state_dir: &Path) -> Result<WorkerGuard> {
    let log_dir = state_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ghsetup.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("info")),
        )
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _guard = init_logging(&config.state_dir)?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match &cli.command {
        Commands::App(args) => commands::app::run_app(&config, args).await?,
        Commands::Models => commands::models::run_models(&config).await?,
        Commands::Manifest => commands::manifest::print_manifest(&config)?,
    }
    Ok(())
}
