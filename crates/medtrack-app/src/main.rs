// medtrack entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (log to file, not terminal)
// 3. Write default config if missing, then load it
// 4. Open database
// 5. Run the requested command

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use medtrack_app::cli::{self, Cli};
use medtrack_app::Tracker;
use medtrack_core::config;
use medtrack_core::db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let base_dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to read working directory")?,
    };

    init_tracing(&base_dir)?;
    info!("medtrack starting in {}", base_dir.display());

    let config = config::load_config(&base_dir).context("failed to load configuration")?;
    let db_path =
        config::resolve_db_path(&config, &base_dir).context("failed to resolve database path")?;

    let db = Database::open(&db_path).context("failed to open database")?;
    info!("Database opened at {}", db_path);

    let tracker = Arc::new(Tracker::new(db, config));
    let now = chrono::Local::now().naive_local();

    if let Err(e) = cli::execute(tracker, args, now).await {
        error!("command failed: {:#}", e);
        return Err(e);
    }
    info!("medtrack finished");
    Ok(())
}

/// Logs go to `logs/medtrack.log` under the base directory so command
/// output on stdout stays clean.
fn init_tracing(base_dir: &Path) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = base_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("medtrack.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("medtrack_app=info,medtrack_core=info,medtrack_adherence=info,warn")
        }))
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
