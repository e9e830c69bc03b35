use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vigil::{config::AppConfig, supervisor::Supervisor, tailer::FileTailer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory containing app.yaml.
    #[arg(long, default_value = "configs")]
    config_dir: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    let subscriber =
        FmtSubscriber::builder().with_env_filter(EnvFilter::from_default_env()).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();

    tracing::debug!("Loading application configuration...");
    let config = AppConfig::new(Some(&cli.config_dir))?;
    config.validate()?;
    tracing::debug!(
        log_file = %config.log_file.display(),
        bucket_duration = ?config.bucket_duration_secs,
        "Configuration loaded."
    );

    // Opening the log file is the startup check: a missing or unreadable file
    // is fatal before any task starts.
    let tailer = FileTailer::open(&config.log_file, config.poll_interval_ms).await?;
    tracing::info!(log_file = %config.log_file.display(), "Tailing from end of file.");

    let supervisor = Supervisor::builder().config(config).source(Box::new(tailer)).build()?;

    tracing::info!("Supervisor initialized, starting monitor...");
    supervisor.run().await?;

    Ok(())
}
