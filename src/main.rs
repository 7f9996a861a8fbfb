use anyhow::Result;
use tracing::{debug, error, info};

use tokenkeeper::config::{Config, LogFormat};
use tokenkeeper::refresh;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    init_tracing(LogFormat::from_env());

    let config = Config::from_env()?;
    info!("tokenkeeper v{}", env!("CARGO_PKG_VERSION"));

    if let Some(interval) = config.run_interval {
        refresh::refresh_daemon(config, interval).await;
        return Ok(());
    }

    match refresh::run(&config).await {
        Ok(summary) => {
            debug!(summary = %serde_json::to_string(&summary)?, "Run summary");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Renewal run failed");
            Err(e.into())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tokenkeeper=info".into());

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
