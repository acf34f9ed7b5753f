use std::fs::File;
use std::process;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use mjpeg_relay::config::RelayConfig;
use mjpeg_relay::pipeline::write_session_description;
use mjpeg_relay::relay::ConnectionManager;
use mjpeg_relay::server::{self, AppState};

#[tokio::main]
async fn main() {
    let config = Arc::new(RelayConfig::from_env());

    // All diagnostics go to the log file; stdout keeps the one startup line.
    let log_file = match File::create(&config.log_file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to create log file {}: {e}", config.log_file.display());
            process::exit(1);
        }
    };
    let (writer, _guard) = tracing_appender::non_blocking(log_file);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .with_ansi(false)
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("PANIC: {info}");
    }));

    println!("mjpeg-relay listening on port {}", config.http_port);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "fatal");
        process::exit(1);
    }
}

async fn run(config: Arc<RelayConfig>) -> mjpeg_relay::Result<()> {
    let session_file = write_session_description(&config)?;
    tracing::info!(path = %session_file.display(), "session description written");

    let manager = ConnectionManager::with_mailbox_capacity(config.mailbox_capacity);
    server::serve(AppState { manager, config }).await
}
