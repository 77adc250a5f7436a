//! Heart Rate Watch
//!
//! Connects to the first heart rate sensor in range (or the one named in the
//! configuration) and logs every reading until Ctrl-C. Stalled connections
//! are re-established automatically.

use anyhow::Result;
use env_logger::Env;
use hr_watch::components::{application::Application, bluetooth::BluetoothTransport};
use hr_watch::core::{config::Config, logging::open_sink};
use log::error;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Main entry point of the application.
///
/// Initializes logging and configuration, then runs the application on a
/// Tokio runtime until interrupted.
fn main() -> Result<()> {
    // Initialize logger with environment-specific settings.
    env_logger::Builder::from_env(
        Env::default()
            .filter_or("HR_WATCH_LOG", "info")
            .write_style_or("HR_WATCH_LOG_STYLE", "always"),
    )
    .init();

    let config = Config::from_env()?;
    let sink = open_sink(&config)?;

    // Create a new Tokio runtime for asynchronous operations.
    let rt = Runtime::new()?;
    rt.block_on(async move {
        let transport =
            Arc::new(BluetoothTransport::with_default_adapter(config.scan_window()).await?);
        let app = Application::new(transport, config);
        app.run(sink, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("could not listen for Ctrl-C: {}", e);
            }
        })
        .await
    })
}
