use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use clip_relay::lifecycle::{signals, startup, Application, Shutdown};
use clip_relay::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "clip-relay")]
#[command(about = "Relay processed soundboard audio from the audio processor to HTTP clients")]
struct Args {
    /// Path to a TOML configuration file. Defaults and environment apply without one.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = startup::load_configuration(args.config.as_deref())?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "clip-relay starting"
    );

    let app = Application::build(config).await?;
    tracing::info!(address = %app.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_listener(Arc::clone(&shutdown));

    app.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
