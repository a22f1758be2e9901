use std::sync::Arc;

use clap::Parser;
use focusrelay_lib::{config::Settings, liveness, router, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "focusrelay", about = "Meeting presence and focus-broadcast relay")]
struct Args {
    /// Path to the config file
    #[arg(long, default_value = "focusrelay.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Settings first: the log level default comes from config.
    let settings = Settings::load_from(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let addr = settings.bind_addr;
    let state = Arc::new(AppState::new(settings));

    liveness::spawn(state.clone());
    let app = router::create_router(state);

    // Only unrecoverable startup errors (bad config, port in use) may
    // terminate the process; client misbehavior never does.
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "focusrelay listening");
    axum::serve(listener, app).await?;

    Ok(())
}
