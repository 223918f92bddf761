use clap::Parser;
use ecowatt_server::{api, AppConfig, AppState};
use ecowatt_telemetry::{FlushSink, Flusher, HttpSink, NullSink};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    tracing::info!(config = %args.config, "Starting EcoWatt cloud endpoint");

    let state = Arc::new(AppState::new());

    let sink: Arc<dyn FlushSink> = if config.sink.enabled {
        Arc::new(HttpSink::new(&config.sink.url, config.sink.timeout_secs)?)
    } else {
        Arc::new(NullSink)
    };

    let flusher = Arc::new(Flusher::new(
        state.store.clone(),
        state.log.clone(),
        sink,
        config.telemetry.debounce_secs,
        config.telemetry.tick_secs,
    ));
    flusher.start();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(addr = %addr, "Listening");

    axum::Server::bind(&addr)
        .serve(api::create_router(state).into_make_service())
        .await?;

    Ok(())
}
