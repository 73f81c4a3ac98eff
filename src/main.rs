use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_relay::{
    config::Config,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "stream-relay")]
#[command(version)]
#[command(about = "Aggregates stream sources from many providers behind a signed relay")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Public base URL used when issuing relay URLs
    #[arg(short = 'b', long, value_name = "URL")]
    base_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("stream_relay={},tower_http=trace", cli.log_level)
    } else {
        format!("stream_relay={}", cli.log_level)
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Stream Relay v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.web.base_url = base_url;
        config.validate()?;
    }

    info!(
        providers = config.providers.iter().filter(|p| p.enabled).count(),
        base_url = %config.web.base_url,
        "Building services"
    );
    let state = AppState::from_config(config)?;
    let server = WebServer::new(state)?;

    info!("Web server starting on {}:{}", server.host(), server.port());
    server.serve().await?;

    info!("Stream Relay stopped");
    Ok(())
}
