use std::path::PathBuf;

use anyhow::{Context, Result};
use breathwatch::config::duration::{format_duration, parse_duration};
use breathwatch::{Relay, RelayConfig, RelayError};
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn,rumqttc=warn";

#[derive(Parser, Debug)]
#[command(name = "breathwatch")]
#[command(about = "Relay breath sensor telemetry from MQTT to MySQL and live viewers")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "BREATHWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker host (overrides bus.host)
    #[arg(short, long)]
    broker: Option<String>,

    /// MQTT broker port (overrides bus.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address for the viewer server, e.g. "0.0.0.0:3000"
    #[arg(short, long)]
    listen: Option<String>,

    /// Store URL (overrides store.url)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Shutdown grace period (e.g., "5s", "500ms")
    #[arg(long)]
    shutdown_grace: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let mut config = RelayConfig::load(args.config.as_deref())?;
    apply_overrides(&args, &mut config)?;
    config.validate()?;

    info!(
        broker = %config.bus.address(),
        listen = %config.viewers.listen,
        shutdown_grace = %format_duration(config.shutdown_grace),
        "Starting breathwatch"
    );

    let listen = config.viewers.listen.clone();
    let relay = Relay::connect(config).await?;
    let listener = TcpListener::bind(&listen)
        .await
        .map_err(|source| RelayError::Bind {
            addr: listen.clone(),
            source,
        })?;

    relay.start(Some(listener)).run_until_signal().await;
    info!("breathwatch stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Command-line flags take precedence over the file and environment.
fn apply_overrides(args: &Args, config: &mut RelayConfig) -> Result<()> {
    if let Some(host) = &args.broker {
        config.bus.host = host.clone();
    }
    if let Some(port) = args.port {
        config.bus.port = port;
    }
    if let Some(listen) = &args.listen {
        config.viewers.listen = listen.clone();
    }
    if let Some(url) = &args.database_url {
        config.store.url = url.clone();
    }
    if let Some(grace) = &args.shutdown_grace {
        config.shutdown_grace =
            parse_duration(grace).with_context(|| format!("invalid --shutdown-grace `{grace}`"))?;
    }
    Ok(())
}
