use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use fleet_scheduler::{config::SchedulerConfig, service::Service};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file")]
    config: Option<PathBuf>,
}

fn setup_tracing() {
    // RUST_LOG controls the logging level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::default()
            .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_path(path.to_str().unwrap_or_default())?,
        None => SchedulerConfig::default(),
    };
    config.validate()?;

    let service = Service::new(config)?;
    service.start().await
}
