use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cache;
mod domain;
mod http;
mod ingest;
mod lifecycle;
mod messaging;
mod metrics;
mod models;
mod read;
mod settings;
mod store;
mod utils;

use lifecycle::Shutdown;
use settings::{LogFormat, LoggingSettings, Settings};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings.logging)?;

    let span = tracing::info_span!("order_cache");

    tracing::info!(
        parent: &span,
        db_host = %settings.database.host,
        db_port = settings.database.port,
        db_name = %settings.database.name,
        kafka_brokers = %settings.kafka.brokers.join(","),
        kafka_topic = %settings.kafka.topic,
        kafka_group_id = %settings.kafka.group_id,
        server_addr = %settings.server.addr,
        "Starting order cache service"
    );

    lifecycle::run(settings, Shutdown::new(), span).await?;
    Ok(())
}

// Default to `info,order_cache=debug`, overridable with RUST_LOG.
fn init_tracing(logging: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&logging.filter)?;

    match logging.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(true))
            .with(filter)
            .try_init()?,
    }
    Ok(())
}
