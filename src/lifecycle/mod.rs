mod shutdown;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::Span;

use crate::cache::MemoryCache;
use crate::http::{ApiServer, AppState};
use crate::ingest::OrderIngestor;
use crate::messaging::{ClaimReport, ConsumerError, ConsumerState, MessageProcessor, OrderConsumer};
use crate::metrics::Metrics;
use crate::read::OrderQueryService;
use crate::settings::Settings;
use crate::store::{PgOrderStore, StoreError};
use crate::utils::{retry_with_backoff, RetryConfig};

pub use shutdown::Shutdown;

// ============================================================================
// Lifecycle Coordinator
// ============================================================================
//
// Startup, strictly in order:
//   1. metrics registry
//   2. connect the store (bounded retry, then fatal)
//   3. warm the cache (failure is logged, startup continues)
//   4. wire ingest → processor, join the consumer group (fatal)
//   5. bind the HTTP server (fatal)
//   6. supervise consumer + server under one Shutdown
//
// Stop: signal, subsystem exit, or an external trigger on the Shutdown.
// The server gets a bounded grace period; the consumer is awaited fully.
// The store pool is closed last.
//
// ============================================================================

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to create metrics registry")]
    Metrics(#[from] prometheus::Error),

    #[error("failed to connect to order store")]
    Store(#[from] StoreError),

    #[error("failed to start order consumer")]
    Consumer(#[from] ConsumerError),

    #[error("failed to bind HTTP server on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Runs the service until shutdown. Only startup failures are returned.
pub async fn run(settings: Settings, shutdown: Shutdown, span: Span) -> Result<(), LifecycleError> {
    let metrics = Arc::new(Metrics::new()?);

    let store = retry_with_backoff(
        &RetryConfig::conservative(),
        &span,
        "connect to order store",
        |_attempt| PgOrderStore::connect(&settings.database, span.clone()),
    )
    .await?;
    let store = Arc::new(store);

    let cache = Arc::new(MemoryCache::new(span.clone()));
    if let Err(e) = cache.load_all(store.as_ref()).await {
        metrics.record_store_failure("get_all_orders");
        tracing::error!(parent: &span, error = %e, "Failed to load cache from store, starting cold");
    }

    let ingestor = Arc::new(OrderIngestor::new(
        store.clone(),
        cache.clone(),
        metrics.clone(),
        span.clone(),
    ));
    let processor = Arc::new(MessageProcessor::new(ingestor, metrics.clone(), span.clone()));
    let (state_tx, mut consumer_state) = ConsumerState::channel();
    let state_span = span.clone();
    actix_web::rt::spawn(async move {
        tracing::debug!(parent: &state_span, state = ?*consumer_state.borrow(), "Consumer state");
        while consumer_state.changed().await.is_ok() {
            let state = *consumer_state.borrow_and_update();
            tracing::debug!(parent: &state_span, ?state, "Consumer state changed");
        }
    });

    let consumer = OrderConsumer::join(
        &settings.kafka,
        processor,
        metrics.clone(),
        state_tx,
        &shutdown,
        span.clone(),
    )?;

    let queries = Arc::new(OrderQueryService::new(
        cache.clone(),
        store.clone(),
        metrics.clone(),
        span.clone(),
    ));
    let state = AppState {
        queries,
        metrics: metrics.clone(),
        span: span.clone(),
    };
    let addr = settings.server.addr;
    let server = ApiServer::start(addr, settings.server.shutdown_grace, state, span.clone())
        .map_err(|source| LifecycleError::Bind { addr, source })?;

    let consumer = actix_web::rt::spawn(consumer.run(shutdown.clone()));
    supervise(server, consumer, shutdown, &span).await;

    store.close().await;
    tracing::info!(parent: &span, "Shutdown complete");
    Ok(())
}

/// Waits for the first stop condition, then stops the server and the
/// consumer concurrently. Errors while stopping are logged only.
async fn supervise(
    mut server: ApiServer,
    mut consumer: JoinHandle<Vec<ClaimReport>>,
    shutdown: Shutdown,
    span: &Span,
) {
    let mut consumer_finished = false;

    tokio::select! {
        _ = termination_signal(span) => {}
        _ = shutdown.cancelled() => {
            tracing::info!(parent: span, "Shutdown requested");
        }
        result = &mut consumer => {
            consumer_finished = true;
            match result {
                Ok(_) => tracing::warn!(parent: span, "Consumer exited before shutdown"),
                Err(e) => tracing::error!(parent: span, error = %e, "Consumer task failed"),
            }
        }
        result = server.exited() => match result {
            Ok(()) => tracing::warn!(parent: span, "HTTP server exited before shutdown"),
            Err(e) => tracing::error!(parent: span, error = %e, "HTTP server failed"),
        },
    }

    shutdown.trigger();

    let consumer_stopped = async {
        if consumer_finished {
            return;
        }
        match consumer.await {
            Ok(reports) => tracing::info!(parent: span, claims = reports.len(), "Consumer stopped"),
            Err(e) => tracing::error!(parent: span, error = %e, "Consumer task failed"),
        }
    };
    let (server_stopped, ()) = tokio::join!(server.stop(), consumer_stopped);

    if let Err(e) = server_stopped {
        tracing::error!(parent: span, error = %e, "HTTP server did not stop cleanly");
    }
}

#[cfg(unix)]
async fn termination_signal(span: &Span) {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!(parent: span, "Received SIGTERM"),
                _ = sigint.recv() => tracing::info!(parent: span, "Received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(parent: span, error = %e, "Failed to install signal handlers, using ctrl-c");
            ctrl_c(span).await;
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal(span: &Span) {
    ctrl_c(span).await;
}

async fn ctrl_c(span: &Span) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(parent: span, "Received ctrl-c"),
        Err(e) => {
            tracing::error!(parent: span, error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::store::testing::MemoryStore;

    fn server() -> ApiServer {
        let metrics = Arc::new(Metrics::new().unwrap());
        let queries = OrderQueryService::new(
            Arc::new(MemoryCache::new(Span::none())),
            Arc::new(MemoryStore::default()),
            metrics.clone(),
            Span::none(),
        );
        let state = AppState {
            queries: Arc::new(queries),
            metrics,
            span: Span::none(),
        };
        ApiServer::start(
            "127.0.0.1:0".parse().unwrap(),
            Duration::from_secs(2),
            state,
            Span::none(),
        )
        .unwrap()
    }

    #[actix_web::test]
    async fn test_external_trigger_stops_server_and_awaits_consumer() {
        let shutdown = Shutdown::new();
        let drained = Arc::new(AtomicBool::new(false));

        let consumer = {
            let shutdown = shutdown.clone();
            let drained = drained.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                drained.store(true, Ordering::SeqCst);
                Vec::new()
            })
        };

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            supervise(server(), consumer, shutdown, &Span::none()),
        )
        .await
        .expect("supervise should return after shutdown");

        assert!(drained.load(Ordering::SeqCst), "consumer was not awaited");
    }

    #[actix_web::test]
    async fn test_consumer_exit_triggers_shared_shutdown() {
        let shutdown = Shutdown::new();
        let consumer = tokio::spawn(async { Vec::new() });

        tokio::time::timeout(
            Duration::from_secs(5),
            supervise(server(), consumer, shutdown.clone(), &Span::none()),
        )
        .await
        .expect("supervise should return once the consumer exits");

        assert!(shutdown.is_triggered());
    }
}
