use std::sync::Arc;

use async_trait::async_trait;
use chrono::SubsecRound;
use tracing::Span;

use crate::cache::OrderCache;
use crate::domain::OrderError;
use crate::metrics::Metrics;
use crate::models::Order;
use crate::store::OrderStore;

// ============================================================================
// Order Ingest - the write path
// ============================================================================
//
// Orchestrates: validated Order → durable store → cache
//
// The store write must succeed before the cache is touched, so a cached entry
// is never ahead of what has been persisted.
//
// ============================================================================

/// Receives every validated order pulled off the stream.
#[async_trait]
pub trait OrderHandler: Send + Sync + 'static {
    async fn handle(&self, order: Order) -> Result<(), OrderError>;
}

pub struct OrderIngestor {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
    metrics: Arc<Metrics>,
    span: Span,
}

impl OrderIngestor {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn OrderCache>,
        metrics: Arc<Metrics>,
        span: Span,
    ) -> Self {
        Self {
            store,
            cache,
            metrics,
            span,
        }
    }
}

#[async_trait]
impl OrderHandler for OrderIngestor {
    async fn handle(&self, mut order: Order) -> Result<(), OrderError> {
        // The store keeps microseconds; the cached copy must match a reload.
        order.date_created = order.date_created.trunc_subsecs(6);

        if let Err(e) = self.store.save_order(&order).await {
            self.metrics.record_store_failure("save_order");
            tracing::error!(
                parent: &self.span,
                error = %e,
                order_uid = %order.order_uid,
                "Failed to save order to store"
            );
            return Err(e.into());
        }

        let order_uid = order.order_uid.clone();
        self.cache.set(&order_uid, Arc::new(order));
        self.metrics.orders_persisted.inc();

        tracing::info!(parent: &self.span, order_uid = %order_uid, "Order handled successfully");
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
