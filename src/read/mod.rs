use std::sync::Arc;

use tracing::Span;

use crate::cache::OrderCache;
use crate::domain::{OrderError, ValidationError};
use crate::metrics::Metrics;
use crate::models::Order;
use crate::store::OrderStore;

// ============================================================================
// Order Query Service - cache-aside read path
// ============================================================================
//
//   cache hit  → return, store untouched
//   cache miss → store hit  → populate cache, return
//              → store miss → NotFound (absent ids are never cached)
//
// ============================================================================

pub struct OrderQueryService {
    cache: Arc<dyn OrderCache>,
    store: Arc<dyn OrderStore>,
    metrics: Arc<Metrics>,
    span: Span,
}

impl OrderQueryService {
    pub fn new(
        cache: Arc<dyn OrderCache>,
        store: Arc<dyn OrderStore>,
        metrics: Arc<Metrics>,
        span: Span,
    ) -> Self {
        Self {
            cache,
            store,
            metrics,
            span,
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.size()
    }

    pub async fn get_order(&self, order_uid: &str) -> Result<Arc<Order>, OrderError> {
        if order_uid.is_empty() {
            return Err(ValidationError::EmptyOrderUid.into());
        }

        if let Some(order) = self.cache.get(order_uid) {
            self.metrics.record_cache_lookup(true);
            return Ok(order);
        }
        self.metrics.record_cache_lookup(false);

        tracing::debug!(
            parent: &self.span,
            order_uid,
            "Order not in cache, fetching from store"
        );

        let fetched = match self.store.get_order(order_uid).await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.metrics.record_store_failure("get_order");
                tracing::error!(
                    parent: &self.span,
                    error = %e,
                    order_uid,
                    "Failed to get order from store"
                );
                return Err(e.into());
            }
        };

        match fetched {
            Some(order) => {
                self.metrics.record_store_lookup("hit");
                let order = Arc::new(order);
                self.cache.set(order_uid, order.clone());
                Ok(order)
            }
            None => {
                self.metrics.record_store_lookup("miss");
                Err(OrderError::not_found(order_uid))
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
