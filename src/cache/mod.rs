// ============================================================================
// Order Cache - in-memory mirror of the durable store
// ============================================================================
//
// One RwLock guards the whole map: any number of readers or one writer.
// Entries are `Arc<Order>`, so readers and snapshots share the validated
// value instead of copying it, and nobody can mutate a cached order in place.
//
// No TTL and no eviction: the map is warmed once from the full store scan
// and then only grows with distinct order UIDs.
//
// ============================================================================

mod lock;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::Span;

use crate::models::Order;
use crate::store::{OrderStore, StoreError};

use lock::{rw_read, rw_write};

pub trait OrderCache: Send + Sync + 'static {
    /// Insert or overwrite the entry for `order_uid`.
    fn set(&self, order_uid: &str, order: Arc<Order>);

    fn get(&self, order_uid: &str) -> Option<Arc<Order>>;

    /// Administrative removal. Returns whether an entry existed.
    fn delete(&self, order_uid: &str) -> bool;

    /// Administrative wipe of every entry.
    fn clear(&self);

    fn size(&self) -> usize;

    /// Independent point-in-time copy of every entry.
    fn snapshot(&self) -> HashMap<String, Arc<Order>>;
}

pub struct MemoryCache {
    orders: RwLock<HashMap<String, Arc<Order>>>,
    span: Span,
}

impl MemoryCache {
    pub fn new(span: Span) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            span,
        }
    }

    /// Bulk-populate from the store's full scan.
    ///
    /// The scan runs before the write lock is taken; all entries are then
    /// inserted under a single exclusive section so readers see either none
    /// or all of them.
    pub async fn load_all(&self, source: &dyn OrderStore) -> Result<usize, StoreError> {
        tracing::info!(parent: &self.span, "Loading orders from store into cache...");

        let orders = source.get_all_orders().await?;
        let count = orders.len();

        {
            let mut map = rw_write(&self.orders, "load_all");
            for order in orders {
                map.insert(order.order_uid.clone(), Arc::new(order));
            }
        }

        tracing::info!(parent: &self.span, count, "Loaded orders into cache");
        Ok(count)
    }
}

impl OrderCache for MemoryCache {
    fn set(&self, order_uid: &str, order: Arc<Order>) {
        rw_write(&self.orders, "set").insert(order_uid.to_string(), order);
        tracing::debug!(parent: &self.span, order_uid, "Order added to cache");
    }

    fn get(&self, order_uid: &str) -> Option<Arc<Order>> {
        let found = rw_read(&self.orders, "get").get(order_uid).cloned();
        tracing::debug!(parent: &self.span, order_uid, hit = found.is_some(), "Cache lookup");
        found
    }

    fn delete(&self, order_uid: &str) -> bool {
        let removed = rw_write(&self.orders, "delete").remove(order_uid).is_some();
        tracing::debug!(parent: &self.span, order_uid, removed, "Order deleted from cache");
        removed
    }

    fn clear(&self) {
        rw_write(&self.orders, "clear").clear();
        tracing::debug!(parent: &self.span, "Cache cleared");
    }

    fn size(&self) -> usize {
        rw_read(&self.orders, "size").len()
    }

    fn snapshot(&self) -> HashMap<String, Arc<Order>> {
        rw_read(&self.orders, "snapshot").clone()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
