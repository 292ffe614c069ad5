// ============================================================================
// Durable Store - authoritative copy of every order
// ============================================================================

mod postgres;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::models::Order;

pub use postgres::PgOrderStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to order store")]
    Connect(#[source] sqlx::Error),

    #[error("order store query `{operation}` failed")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| StoreError::Query { operation, source }
    }
}

/// Persistence contract consumed by the cache warm-up, the ingest path and
/// the read path.
#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Full snapshot of every stored order. Used once at startup.
    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError>;

    async fn get_order(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;

    /// Idempotent upsert keyed by `order_uid`. A second save of the same id
    /// replaces the stored order wholesale.
    async fn save_order(&self, order: &Order) -> Result<(), StoreError>;
}
