use std::sync::Arc;
use std::time::Instant;

use tracing::Span;

use crate::domain::{self, OrderError};
use crate::ingest::OrderHandler;
use crate::metrics::Metrics;

/// Owned copy of one record pulled off the order topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Decode → validate → hand off, for exactly one message.
pub struct MessageProcessor {
    handler: Arc<dyn OrderHandler>,
    metrics: Arc<Metrics>,
    span: Span,
}

impl MessageProcessor {
    pub fn new(handler: Arc<dyn OrderHandler>, metrics: Arc<Metrics>, span: Span) -> Self {
        Self {
            handler,
            metrics,
            span,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns the order UID on success. Any error means the message must
    /// not be committed.
    pub async fn process(&self, message: &InboundMessage) -> Result<String, OrderError> {
        self.metrics.messages_consumed.inc();
        let started = Instant::now();

        tracing::debug!(
            parent: &self.span,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Received message"
        );

        let order = match domain::decode(message.payload.as_deref()) {
            Ok(order) => order,
            Err(e) => {
                self.metrics.record_rejection(e.reason());
                self.metrics.record_ingest(started.elapsed().as_secs_f64(), "rejected");
                tracing::warn!(
                    parent: &self.span,
                    error = %e,
                    partition = message.partition,
                    offset = message.offset,
                    "Invalid order data"
                );
                return Err(e.into());
            }
        };

        let order_uid = order.order_uid.clone();
        tracing::info!(parent: &self.span, order_uid = %order_uid, "Processing order");

        match self.handler.handle(order).await {
            Ok(()) => {
                self.metrics.record_ingest(started.elapsed().as_secs_f64(), "persisted");
                Ok(order_uid)
            }
            Err(e) => {
                self.metrics.record_rejection("handler_failed");
                self.metrics.record_ingest(started.elapsed().as_secs_f64(), "failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, OrderCache};
    use crate::domain::ErrorKind;
    use crate::ingest::OrderIngestor;
    use crate::store::testing::{sample_order, MemoryStore};

    fn message(payload: &[u8]) -> InboundMessage {
        InboundMessage {
            topic: "orders".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Some(payload.to_vec()),
        }
    }

    fn processor(store: Arc<MemoryStore>, cache: Arc<MemoryCache>) -> MessageProcessor {
        let metrics = Arc::new(Metrics::new().unwrap());
        let ingestor = OrderIngestor::new(store, cache, metrics.clone(), Span::none());
        MessageProcessor::new(Arc::new(ingestor), metrics, Span::none())
    }

    #[tokio::test]
    async fn test_valid_message_reaches_store_and_cache() {
        let store = Arc::new(MemoryStore::default());
        let cache = Arc::new(MemoryCache::new(Span::none()));
        let processor = processor(store.clone(), cache.clone());
        let order = sample_order("b563feb7b2b84b6test");

        let uid = processor
            .process(&message(&serde_json::to_vec(&order).unwrap()))
            .await
            .unwrap();

        assert_eq!(uid, "b563feb7b2b84b6test");
        assert_eq!(*cache.get(&uid).unwrap(), order);
        assert_eq!(processor.metrics().orders_persisted.get(), 1);
    }

    #[tokio::test]
    async fn test_invalid_messages_never_reach_the_handler() {
        let store = Arc::new(MemoryStore::default());
        let cache = Arc::new(MemoryCache::new(Span::none()));
        let processor = processor(store.clone(), cache.clone());

        let malformed = processor.process(&message(b"{oops")).await.unwrap_err();
        let no_items = processor
            .process(&message(br#"{"order_uid":"a","track_number":"t"}"#))
            .await
            .unwrap_err();

        assert_eq!(malformed.kind(), ErrorKind::Validation);
        assert_eq!(no_items.kind(), ErrorKind::Validation);
        assert_eq!(store.save_calls(), 0);
        assert_eq!(
            processor
                .metrics()
                .messages_rejected
                .with_label_values(&["empty_items"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_handler_failure_is_reported() {
        let store = Arc::new(MemoryStore::failing());
        let cache = Arc::new(MemoryCache::new(Span::none()));
        let processor = processor(store, cache.clone());
        let payload = serde_json::to_vec(&sample_order("a")).unwrap();

        let err = processor.process(&message(&payload)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientInfra);
        assert_eq!(cache.size(), 0);
    }
}
