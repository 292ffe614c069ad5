use rdkafka::client::ClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::TopicPartitionList;
use tokio::sync::mpsc;
use tracing::Span;

/// Group membership changes as seen by librdkafka, forwarded to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RebalanceEvent {
    Assigned(Vec<(String, i32)>),
    Revoked(Vec<(String, i32)>),
    Failed(String),
}

/// Consumer context that bridges librdkafka's rebalance callbacks onto a
/// channel and its log output onto `tracing`.
pub(crate) struct GroupContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
    span: Span,
}

impl GroupContext {
    pub(crate) fn new(span: Span) -> (Self, mpsc::UnboundedReceiver<RebalanceEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, span }, rx)
    }

    fn forward(&self, event: RebalanceEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(parent: &self.span, "Rebalance event dropped, router has stopped");
        }
    }
}

fn partitions(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

impl ClientContext for GroupContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => {
                tracing::error!(parent: &self.span, facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Warning => {
                tracing::warn!(parent: &self.span, facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                tracing::info!(parent: &self.span, facility = fac, "{}", log_message)
            }
            RDKafkaLogLevel::Debug => {
                tracing::debug!(parent: &self.span, facility = fac, "{}", log_message)
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        tracing::error!(parent: &self.span, error = %error, reason, "Kafka client error");
    }
}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let revoked = partitions(tpl);
                tracing::info!(parent: &self.span, partitions = ?revoked, "Partitions revoked");
                self.forward(RebalanceEvent::Revoked(revoked));
            }
            Rebalance::Error(e) => {
                tracing::warn!(parent: &self.span, error = %e, "Rebalance failed");
                self.forward(RebalanceEvent::Failed(e.to_string()));
            }
            Rebalance::Assign(_) => {}
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            let assigned = partitions(tpl);
            tracing::info!(parent: &self.span, partitions = ?assigned, "Partitions assigned");
            self.forward(RebalanceEvent::Assigned(assigned));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => tracing::trace!(parent: &self.span, count = offsets.count(), "Offsets committed"),
            Err(e) => tracing::warn!(parent: &self.span, error = %e, "Offset commit rejected"),
        }
    }
}
