use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::Span;

use super::claim::{ClaimReport, ClaimSet, OffsetCommitter};
use super::context::{GroupContext, RebalanceEvent};
use super::processor::{InboundMessage, MessageProcessor};
use crate::lifecycle::Shutdown;
use crate::metrics::Metrics;
use crate::settings::KafkaSettings;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to join consumer group `{group_id}` on topic `{topic}`")]
    Join {
        group_id: String,
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("broker error: {0}")]
    Broker(#[from] KafkaError),
}

/// Where the consumer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Joining,
    Consuming,
    Draining,
    Closed,
}

impl ConsumerState {
    /// State channel handed to [`OrderConsumer::join`]; starts at `Idle`.
    pub fn channel() -> (watch::Sender<Self>, watch::Receiver<Self>) {
        watch::channel(Self::Idle)
    }
}

impl OffsetCommitter for StreamConsumer<GroupContext> {
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), ConsumerError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
        Consumer::commit(self, &tpl, CommitMode::Async)?;
        Ok(())
    }

    fn flush(&self, reports: &[ClaimReport]) -> Result<(), ConsumerError> {
        let mut tpl = TopicPartitionList::new();
        for report in reports {
            if let Some(offset) = report.last_committed {
                let next = Offset::Offset(offset + 1);
                tpl.add_partition_offset(&report.topic, report.partition, next)?;
            }
        }
        if tpl.count() > 0 {
            Consumer::commit(self, &tpl, CommitMode::Sync)?;
        }
        Ok(())
    }
}

/// Consumer-group member for the order topic.
///
/// A single router task receives every message and forwards it to the claim
/// for its partition. Offsets are committed manually, one per successfully
/// handled message.
pub struct OrderConsumer {
    consumer: Arc<StreamConsumer<GroupContext>>,
    router: Router,
    topic: String,
    group_id: String,
}

impl OrderConsumer {
    /// Builds the group member, subscribes to the configured topic and waits
    /// up to `join_timeout` for the brokers to answer a metadata request.
    ///
    /// Failure here is fatal at startup.
    pub fn join(
        settings: &KafkaSettings,
        processor: Arc<MessageProcessor>,
        metrics: Arc<Metrics>,
        state: watch::Sender<ConsumerState>,
        shutdown: &Shutdown,
        span: Span,
    ) -> Result<Self, ConsumerError> {
        state.send_replace(ConsumerState::Joining);

        let join_error = |source| ConsumerError::Join {
            group_id: settings.group_id.clone(),
            topic: settings.topic.clone(),
            source,
        };

        let (context, rebalances) = GroupContext::new(span.clone());
        let consumer: StreamConsumer<GroupContext> = client_config(settings)
            .create_with_context(context)
            .map_err(join_error)?;
        consumer
            .subscribe(&[settings.topic.as_str()])
            .map_err(join_error)?;

        let metadata = consumer
            .fetch_metadata(Some(settings.topic.as_str()), settings.join_timeout)
            .map_err(join_error)?;
        let partitions = metadata
            .topics()
            .iter()
            .find(|t| t.name() == settings.topic)
            .map_or(0, |t| t.partitions().len());
        if partitions == 0 {
            tracing::warn!(parent: &span, topic = %settings.topic, "Topic has no partitions yet");
        }

        tracing::info!(
            parent: &span,
            brokers = %settings.brokers.join(","),
            topic = %settings.topic,
            group_id = %settings.group_id,
            partitions,
            "Joined consumer group"
        );

        let consumer = Arc::new(consumer);
        let claims = ClaimSet::new(
            processor,
            consumer.clone(),
            shutdown.clone(),
            settings.claim_buffer,
            span.clone(),
        );

        Ok(Self {
            consumer,
            router: Router {
                rebalances,
                claims,
                metrics,
                state,
                span,
            },
            topic: settings.topic.clone(),
            group_id: settings.group_id.clone(),
        })
    }

    /// Routes messages until `shutdown` fires, then drains every claim and
    /// leaves the group. Broker errors are logged and counted, never fatal.
    pub async fn run(self, shutdown: Shutdown) -> Vec<ClaimReport> {
        let OrderConsumer {
            consumer,
            router,
            topic,
            group_id,
        } = self;

        tracing::info!(
            parent: &router.span,
            topic = %topic,
            group_id = %group_id,
            "Consumer loop started"
        );

        let messages = consumer.stream().map(|received| received.map(|m| inbound(&m)));
        let messages = std::pin::pin!(messages);
        router.run(messages, shutdown, || consumer.unsubscribe()).await
    }
}

/// The broker-independent half of the consumer: rebalance handling, message
/// routing and the state machine.
struct Router {
    rebalances: mpsc::UnboundedReceiver<RebalanceEvent>,
    claims: ClaimSet,
    metrics: Arc<Metrics>,
    state: watch::Sender<ConsumerState>,
    span: Span,
}

impl Router {
    /// `leave` runs after the claims are drained and before `Closed` is published.
    async fn run<S, L>(self, mut messages: S, shutdown: Shutdown, leave: L) -> Vec<ClaimReport>
    where
        S: Stream<Item = KafkaResult<InboundMessage>> + Unpin,
        L: FnOnce(),
    {
        let Router {
            mut rebalances,
            mut claims,
            metrics,
            state,
            span,
        } = self;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = rebalances.recv() => match event {
                    RebalanceEvent::Assigned(partitions) => {
                        for (topic, partition) in &partitions {
                            claims.assign(topic, *partition);
                        }
                        state.send_replace(ConsumerState::Consuming);
                    }
                    RebalanceEvent::Revoked(partitions) => {
                        for (topic, partition) in &partitions {
                            claims.release(topic, *partition).await;
                        }
                    }
                    RebalanceEvent::Failed(reason) => {
                        tracing::warn!(parent: &span, reason = %reason, "Rebalance error reported");
                    }
                },
                received = messages.next() => match received {
                    Some(Ok(message)) => {
                        if !claims.dispatch(message).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        metrics.broker_errors.inc();
                        tracing::warn!(
                            parent: &span,
                            error = %e,
                            code = ?e.rdkafka_error_code(),
                            "Consumer error"
                        );
                    }
                    None => {
                        tracing::warn!(parent: &span, "Message stream ended");
                        break;
                    }
                },
            }
        }

        state.send_replace(ConsumerState::Draining);
        tracing::info!(parent: &span, claims = claims.len(), "Draining partition claims");

        let reports = claims.drain().await;
        let committed: u64 = reports.iter().map(|r| r.committed).sum();
        let skipped: u64 = reports.iter().map(|r| r.skipped).sum();

        leave();
        state.send_replace(ConsumerState::Closed);
        tracing::info!(
            parent: &span,
            claims = reports.len(),
            committed,
            skipped,
            "Consumer closed"
        );

        reports
    }
}

fn client_config(settings: &KafkaSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", settings.brokers.join(","))
        .set("group.id", &settings.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("partition.assignment.strategy", "roundrobin")
        .set(
            "session.timeout.ms",
            settings.session_timeout.as_millis().to_string(),
        )
        .set(
            "heartbeat.interval.ms",
            settings.heartbeat_interval.as_millis().to_string(),
        );
    config
}

fn inbound<M: Message>(message: &M) -> InboundMessage {
    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
    }
}
