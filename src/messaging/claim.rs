use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Span;

use super::consumer::ConsumerError;
use super::processor::{InboundMessage, MessageProcessor};
use crate::lifecycle::Shutdown;

// ============================================================================
// Partition Claims
// ============================================================================
//
//   router ──mpsc──▶ claim(orders/0) ──▶ process ──▶ commit(offset + 1)
//          ──mpsc──▶ claim(orders/1) ──▶ process ──▶ commit(offset + 1)
//
// One task per assigned partition. A claim handles its messages strictly in
// arrival order, one at a time, and commits an offset only after that message
// was handled successfully. Stopping a claim lets the in-flight message finish.
//
// A panicking claim triggers the process-wide shutdown. Draining ends with one
// synchronous commit of every claim's last committed position.
//
// ============================================================================

/// Pluggable commit sink so the claim loop can run without a broker.
pub trait OffsetCommitter: Send + Sync + 'static {
    /// Marks `offset` as handled. Implementations store `offset + 1`, the
    /// position the group resumes from.
    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), ConsumerError>;

    /// Blocks until the `last_committed` position of every report is durable.
    fn flush(&self, reports: &[ClaimReport]) -> Result<(), ConsumerError>;
}

/// Per-claim counters returned when a claim loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimReport {
    pub topic: String,
    pub partition: i32,
    pub received: u64,
    pub committed: u64,
    pub skipped: u64,
    /// Offset of the last message whose commit was accepted.
    pub last_committed: Option<i64>,
}

struct PartitionClaim {
    topic: String,
    partition: i32,
    messages: mpsc::Receiver<InboundMessage>,
    stop: Shutdown,
    processor: Arc<MessageProcessor>,
    committer: Arc<dyn OffsetCommitter>,
    span: Span,
}

impl PartitionClaim {
    async fn run(mut self) -> ClaimReport {
        let mut report = ClaimReport {
            topic: self.topic.clone(),
            partition: self.partition,
            ..ClaimReport::default()
        };

        tracing::info!(
            parent: &self.span,
            topic = %self.topic,
            partition = self.partition,
            "Partition claim started"
        );

        loop {
            let message = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                next = self.messages.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            report.received += 1;

            match self.processor.process(&message).await {
                Ok(order_uid) => {
                    match self.committer.commit(&message.topic, message.partition, message.offset) {
                        Ok(()) => {
                            report.committed += 1;
                            report.last_committed = Some(message.offset);
                        }
                        Err(e) => {
                            self.processor.metrics().offset_commit_failures.inc();
                            tracing::warn!(
                                parent: &self.span,
                                error = %e,
                                order_uid = %order_uid,
                                offset = message.offset,
                                "Failed to commit offset"
                            );
                        }
                    }
                }
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(
                        parent: &self.span,
                        error = %e,
                        kind = ?e.kind(),
                        partition = message.partition,
                        offset = message.offset,
                        "Message not handled, leaving offset uncommitted"
                    );
                }
            }
        }

        tracing::info!(
            parent: &self.span,
            topic = %report.topic,
            partition = report.partition,
            received = report.received,
            committed = report.committed,
            skipped = report.skipped,
            "Partition claim exited"
        );
        report
    }
}

struct ClaimHandle {
    sender: mpsc::Sender<InboundMessage>,
    stop: Shutdown,
    task: JoinHandle<ClaimReport>,
}

/// Live claims keyed by `(topic, partition)`.
pub(crate) struct ClaimSet {
    claims: HashMap<(String, i32), ClaimHandle>,
    processor: Arc<MessageProcessor>,
    committer: Arc<dyn OffsetCommitter>,
    shutdown: Shutdown,
    capacity: usize,
    span: Span,
}

impl ClaimSet {
    pub(crate) fn new(
        processor: Arc<MessageProcessor>,
        committer: Arc<dyn OffsetCommitter>,
        shutdown: Shutdown,
        capacity: usize,
        span: Span,
    ) -> Self {
        Self {
            claims: HashMap::new(),
            processor,
            committer,
            shutdown,
            capacity: capacity.max(1),
            span,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.claims.len()
    }

    /// Starts a claim for the partition unless one is already running.
    pub(crate) fn assign(&mut self, topic: &str, partition: i32) {
        self.sender_for(topic, partition);
    }

    fn sender_for(&mut self, topic: &str, partition: i32) -> mpsc::Sender<InboundMessage> {
        let key = (topic.to_string(), partition);
        if let Some(handle) = self.claims.get(&key) {
            return handle.sender.clone();
        }

        let (sender, messages) = mpsc::channel(self.capacity);
        let stop = self.shutdown.child();
        let claim = PartitionClaim {
            topic: topic.to_string(),
            partition,
            messages,
            stop: stop.clone(),
            processor: self.processor.clone(),
            committer: self.committer.clone(),
            span: self.span.clone(),
        };
        let escalate = self.shutdown.clone();
        let span = self.span.clone();
        let owner = topic.to_string();
        let task = tokio::spawn(async move {
            match AssertUnwindSafe(claim.run()).catch_unwind().await {
                Ok(report) => report,
                Err(panic) => {
                    tracing::error!(
                        parent: &span,
                        topic = %owner,
                        partition,
                        "Partition claim panicked, shutting down"
                    );
                    escalate.trigger();
                    std::panic::resume_unwind(panic)
                }
            }
        });

        self.claims.insert(
            key,
            ClaimHandle {
                sender: sender.clone(),
                stop,
                task,
            },
        );
        sender
    }

    /// Routes a message to its partition's claim, waiting for room in the
    /// claim's buffer. Returns `false` once shutdown has been triggered.
    pub(crate) async fn dispatch(&mut self, message: InboundMessage) -> bool {
        let sender = self.sender_for(&message.topic, message.partition);
        let key = (message.topic.clone(), message.partition);

        let sent = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return false,
            sent = sender.send(message) => sent,
        };
        if sent.is_ok() {
            return true;
        }

        tracing::warn!(
            parent: &self.span,
            topic = %key.0,
            partition = key.1,
            "Partition claim gone, message left uncommitted"
        );
        if let Some(handle) = self.claims.remove(&key) {
            finish(handle, self.span.clone()).await;
        }
        // A claim only ends on its own by panicking, which triggers shutdown.
        !self.shutdown.is_triggered()
    }

    /// Stops one claim and waits for its loop to exit.
    pub(crate) async fn release(&mut self, topic: &str, partition: i32) -> Option<ClaimReport> {
        let handle = self.claims.remove(&(topic.to_string(), partition))?;
        finish(handle, self.span.clone()).await
    }

    /// Stops every claim, waits for all of them to exit, then flushes their
    /// last committed positions.
    pub(crate) async fn drain(&mut self) -> Vec<ClaimReport> {
        let handles: Vec<ClaimHandle> = self.claims.drain().map(|(_, handle)| handle).collect();
        let span = self.span.clone();

        let reports: Vec<ClaimReport> =
            join_all(handles.into_iter().map(|handle| finish(handle, span.clone())))
                .await
                .into_iter()
                .flatten()
                .collect();

        if reports.iter().any(|r| r.last_committed.is_some()) {
            match self.committer.flush(&reports) {
                Ok(()) => tracing::debug!(parent: &self.span, "Flushed final offsets"),
                Err(e) => {
                    self.processor.metrics().offset_commit_failures.inc();
                    tracing::warn!(parent: &self.span, error = %e, "Failed to flush final offsets");
                }
            }
        }
        reports
    }
}

async fn finish(handle: ClaimHandle, span: Span) -> Option<ClaimReport> {
    let ClaimHandle { sender, stop, task } = handle;
    stop.trigger();
    drop(sender);

    match task.await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!(
                parent: &span,
                error = %e,
                panicked = e.is_panic(),
                "Partition claim task failed"
            );
            None
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
