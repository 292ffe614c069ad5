mod claim;
mod consumer;
mod context;
mod processor;

pub use claim::{ClaimReport, OffsetCommitter};
pub use consumer::{ConsumerError, ConsumerState, OrderConsumer};
pub use processor::{InboundMessage, MessageProcessor};
