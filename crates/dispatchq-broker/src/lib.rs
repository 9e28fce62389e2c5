mod memory;

pub use memory::{MemoryBroker, QueueStatsSnapshot};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(u64),

    #[error("Broker error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// One received message instance requiring an explicit ack or nack
/// through the channel it was delivered on.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Bytes,
}

/// Consumer registration flags, mirroring the broker's consume call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// When false the broker expects an explicit ack per delivery.
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
}

/// Connection provider owned by the supervising server.
///
/// Establishment and reconnection live outside this crate; consumers only
/// observe connectivity and open channels.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn open_channel(&self) -> Result<std::sync::Arc<dyn Channel>>;
}

/// A broker channel: topology declaration, flow control, consumption and
/// per-delivery acknowledgment.
///
/// Implementations must tolerate concurrent ack/nack calls from multiple
/// tasks sharing one channel handle.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Declare a queue; declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Bind a queue to an exchange under a binding key.
    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str) -> Result<()>;

    /// Set the prefetch window: the broker will keep at most
    /// `prefetch_count` deliveries unacknowledged on this channel
    /// (0 = unlimited).
    async fn qos(&self, prefetch_count: u16, prefetch_size: u32, global: bool) -> Result<()>;

    /// Register a consumer and return its delivery stream. The stream ends
    /// when the channel or the broker goes away.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<mpsc::Receiver<Delivery>>;

    /// Positively acknowledge a single delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledge a single delivery, optionally requeueing it.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
