use crate::{BrokerError, Channel, Connection, ConsumeOptions, Delivery, Result};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::debug;

const UNLIMITED_STREAM_BUFFER: usize = 64;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// In-process broker with real prefetch accounting.
///
/// Behaves like a direct exchange: published messages are routed to every
/// queue bound under the routing key, kept in FIFO order, and delivered to
/// consumers while their channel has unacknowledged capacity left.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    connected: AtomicBool,
    queues: DashMap<String, Arc<QueueState>>,
    // binding key -> bound queue names
    bindings: RwLock<HashMap<String, Vec<String>>>,
}

struct QueueState {
    name: String,
    backlog: Mutex<VecDeque<Bytes>>,
    consumers: Mutex<Vec<ConsumerSlot>>,
    stats: QueueStats,
}

struct ConsumerSlot {
    channel_id: u64,
    channel: Weak<ChannelState>,
    tx: mpsc::Sender<Delivery>,
    auto_ack: bool,
}

#[derive(Default)]
struct QueueStats {
    delivered: AtomicU64,
    acked: AtomicU64,
    nacked_requeued: AtomicU64,
    nacked_dropped: AtomicU64,
    outstanding: AtomicU64,
    max_outstanding: AtomicU64,
}

impl QueueStats {
    fn on_delivered(&self, manual_ack: bool) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        if manual_ack {
            let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_outstanding.fetch_max(now, Ordering::SeqCst);
        } else {
            self.acked.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_settled(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time counters for one queue, for assertions in tests.
#[derive(Debug, Clone, Copy)]
pub struct QueueStatsSnapshot {
    pub depth: usize,
    pub delivered: u64,
    pub acked: u64,
    pub nacked_requeued: u64,
    pub nacked_dropped: u64,
    pub outstanding: u64,
    pub max_outstanding: u64,
}

struct ChannelState {
    id: u64,
    broker: Arc<BrokerInner>,
    prefetch: AtomicUsize,
    next_tag: AtomicU64,
    unacked: Mutex<HashMap<u64, UnackedDelivery>>,
    closed: AtomicBool,
}

struct UnackedDelivery {
    queue: String,
    body: Bytes,
}

struct MemoryChannel {
    state: Arc<ChannelState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker {
            inner: Arc::new(BrokerInner {
                connected: AtomicBool::new(true),
                queues: DashMap::new(),
                bindings: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Simulate losing the broker connection. Existing channels keep their
    /// state but no new channel can be opened.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Publish a message through the default exchange; it lands on every
    /// queue bound under `routing_key`. Unroutable messages are dropped,
    /// as a direct exchange does.
    pub fn publish(&self, routing_key: &str, body: impl Into<Bytes>) {
        let body = body.into();
        let targets: Vec<String> = self
            .inner
            .bindings
            .read()
            .get(routing_key)
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() {
            debug!("No queue bound for routing key {}, dropping message", routing_key);
            return;
        }

        for queue in targets {
            self.inner.enqueue(&queue, body.clone());
        }
    }

    /// Publish straight to a declared queue, bypassing exchange routing.
    pub fn publish_to_queue(&self, queue: &str, body: impl Into<Bytes>) -> Result<()> {
        if !self.inner.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        self.inner.enqueue(queue, body.into());
        Ok(())
    }

    pub fn queue_stats(&self, queue: &str) -> Option<QueueStatsSnapshot> {
        self.inner.queues.get(queue).map(|q| {
            let q = q.value();
            QueueStatsSnapshot {
                depth: q.backlog.lock().len(),
                delivered: q.stats.delivered.load(Ordering::SeqCst),
                acked: q.stats.acked.load(Ordering::SeqCst),
                nacked_requeued: q.stats.nacked_requeued.load(Ordering::SeqCst),
                nacked_dropped: q.stats.nacked_dropped.load(Ordering::SeqCst),
                outstanding: q.stats.outstanding.load(Ordering::SeqCst),
                max_outstanding: q.stats.max_outstanding.load(Ordering::SeqCst),
            }
        })
    }
}

impl BrokerInner {
    fn enqueue(&self, queue: &str, body: Bytes) {
        if let Some(state) = self.queues.get(queue).map(|q| q.value().clone()) {
            state.backlog.lock().push_back(body);
            self.pump(&state);
        }
    }

    fn requeue_front(&self, queue: &str, body: Bytes) {
        if let Some(state) = self.queues.get(queue).map(|q| q.value().clone()) {
            state.backlog.lock().push_front(body);
            self.pump(&state);
        }
    }

    /// Deliver backlog messages to consumers with prefetch capacity left.
    /// One message goes to at most one consumer; messages stay queued while
    /// every consumer's unacked window is full.
    fn pump(&self, queue: &Arc<QueueState>) {
        loop {
            let mut consumers = queue.consumers.lock();
            consumers.retain(|slot| !slot.tx.is_closed() && slot.channel.strong_count() > 0);

            let mut backlog = queue.backlog.lock();
            let Some(body) = backlog.front().cloned() else {
                return;
            };

            let mut delivered = false;
            for slot in consumers.iter() {
                let Some(channel) = slot.channel.upgrade() else {
                    continue;
                };
                if channel.closed.load(Ordering::SeqCst) {
                    continue;
                }

                let tag = channel.next_tag.fetch_add(1, Ordering::SeqCst);
                if !slot.auto_ack {
                    let mut unacked = channel.unacked.lock();
                    let prefetch = channel.prefetch.load(Ordering::SeqCst);
                    if prefetch != 0 && unacked.len() >= prefetch {
                        continue;
                    }
                    unacked.insert(
                        tag,
                        UnackedDelivery {
                            queue: queue.name.clone(),
                            body: body.clone(),
                        },
                    );
                }

                match slot.tx.try_send(Delivery {
                    delivery_tag: tag,
                    body: body.clone(),
                }) {
                    Ok(()) => {
                        backlog.pop_front();
                        queue.stats.on_delivered(!slot.auto_ack);
                        delivered = true;
                        break;
                    }
                    Err(_) => {
                        channel.unacked.lock().remove(&tag);
                    }
                }
            }

            if !delivered {
                return;
            }
        }
    }

    fn queue(&self, name: &str) -> Result<Arc<QueueState>> {
        self.queues
            .get(name)
            .map(|q| q.value().clone())
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }
}

#[async_trait::async_trait]
impl Connection for MemoryBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<Arc<dyn Channel>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let state = Arc::new(ChannelState {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::SeqCst),
            broker: self.inner.clone(),
            prefetch: AtomicUsize::new(0),
            next_tag: AtomicU64::new(1),
            unacked: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        Ok(Arc::new(MemoryChannel { state }))
    }
}

impl ChannelState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    fn settle(&self, delivery_tag: u64) -> Result<UnackedDelivery> {
        let entry = self
            .unacked
            .lock()
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;

        if let Ok(queue) = self.broker.queue(&entry.queue) {
            queue.stats.on_settled();
        }
        Ok(entry)
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.state.ensure_open()?;
        self.state
            .broker
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                Arc::new(QueueState {
                    name: queue.to_string(),
                    backlog: Mutex::new(VecDeque::new()),
                    consumers: Mutex::new(Vec::new()),
                    stats: QueueStats::default(),
                })
            });
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, _exchange: &str, binding_key: &str) -> Result<()> {
        self.state.ensure_open()?;
        if !self.state.broker.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }

        let mut bindings = self.state.broker.bindings.write();
        let bound = bindings.entry(binding_key.to_string()).or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn qos(&self, prefetch_count: u16, _prefetch_size: u32, _global: bool) -> Result<()> {
        self.state.ensure_open()?;
        self.state
            .prefetch
            .store(prefetch_count as usize, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<mpsc::Receiver<Delivery>> {
        self.state.ensure_open()?;
        let queue = self.state.broker.queue(queue)?;

        let prefetch = self.state.prefetch.load(Ordering::SeqCst);
        let buffer = if prefetch == 0 {
            UNLIMITED_STREAM_BUFFER
        } else {
            prefetch
        };
        let (tx, rx) = mpsc::channel(buffer);

        queue.consumers.lock().push(ConsumerSlot {
            channel_id: self.state.id,
            channel: Arc::downgrade(&self.state),
            tx,
            auto_ack: options.auto_ack,
        });

        self.state.broker.pump(&queue);
        Ok(rx)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.state.ensure_open()?;
        let entry = self.state.settle(delivery_tag)?;

        if let Ok(queue) = self.state.broker.queue(&entry.queue) {
            queue.stats.acked.fetch_add(1, Ordering::SeqCst);
            self.state.broker.pump(&queue);
        }
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.state.ensure_open()?;
        let entry = self.state.settle(delivery_tag)?;

        if let Ok(queue) = self.state.broker.queue(&entry.queue) {
            if requeue {
                queue.stats.nacked_requeued.fetch_add(1, Ordering::SeqCst);
            } else {
                queue.stats.nacked_dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
        if requeue {
            self.state.broker.requeue_front(&entry.queue, entry.body);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Drop this channel's consumers so their delivery streams end.
        for queue in self.state.broker.queues.iter() {
            queue
                .value()
                .consumers
                .lock()
                .retain(|slot| slot.channel_id != self.state.id);
        }

        // Anything still unacknowledged goes back to its queue.
        let unacked: Vec<UnackedDelivery> =
            self.state.unacked.lock().drain().map(|(_, d)| d).collect();
        for entry in unacked {
            if let Ok(queue) = self.state.broker.queue(&entry.queue) {
                queue.stats.on_settled();
                queue.stats.nacked_requeued.fetch_add(1, Ordering::SeqCst);
            }
            self.state.broker.requeue_front(&entry.queue, entry.body);
        }
        Ok(())
    }
}
