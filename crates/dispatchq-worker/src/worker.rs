use crate::config::TaskConfig;
use crate::error::{Result, WorkerError};
use crate::executor::ExecutionUnit;
use dispatchq_broker::{Channel, Connection, ConsumeOptions, Delivery};
use dispatchq_core::Task;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// A worker consumes one queue over its own channel and dispatches
/// recognized tasks to execution units, at most `limit` deliveries
/// outstanding at a time (enforced through the broker prefetch window,
/// never a local semaphore).
pub struct Worker {
    name: String,
    queue: String,
    limit: u16,
    tasks: Arc<HashMap<String, TaskConfig>>,

    working: AtomicBool,
    state: Mutex<State>,
}

enum State {
    Created,
    Running(Active),
    Closed,
}

struct Active {
    channel: Arc<dyn Channel>,
    stop: CancellationToken,
    stop_ack: oneshot::Receiver<()>,
    in_flight: TaskTracker,
}

impl Worker {
    pub(crate) fn new(
        name: String,
        queue: String,
        limit: u16,
        tasks: HashMap<String, TaskConfig>,
    ) -> Self {
        Worker {
            name,
            queue,
            limit,
            tasks: Arc::new(tasks),
            working: AtomicBool::new(false),
            state: Mutex::new(State::Created),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn limit(&self) -> u16 {
        self.limit
    }

    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    /// Open the worker's long-lived channel, set flow control, register as
    /// a consumer, and launch the consumption loop. The worker is marked
    /// working only after every step succeeds.
    pub async fn start(&self, connection: &Arc<dyn Connection>) -> Result<()> {
        if !connection.is_connected() {
            return Err(WorkerError::NotConnected);
        }

        let mut state = self.state.lock().await;
        match &*state {
            State::Created => {}
            State::Running(_) => return Err(WorkerError::AlreadyStarted),
            State::Closed => return Err(WorkerError::Closed),
        }

        let channel = connection.open_channel().await?;
        let setup = async {
            channel.qos(self.limit, 0, false).await?;
            channel
                .consume(&self.queue, &self.name, ConsumeOptions::default())
                .await
        }
        .await;
        let deliveries = match setup {
            Ok(deliveries) => deliveries,
            Err(err) => {
                if let Err(close_err) = channel.close().await {
                    error!(
                        "Error closing channel for worker {}: {}",
                        self.name, close_err
                    );
                }
                return Err(err.into());
            }
        };

        let stop = CancellationToken::new();
        let (stop_ack_tx, stop_ack_rx) = oneshot::channel();
        let in_flight = TaskTracker::new();

        let consume_loop = ConsumeLoop {
            worker_name: self.name.clone(),
            tasks: self.tasks.clone(),
            channel: channel.clone(),
            in_flight: in_flight.clone(),
            stop: stop.clone(),
        };
        tokio::spawn(consume_loop.run(deliveries, stop_ack_tx));

        *state = State::Running(Active {
            channel,
            stop,
            stop_ack: stop_ack_rx,
            in_flight,
        });
        self.working.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Gracefully close the worker: stop intake, wait for the loop's
    /// stop-acknowledgment, drain in-flight execution units, release the
    /// channel. No-op unless the worker is currently working; a closed
    /// worker stays closed.
    pub async fn close(&self) {
        debug!("Worker {} closing started", self.name);

        let mut state = self.state.lock().await;
        let active = match std::mem::replace(&mut *state, State::Closed) {
            State::Running(active) => active,
            other => {
                *state = other;
                return;
            }
        };
        self.working.store(false, Ordering::SeqCst);

        active.stop.cancel();
        let _ = active.stop_ack.await;

        // Drains when every accepted delivery has been settled; a
        // timed-out handler left running detached does not hold this up.
        active.in_flight.close();
        active.in_flight.wait().await;

        if let Err(err) = active.channel.close().await {
            error!("Error closing channel for worker {}: {}", self.name, err);
        }

        info!("Worker {} is closed", self.name);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("limit", &self.limit)
            .field("working", &self.is_working())
            .finish_non_exhaustive()
    }
}

/// The consumption loop: a single task balancing the stop signal against
/// the delivery stream. It never blocks on task execution; accepted
/// deliveries are handed to spawned execution units.
struct ConsumeLoop {
    worker_name: String,
    tasks: Arc<HashMap<String, TaskConfig>>,
    channel: Arc<dyn Channel>,
    in_flight: TaskTracker,
    stop: CancellationToken,
}

impl ConsumeLoop {
    async fn run(self, mut deliveries: mpsc::Receiver<Delivery>, stop_ack: oneshot::Sender<()>) {
        info!("Worker {} started consuming", self.worker_name);

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!("Consuming stopped");
                    break;
                }
                delivery = deliveries.recv() => {
                    match delivery {
                        Some(delivery) => {
                            if !self.handle_delivery(delivery).await {
                                break;
                            }
                        }
                        None => {
                            warn!(
                                "Delivery stream for worker {} ended, stopping consumption",
                                self.worker_name
                            );
                            break;
                        }
                    }
                }
            }
        }

        let _ = stop_ack.send(());
    }

    /// Returns false when consumption must stop (ack/nack transport
    /// failure).
    async fn handle_delivery(&self, delivery: Delivery) -> bool {
        if delivery.body.is_empty() {
            error!("Empty task received");
            return self.reject(delivery.delivery_tag, false).await;
        }

        let task = match Task::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(err) => {
                if !self.reject(delivery.delivery_tag, false).await {
                    return false;
                }
                error!(
                    "Can't parse received task: {}, task body: {}",
                    err,
                    String::from_utf8_lossy(&delivery.body)
                );
                return true;
            }
        };

        let Some(config) = self.tasks.get(&task.name) else {
            if !self.reject(delivery.delivery_tag, true).await {
                return false;
            }
            // No redelivery bound here: until some worker registers this
            // name the message cycles through the queue.
            warn!(
                "Received task ({}-{}) which is not registered in this worker; \
                 it was requeued and will cycle until another worker takes it",
                task.name, task.uuid
            );
            return true;
        };

        let unit = ExecutionUnit::new(
            self.channel.clone(),
            delivery.delivery_tag,
            task,
            config.clone(),
        );
        self.in_flight.spawn(unit.run());
        true
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> bool {
        if let Err(err) = self.channel.nack(delivery_tag, requeue).await {
            error!("Consuming stopped: {}", err);
            return false;
        }
        true
    }
}
