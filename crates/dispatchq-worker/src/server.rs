use crate::config::{TaskConfig, WorkerConfig};
use crate::error::{Result, WorkerError};
use crate::worker::Worker;
use dispatchq_broker::Connection;
use dispatchq_core::ArgKind;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Name of the default exchange workers bind their queues to.
pub const DEFAULT_EXCHANGE: &str = "dispatchq";

/// Connection owner and worker registry.
///
/// The name-to-worker map lives here, tied to the server's lifecycle, so
/// duplicate names are rejected at creation and every worker can be closed
/// together at teardown.
pub struct Server {
    connection: Arc<dyn Connection>,
    default_exchange: String,
    workers: RwLock<HashMap<String, Arc<Worker>>>,
}

impl Server {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Server {
            connection,
            default_exchange: DEFAULT_EXCHANGE.to_string(),
            workers: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.default_exchange = exchange.into();
        self
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Validate the configuration, declare and bind the queue on a
    /// transient setup channel, and register the worker. A failure at any
    /// step leaves no registry entry behind.
    pub async fn new_worker(
        &self,
        config: &WorkerConfig,
        tasks: HashMap<String, TaskConfig>,
    ) -> Result<Arc<Worker>> {
        if !self.connection.is_connected() {
            return Err(WorkerError::NotConnected);
        }
        if config.name.is_empty() {
            return Err(WorkerError::NameRequired);
        }
        if config.queue.is_empty() {
            return Err(WorkerError::QueueRequired);
        }
        if self.workers.read().contains_key(&config.name) {
            return Err(WorkerError::DuplicateName(config.name.clone()));
        }
        for (task_name, task) in &tasks {
            validate_signature(task_name, task)?;
        }

        let channel = self.connection.open_channel().await.map_err(|err| {
            error!("Error during creating channel: {}", err);
            WorkerError::from(err)
        })?;

        let setup = async {
            channel.declare_queue(&config.queue).await?;
            for key in &config.binding_keys {
                channel
                    .bind_queue(&config.queue, &self.default_exchange, key)
                    .await?;
            }
            Ok::<_, dispatchq_broker::BrokerError>(())
        }
        .await;

        if let Err(err) = channel.close().await {
            error!("Error closing setup channel: {}", err);
        }
        if let Err(err) = setup {
            error!("Error during declaring queue: {}", err);
            return Err(err.into());
        }

        let worker = Arc::new(Worker::new(
            config.name.clone(),
            config.queue.clone(),
            config.effective_limit(),
            tasks,
        ));

        let mut workers = self.workers.write();
        if workers.contains_key(&config.name) {
            return Err(WorkerError::DuplicateName(config.name.clone()));
        }
        workers.insert(config.name.clone(), worker.clone());

        info!("Worker {} registered for queue {}", config.name, config.queue);
        Ok(worker)
    }

    pub fn get_worker(&self, name: &str) -> Option<Arc<Worker>> {
        self.workers.read().get(name).cloned()
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.read().keys().cloned().collect()
    }

    /// Gracefully close every registered worker and empty the registry.
    pub async fn close(&self) {
        let workers: Vec<Arc<Worker>> = {
            let mut map = self.workers.write();
            map.drain().map(|(_, worker)| worker).collect()
        };

        for worker in workers {
            worker.close().await;
        }
        info!("All workers closed");
    }
}

/// Registration-time signature check: turns a class of invocation-time
/// failures into configuration errors.
fn validate_signature(task_name: &str, task: &TaskConfig) -> Result<()> {
    if task.task_uuid_as_first_arg && task.signature.first() != Some(&ArgKind::Str) {
        return Err(WorkerError::InvalidSignature {
            task: task_name.to_string(),
            reason: "task UUID injection requires a leading string parameter".to_string(),
        });
    }
    Ok(())
}
