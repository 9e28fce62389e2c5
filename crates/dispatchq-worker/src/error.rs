use dispatchq_broker::BrokerError;
use thiserror::Error;

/// Setup-time failures. Steady-state consumption errors never surface
/// here; they are logged and settled per delivery.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Worker name is a required parameter")]
    NameRequired,

    #[error("Worker queue is a required parameter")]
    QueueRequired,

    #[error("Worker with name {0} already exists")]
    DuplicateName(String),

    #[error("Invalid signature for task {task}: {reason}")]
    InvalidSignature { task: String, reason: String },

    #[error("Worker was already started")]
    AlreadyStarted,

    #[error("Worker is closed and cannot be restarted")]
    Closed,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
