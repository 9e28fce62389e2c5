pub mod config;
pub mod error;
mod executor;
pub mod handler;
pub mod server;
pub mod worker;

pub use config::{TaskConfig, WorkerConfig, DEFAULT_TASK_LIMIT};
pub use error::{Result, WorkerError};
pub use handler::{HandlerResult, TaskContext, TaskHandler};
pub use server::{Server, DEFAULT_EXCHANGE};
pub use worker::Worker;
