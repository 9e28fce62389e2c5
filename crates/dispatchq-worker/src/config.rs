use crate::handler::TaskHandler;
use dispatchq_core::ArgKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Concurrency cap applied when a worker is configured with a limit of 0.
pub const DEFAULT_TASK_LIMIT: u16 = 3;

/// Configuration for a new worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker name; also used as the consumer tag and registry key.
    pub name: String,

    /// Queue this worker consumes. Required.
    pub queue: String,

    /// Binding keys under which the queue is bound to the default exchange.
    #[serde(default)]
    pub binding_keys: Vec<String>,

    /// Number of tasks executed in parallel, enforced through the broker
    /// prefetch window and therefore prefetch-sized. 0 falls back to
    /// [`DEFAULT_TASK_LIMIT`].
    #[serde(default)]
    pub limit: u16,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        WorkerConfig {
            name: name.into(),
            queue: queue.into(),
            binding_keys: Vec::new(),
            limit: 0,
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn effective_limit(&self) -> u16 {
        if self.limit == 0 {
            DEFAULT_TASK_LIMIT
        } else {
            self.limit
        }
    }
}

/// Per-task registration: the handler, its declared signature, and
/// execution policy.
#[derive(Clone)]
pub struct TaskConfig {
    /// Handler invoked for each matching delivery.
    pub handler: Arc<dyn TaskHandler>,

    /// Declared positional parameter kinds; live deliveries are decoded
    /// against this, so a mismatch is rejected before any invocation.
    pub signature: Vec<ArgKind>,

    /// 0 means the invocation is awaited without a timer.
    pub timeout_seconds: u64,

    /// Prepend the task UUID as a synthetic string argument.
    pub task_uuid_as_first_arg: bool,
}

impl TaskConfig {
    pub fn new(handler: Arc<dyn TaskHandler>, signature: Vec<ArgKind>) -> Self {
        TaskConfig {
            handler,
            signature,
            timeout_seconds: 0,
            task_uuid_as_first_arg: false,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_task_uuid_as_first_arg(mut self) -> Self {
        self.task_uuid_as_first_arg = true;
        self
    }
}

impl std::fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskConfig")
            .field("signature", &self.signature)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("task_uuid_as_first_arg", &self.task_uuid_as_first_arg)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit_defaults() {
        let config = WorkerConfig::new("w", "q");
        assert_eq!(config.effective_limit(), DEFAULT_TASK_LIMIT);

        let mut config = config;
        config.limit = 8;
        assert_eq!(config.effective_limit(), 8);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "name: mailer\nqueue: emails\nbinding_keys:\n  - email.send\nlimit: 5\n";
        let config: WorkerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "mailer");
        assert_eq!(config.queue, "emails");
        assert_eq!(config.binding_keys, vec!["email.send".to_string()]);
        assert_eq!(config.limit, 5);
    }

    #[test]
    fn test_yaml_optional_fields() {
        let config: WorkerConfig = serde_yaml::from_str("name: w\nqueue: q\n").unwrap();
        assert!(config.binding_keys.is_empty());
        assert_eq!(config.limit, 0);
    }
}
