use async_trait::async_trait;
use dispatchq_core::ArgValue;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Outcome of one handler invocation. Errors are logged by the execution
/// unit and never affect the delivery's acknowledgment.
pub type HandlerResult = anyhow::Result<()>;

/// Per-invocation context handed to every handler.
///
/// The cancellation token fires when the invocation outlives its timeout;
/// cooperative handlers can observe it and exit early. Non-cooperative
/// handlers simply keep running detached.
#[derive(Clone)]
pub struct TaskContext {
    uuid: String,
    cancelled: CancellationToken,
}

impl TaskContext {
    pub fn new(uuid: impl Into<String>, cancelled: CancellationToken) -> Self {
        TaskContext {
            uuid: uuid.into(),
            cancelled,
        }
    }

    /// Context that is never cancelled, for exercising handlers directly.
    pub fn detached(uuid: impl Into<String>) -> Self {
        Self::new(uuid, CancellationToken::new())
    }

    /// Correlation id of the task instance being executed.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    /// Resolves once the invocation has exceeded its timeout.
    pub async fn cancelled(&self) {
        self.cancelled.cancelled().await;
    }
}

/// A named task's callable. Implementations receive arguments already
/// decoded and matched against the declared signature.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext, args: Vec<ArgValue>) -> HandlerResult;
}

/// Logs its arguments and returns. Useful as a smoke-test task.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn run(&self, ctx: TaskContext, args: Vec<ArgValue>) -> HandlerResult {
        info!("Task {} echo: {:?}", ctx.uuid(), args);
        Ok(())
    }
}

/// Sleeps for a fixed duration, exiting early when cancelled.
pub struct SleepHandler {
    duration_ms: u64,
}

impl SleepHandler {
    pub fn new(duration_ms: u64) -> Self {
        SleepHandler { duration_ms }
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn run(&self, ctx: TaskContext, _args: Vec<ArgValue>) -> HandlerResult {
        tokio::select! {
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(self.duration_ms)) => Ok(()),
            _ = ctx.cancelled() => {
                info!("Task {} observed cancellation, exiting early", ctx.uuid());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_handler() {
        let result = EchoHandler
            .run(
                TaskContext::detached("t-1"),
                vec![ArgValue::Str("hello".to_string())],
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sleep_handler_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new("t-2", token.clone());

        let handler = SleepHandler::new(60_000);
        let handle = tokio::spawn(async move { handler.run(ctx, Vec::new()).await });
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("handler should exit promptly after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }
}
