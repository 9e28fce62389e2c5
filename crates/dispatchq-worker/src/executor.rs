use crate::config::TaskConfig;
use crate::handler::{HandlerResult, TaskContext, TaskHandler};
use dispatchq_broker::Channel;
use dispatchq_core::{decode_args, Task, TaskArgument, STRING_TAG};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// One spawned unit per accepted delivery: decodes arguments, invokes the
/// handler under the timeout guard, and issues the terminal acknowledgment.
pub(crate) struct ExecutionUnit {
    channel: Arc<dyn Channel>,
    delivery_tag: u64,
    task: Task,
    config: TaskConfig,
}

impl ExecutionUnit {
    pub(crate) fn new(
        channel: Arc<dyn Channel>,
        delivery_tag: u64,
        task: Task,
        config: TaskConfig,
    ) -> Self {
        ExecutionUnit {
            channel,
            delivery_tag,
            task,
            config,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Handling task {}", self.task.uuid);

        if self.config.task_uuid_as_first_arg {
            let uuid_arg = TaskArgument::new(
                STRING_TAG,
                serde_json::Value::String(self.task.uuid.clone()),
            );
            self.task.args.insert(0, uuid_arg);
        }

        let args = match decode_args(&self.task.args, &self.config.signature) {
            Ok(args) => args,
            Err(err) => {
                if let Err(nack_err) = self.channel.nack(self.delivery_tag, false).await {
                    error!("Can't reject task {}: {}", self.task.uuid, nack_err);
                }
                error!("Can't decode task ({}) arguments: {}", self.task.uuid, err);
                return;
            }
        };

        let timed_out = invoke_with_timeout(
            self.config.handler.clone(),
            &self.task.uuid,
            args,
            self.config.timeout_seconds,
        )
        .await;

        if timed_out {
            info!("Task {} exceeded timeout, taking next task", self.task.uuid);
        } else {
            info!("Task {} was finished", self.task.uuid);
        }

        // The delivery is settled once the guard returns, whether the
        // handler completed or was left running detached.
        if let Err(err) = self.channel.ack(self.delivery_tag).await {
            error!("Can't ack task {}: {}", self.task.uuid, err);
        }
    }
}

/// Run the handler as its own task and race it against a timer.
///
/// Returns whether the timer won. The losing invocation is never aborted:
/// on timeout it is abandoned with its cancellation token fired, and its
/// eventual result is discarded.
async fn invoke_with_timeout(
    handler: Arc<dyn TaskHandler>,
    uuid: &str,
    args: Vec<dispatchq_core::ArgValue>,
    timeout_seconds: u64,
) -> bool {
    let token = CancellationToken::new();
    let ctx = TaskContext::new(uuid, token.clone());
    let mut invocation = tokio::spawn(async move { handler.run(ctx, args).await });

    if timeout_seconds == 0 {
        settle(uuid, invocation.await);
        return false;
    }

    tokio::select! {
        result = &mut invocation => {
            settle(uuid, result);
            false
        }
        _ = tokio::time::sleep(Duration::from_secs(timeout_seconds)) => {
            token.cancel();
            true
        }
    }
}

/// Failures are contained here: logged, never propagated, never allowed
/// to influence the acknowledgment already decided by the caller.
fn settle(uuid: &str, result: Result<HandlerResult, JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("Task {} failed: {:#}", uuid, err),
        Err(join_err) if join_err.is_panic() => {
            error!("Task {} panicked: {:?}", uuid, join_err);
        }
        Err(join_err) => error!("Task {} was cancelled: {:?}", uuid, join_err),
    }
}
