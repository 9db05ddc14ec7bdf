//! Long-running background task handles.

use core::fmt::Display;
use core::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument, Span};

/// Handle to a spawned background task. Cancels the task's token when
/// dropped; the supervisor keeps one per listener and retry loop.
pub struct TaskHandle {
    token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn shutdown_and_wait(mut self) {
        self.token.cancel();
        let _ = (&mut self.join_handle).await;
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn a restarting background task.
///
/// `step` is invoked repeatedly; a clean return stops the task, an error is
/// logged and the task is restarted after a delay growing with consecutive
/// failures. Cancelling the token stops the loop.
pub fn spawn_restarting_task<E, F, Fut>(
    span: Span,
    token: CancellationToken,
    restart_delay: Duration,
    max_restart_delay: Duration,
    mut step: F,
) -> TaskHandle
where
    E: Display + Send + 'static,
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: core::future::Future<Output = Result<(), E>> + Send + 'static,
{
    let task_token = token.clone();

    let join_handle = tokio::spawn(
        async move {
            let mut delay = restart_delay;

            loop {
                if task_token.is_cancelled() {
                    break;
                }

                match step(task_token.child_token()).await {
                    Ok(()) => {
                        debug!("task finished cleanly");
                        break;
                    }
                    Err(e) => {
                        error!("task failed: {e}, restarting in {delay:?}");

                        tokio::select! {
                            _ = task_token.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }

                        delay = delay.saturating_mul(2).min(max_restart_delay);
                    }
                }
            }

            debug!("task terminated");
        }
        .instrument(span),
    );

    TaskHandle { token, join_handle }
}
