use futures::future::BoxFuture;
use std::time::Duration;
use tracing::trace;

use crate::domain::ports::{Timer, TimerHandle};

/// [`Timer`] backed by `tokio::time::sleep` on the current runtime.
///
/// Under `#[tokio::test(start_paused = true)]` the sleep runs on tokio's
/// virtual clock, so retry schedules are exercised without real waiting.
#[derive(Debug, Clone, Default)]
pub struct TokioTimer;

impl TokioTimer {
    pub fn new() -> Self {
        Self
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = cancel_rx => {
                    trace!(?delay, "Timer cancelled before firing");
                    return;
                }
            }
            // Dropping the handle without cancelling leaves the timer armed.
            // Once fired the task runs to completion.
            task.await;
        });

        TimerHandle::new(move || {
            let _ = cancel_tx.send(());
        })
    }
}
