use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::ports::{Timer, TimerHandle};

struct ArmedRetry {
    subscription_id: String,
    token: u64,
    handle: TimerHandle,
}

/// Book-keeping for armed retry timers, keyed by delivery id.
///
/// A delivery has at most one armed timer. The scheduler never touches
/// delivery records: a fired timer only runs the task it was given, and only
/// if the timer was not cancelled in the meantime.
pub struct RetryScheduler {
    timer: Arc<dyn Timer>,
    armed: Mutex<HashMap<String, ArmedRetry>>,
    next_token: AtomicU64,
}

impl RetryScheduler {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            timer,
            armed: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Run `task` after `delay` unless cancelled first.
    ///
    /// Re-arming a delivery cancels its previous timer.
    pub async fn arm(
        self: &Arc<Self>,
        delivery_id: &str,
        subscription_id: &str,
        delay: Duration,
        task: BoxFuture<'static, ()>,
    ) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let scheduler = Arc::clone(self);
        let id = delivery_id.to_string();

        let fire: BoxFuture<'static, ()> = Box::pin(async move {
            if scheduler.take(&id, token).await {
                task.await;
            } else {
                debug!(delivery_id = %id, "Stale retry timer ignored");
            }
        });

        let mut armed = self.armed.lock().await;
        let handle = self.timer.schedule(delay, fire);
        let previous = armed.insert(
            delivery_id.to_string(),
            ArmedRetry {
                subscription_id: subscription_id.to_string(),
                token,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.cancel();
        }

        debug!(
            delivery_id = %delivery_id,
            subscription_id = %subscription_id,
            delay_ms = delay.as_millis() as u64,
            "Retry armed"
        );
    }

    /// Claim a fired timer; false if it was cancelled or superseded
    async fn take(&self, delivery_id: &str, token: u64) -> bool {
        let mut armed = self.armed.lock().await;
        match armed.get(delivery_id) {
            Some(entry) if entry.token == token => {
                armed.remove(delivery_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel the armed timer of one delivery
    pub async fn cancel(&self, delivery_id: &str) -> bool {
        let removed = self.armed.lock().await.remove(delivery_id);
        match removed {
            Some(entry) => {
                entry.handle.cancel();
                debug!(delivery_id = %delivery_id, "Retry cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every armed timer belonging to a subscription
    pub async fn cancel_subscription(&self, subscription_id: &str) -> usize {
        let cancelled: Vec<ArmedRetry> = {
            let mut armed = self.armed.lock().await;
            let ids: Vec<String> = armed
                .iter()
                .filter(|(_, entry)| entry.subscription_id == subscription_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| armed.remove(id)).collect()
        };

        let count = cancelled.len();
        for entry in cancelled {
            entry.handle.cancel();
        }

        if count > 0 {
            info!(
                subscription_id = %subscription_id,
                cancelled_count = count,
                "Cancelled pending retries for subscription"
            );
        }
        count
    }

    pub async fn is_armed(&self, delivery_id: &str) -> bool {
        self.armed.lock().await.contains_key(delivery_id)
    }

    pub async fn armed_count(&self) -> usize {
        self.armed.lock().await.len()
    }
}
