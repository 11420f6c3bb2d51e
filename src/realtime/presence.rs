//! Keeping a viewer's presence record alive while they watch a task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tasklane_common::models::PresenceActivity;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::errors::StoreResult;
use crate::store::{DbHandle, PresenceAction, PresenceUpdate};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Where heartbeats go. The store implements it; tests record calls.
#[async_trait]
pub trait PresenceSink: Send + Sync + 'static {
    async fn heartbeat(&self, update: PresenceUpdate) -> StoreResult<PresenceAction>;

    async fn leave(&self, task_id: i64, user_id: i64) -> StoreResult<bool>;
}

#[async_trait]
impl PresenceSink for DbHandle {
    async fn heartbeat(&self, update: PresenceUpdate) -> StoreResult<PresenceAction> {
        self.call(move |db| db.update_presence(&update)).await
    }

    async fn leave(&self, task_id: i64, user_id: i64) -> StoreResult<bool> {
        self.call(move |db| db.remove_presence(task_id, user_id)).await
    }
}

/// Guard that reports `viewing` right away and then on every interval.
///
/// Stopping or dropping it cancels the timer and removes the presence record
/// once any in-flight heartbeat has landed. Neither heartbeats nor the
/// removal ever fail the caller; errors are logged.
pub struct PresenceHeartbeat {
    sink: Arc<dyn PresenceSink>,
    task_id: i64,
    user_id: i64,
    cancel: watch::Sender<bool>,
    timer: Option<JoinHandle<()>>,
}

impl PresenceHeartbeat {
    pub fn start(sink: Arc<dyn PresenceSink>, mut update: PresenceUpdate, every: Duration) -> Self {
        update.activity = Some(PresenceActivity::Viewing);
        let task_id = update.task_id;
        let user_id = update.user_id;
        let every = every.max(Duration::from_millis(1));
        let (cancel, mut cancelled) = watch::channel(false);

        let timer_sink = sink.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.changed() => break,
                    _ = ticker.tick() => {}
                }
                // not raced against cancellation: the store write runs to completion
                if let Err(e) = timer_sink.heartbeat(update.clone()).await {
                    tracing::warn!(task_id, user_id, error = %e, "presence heartbeat failed");
                }
            }
        });

        Self {
            sink,
            task_id,
            user_id,
            cancel,
            timer: Some(timer),
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the timer and wait for the presence record to be removed.
    pub async fn stop(mut self) {
        if let Some(timer) = self.timer.take() {
            let _ = self.cancel.send(true);
            leave_after(timer, self.sink.clone(), self.task_id, self.user_id).await;
        }
    }
}

impl Drop for PresenceHeartbeat {
    fn drop(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        let _ = self.cancel.send(true);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(leave_after(timer, self.sink.clone(), self.task_id, self.user_id));
            }
            Err(_) => {
                timer.abort();
                tracing::warn!(
                    task_id = self.task_id,
                    user_id = self.user_id,
                    "no runtime to remove presence on drop"
                );
            }
        }
    }
}

/// Remove the presence record after the timer task has exited.
async fn leave_after(timer: JoinHandle<()>, sink: Arc<dyn PresenceSink>, task_id: i64, user_id: i64) {
    if let Err(e) = timer.await {
        tracing::warn!(task_id, user_id, error = %e, "presence timer ended abnormally");
    }
    if let Err(e) = sink.leave(task_id, user_id).await {
        tracing::warn!(task_id, user_id, error = %e, "failed to remove presence");
    }
}
