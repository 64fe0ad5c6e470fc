//! Shutdown coordination for background tasks.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Broadcasts the stop signal and joins the tasks it tracks.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Track a spawned task so `drain` waits for it.
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of subscribers still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger, then wait up to `grace` for every tracked task.
    pub async fn drain(&self, grace: Duration) {
        self.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));

        let deadline = tokio::time::Instant::now() + grace;
        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Task stopped"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = name, grace = ?grace, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.track("listener", tokio::spawn(async move {
            let _ = rx.recv().await;
        }));

        shutdown.drain(Duration::from_secs(1)).await;
        assert_eq!(shutdown.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_task() {
        let shutdown = Shutdown::new();
        shutdown.track("stuck", tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));

        let started = std::time::Instant::now();
        shutdown.drain(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
