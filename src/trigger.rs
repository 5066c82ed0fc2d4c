//! Reconcile scheduling: a coalescing trigger queue and the periodic tick.
//!
//! Informer events and the timer both land in a capacity-one channel drained
//! by a single worker task, which gives two guarantees at once: at most one
//! reconcile pass is in flight, and triggers arriving while a pass runs
//! collapse into a single follow-up pass instead of queueing up.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::error::Result;

/// Cadence of the unconditional periodic reconcile.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(180);

/// Handle used by informer callbacks (and the timer) to request a reconcile.
#[derive(Clone)]
pub struct ReconcileQueue {
    tx: mpsc::Sender<()>,
}

impl ReconcileQueue {
    /// Requests a reconcile pass. If one is already pending the request
    /// coalesces into it.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Creates the trigger queue and the receiver the worker drains.
pub fn queue() -> (ReconcileQueue, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (ReconcileQueue { tx }, rx)
}

/// Runs reconcile passes one at a time as triggers arrive. Pass failures
/// abort only the current pass; the next trigger or tick retries with fresh
/// caches.
pub fn spawn_worker<F, Fut>(mut rx: mpsc::Receiver<()>, mut pass: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            if let Err(err) = pass().await {
                warn!(error = %err, "reconcile pass aborted");
            }
        }
    })
}

/// Fires the queue on a fixed cadence. Ticks that would overlap a running
/// pass are skipped by the queue's coalescing, not deferred.
pub fn spawn_periodic(queue: ReconcileQueue, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick fires immediately; startup already triggers a pass
        tick.tick().await;
        loop {
            tick.tick().await;
            queue.trigger();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_triggers_coalesce() {
        let (queue, mut rx) = super::queue();
        for _ in 0..5 {
            queue.trigger();
        }
        // exactly one pending trigger survives
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_worker_runs_one_pass_per_trigger() {
        let (queue, rx) = super::queue();
        let passes = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&passes);
        let worker = spawn_worker(rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        queue.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 1);

        queue.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 2);

        drop(queue);
        let _ = worker.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_fires_on_cadence() {
        let (queue, mut rx) = super::queue();
        let _periodic = spawn_periodic(queue, Duration::from_secs(180));

        // nothing before the first period elapses
        tokio::time::sleep(Duration::from_secs(179)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_ok());
    }
}
