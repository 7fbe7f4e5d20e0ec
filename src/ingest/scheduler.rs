// src/ingest/scheduler.rs
//! Single-lane fetch queue: tasks for one instance run one at a time, in the
//! order they were queued, with a pause between them so the source is never
//! hit with a burst.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

pub type FetchTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<FetchTask>,
    running: bool,
}

pub struct FetchQueue {
    name: String,
    state: Mutex<QueueState>,
}

impl FetchQueue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a task. Nothing runs until `start`.
    pub fn enqueue<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.lock().pending.push_back(Box::pin(task));
    }

    /// Begin draining. Each task is awaited to completion, then the queue
    /// waits `pacing` before the next one. Returns `None` when a drain is
    /// already in progress (the new tasks ride along with it) or there is
    /// nothing to run.
    pub fn start(self: &Arc<Self>, pacing: Duration) -> Option<JoinHandle<()>> {
        let first = {
            let mut st = self.lock();
            if st.running {
                tracing::debug!(target: "queue", queue = %self.name, pending = st.pending.len(), "already draining");
                return None;
            }
            let first = st.pending.pop_front()?;
            st.running = true;
            first
        };

        let queue = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut next = Some(first);
            while let Some(task) = next {
                // A panicking task counts as a failed one; the queue still advances.
                if let Err(e) = tokio::spawn(task).await {
                    tracing::warn!(target: "queue", queue = %queue.name, error = %e, "task aborted");
                }
                next = queue.task_done();
                if next.is_some() {
                    tokio::time::sleep(pacing).await;
                }
            }
            tracing::trace!(target: "queue", queue = %queue.name, "drained");
        }))
    }

    /// The running task finished, successfully or not. Hands back the next
    /// task, or marks the queue idle when none remain. Both happen under one
    /// lock so a concurrent `start` never sees a half-finished drain.
    fn task_done(&self) -> Option<FetchTask> {
        let mut st = self.lock();
        let next = st.pending.pop_front();
        if next.is_none() {
            st.running = false;
        }
        next
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn runs_in_fifo_order_with_pacing() {
        let q = FetchQueue::new("t");
        let log = Arc::new(StdMutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            q.enqueue(async move {
                log.lock().unwrap().push((i, Instant::now()));
                tokio::time::sleep(Duration::from_millis(100)).await;
            });
        }
        assert_eq!(q.pending(), 3);
        assert!(!q.is_running());

        let h = q.start(Duration::from_millis(500)).expect("drain started");
        h.await.unwrap();

        let log = log.lock().unwrap();
        let order: Vec<_> = log.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
        for w in log.windows(2) {
            // previous task (100ms) + pacing (500ms)
            assert!(w[1].1 - w[0].1 >= Duration::from_millis(600));
        }
        assert!(!q.is_running());
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_a_noop_and_late_tasks_still_run() {
        let q = FetchQueue::new("t");
        let hits = Arc::new(StdMutex::new(0usize));

        let h1 = Arc::clone(&hits);
        q.enqueue(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *h1.lock().unwrap() += 1;
        });
        let handle = q.start(Duration::from_millis(10)).unwrap();

        let h2 = Arc::clone(&hits);
        q.enqueue(async move {
            *h2.lock().unwrap() += 1;
        });
        assert!(q.start(Duration::from_millis(10)).is_none());

        handle.await.unwrap();
        assert_eq!(*hits.lock().unwrap(), 2);
        assert!(!q.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_does_not_wedge_the_queue() {
        let q = FetchQueue::new("t");
        let hits = Arc::new(StdMutex::new(0usize));

        q.enqueue(async { panic!("source blew up") });
        let h = Arc::clone(&hits);
        q.enqueue(async move {
            *h.lock().unwrap() += 1;
        });
        q.start(Duration::from_millis(10)).unwrap().await.unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert!(!q.is_running());

        let h = Arc::clone(&hits);
        q.enqueue(async move {
            *h.lock().unwrap() += 1;
        });
        q.start(Duration::from_millis(10))
            .expect("idle queue starts again")
            .await
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), 2);
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test]
    async fn empty_queue_does_not_start() {
        let q = FetchQueue::new("t");
        assert!(q.start(Duration::ZERO).is_none());
        assert!(!q.is_running());
    }
}
