//! Strictly sequential task queue guarding index writes.
//!
//! Tasks run one at a time in submission order on a spawned run loop. The
//! queue reports `Running` when work arrives on an idle queue and `Idle` when
//! it drains or is cleared. State notifications are sent through a channel
//! while the queue lock is held and delivered by a dispatcher task, so
//! listeners always observe transitions in the order they happened and may
//! call back into the queue.

use aide_core::{Emitter, Subscription};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Observable queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
}

/// A unit of queued work. Tasks handle their own errors.
pub type QueueTask = BoxFuture<'static, ()>;

struct Shared {
    tasks: VecDeque<QueueTask>,
    running: bool,
    disposed: bool,
    /// Bumped by `clear`/`dispose` so a superseded run loop stops quietly.
    generation: u64,
}

struct Inner {
    shared: Mutex<Shared>,
    /// Held while a task executes, so a loop started after `clear` waits
    /// for the in-flight task of the previous loop.
    exec: tokio::sync::Mutex<()>,
    state_tx: mpsc::UnboundedSender<QueueState>,
    on_state_change: Arc<Emitter<QueueState>>,
    task_timeout: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Single-worker FIFO queue. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct EmbeddingQueue {
    inner: Arc<Inner>,
}

impl EmbeddingQueue {
    /// Create a queue whose tasks are abandoned after `task_timeout`.
    pub fn new(task_timeout: Duration) -> Self {
        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        let on_state_change = Arc::new(Emitter::new());

        let emitter = on_state_change.clone();
        tokio::spawn(async move {
            while let Some(state) = state_rx.recv().await {
                emitter.fire(&state);
            }
        });

        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    tasks: VecDeque::new(),
                    running: false,
                    disposed: false,
                    generation: 0,
                }),
                exec: tokio::sync::Mutex::new(()),
                state_tx,
                on_state_change,
                task_timeout,
            }),
        }
    }

    /// Append a task, starting the run loop if the queue was idle.
    pub fn add(&self, task: QueueTask) {
        let mut shared = self.inner.lock();
        if shared.disposed {
            tracing::debug!("Ignoring task submitted to a disposed queue");
            return;
        }

        shared.tasks.push_back(task);
        if !shared.running {
            shared.running = true;
            let _ = self.inner.state_tx.send(QueueState::Running);
            let generation = shared.generation;
            tokio::spawn(run_loop(self.inner.clone(), generation));
        }
    }

    /// Drop every task that has not started yet and report `Idle`.
    ///
    /// A task that is already executing runs to completion.
    pub fn clear(&self) {
        let dropped = {
            let mut shared = self.inner.lock();
            let dropped = std::mem::take(&mut shared.tasks);
            shared.generation += 1;
            if shared.running {
                shared.running = false;
                let _ = self.inner.state_tx.send(QueueState::Idle);
            }
            dropped
        };
        tracing::debug!("Cleared {} pending index tasks", dropped.len());
    }

    /// Clear the queue, release listeners and ignore later submissions.
    pub fn dispose(&self) {
        self.clear();
        self.inner.lock().disposed = true;
        self.inner.on_state_change.dispose();
    }

    pub fn state(&self) -> QueueState {
        if self.inner.lock().running {
            QueueState::Running
        } else {
            QueueState::Idle
        }
    }

    /// Number of tasks waiting to start.
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueueState) + Send + Sync + 'static,
    {
        self.inner.on_state_change.subscribe(listener)
    }
}

impl std::fmt::Debug for EmbeddingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingQueue")
            .field("state", &self.state())
            .field("pending", &self.len())
            .finish()
    }
}

async fn run_loop(inner: Arc<Inner>, generation: u64) {
    loop {
        let task = {
            let mut shared = inner.lock();
            if shared.generation != generation {
                return;
            }
            match shared.tasks.pop_front() {
                Some(task) => task,
                None => {
                    shared.running = false;
                    let _ = inner.state_tx.send(QueueState::Idle);
                    return;
                }
            }
        };

        let _exec = inner.exec.lock().await;
        run_guarded(task, inner.task_timeout).await;
    }
}

async fn run_guarded(task: QueueTask, timeout: Duration) {
    match tokio::time::timeout(timeout, AssertUnwindSafe(task).catch_unwind()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => tracing::error!("Index task panicked; continuing with the next task"),
        Err(_) => tracing::warn!(
            "Index task exceeded {:?}; abandoning it and continuing",
            timeout
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn recorder(queue: &EmbeddingQueue) -> (Arc<Mutex<Vec<QueueState>>>, Subscription) {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        let sub = queue.on_state_change(move |s| sink.lock().unwrap().push(*s));
        (states, sub)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_runs_in_submission_order() {
        let queue = EmbeddingQueue::new(Duration::from_secs(5));
        let (states, _sub) = recorder(&queue);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u32 {
            let order = order.clone();
            queue.add(Box::pin(async move {
                // Later tasks finish faster; order must still hold.
                tokio::time::sleep(Duration::from_millis(u64::from(5 - i) * 3)).await;
                order.lock().unwrap().push(i);
            }));
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            *states.lock().unwrap(),
            vec![QueueState::Running, QueueState::Idle]
        );
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn test_each_busy_run_reports_once() {
        let queue = EmbeddingQueue::new(Duration::from_secs(5));
        let (states, _sub) = recorder(&queue);

        queue.add(Box::pin(async {}));
        settle().await;
        queue.add(Box::pin(async {}));
        queue.add(Box::pin(async {}));
        settle().await;

        assert_eq!(
            *states.lock().unwrap(),
            vec![
                QueueState::Running,
                QueueState::Idle,
                QueueState::Running,
                QueueState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn test_clear_keeps_in_flight_task_only() {
        let queue = EmbeddingQueue::new(Duration::from_secs(5));
        let (states, _sub) = recorder(&queue);
        let ran = Arc::new(Mutex::new(Vec::new()));

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let r = ran.clone();
        queue.add(Box::pin(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            r.lock().unwrap().push("A");
        }));
        for name in ["B", "C"] {
            let r = ran.clone();
            queue.add(Box::pin(async move {
                r.lock().unwrap().push(name);
            }));
        }

        started_rx.await.unwrap();
        queue.clear();
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(queue.is_empty());

        release_tx.send(()).unwrap();
        settle().await;

        assert_eq!(*ran.lock().unwrap(), vec!["A"]);
        assert_eq!(
            *states.lock().unwrap(),
            vec![QueueState::Running, QueueState::Idle]
        );
    }

    #[tokio::test]
    async fn test_work_after_clear_waits_for_in_flight_task() {
        let queue = EmbeddingQueue::new(Duration::from_secs(5));
        let ran = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let r = ran.clone();
        queue.add(Box::pin(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            r.lock().unwrap().push("old");
        }));
        started_rx.await.unwrap();
        queue.clear();

        let r = ran.clone();
        queue.add(Box::pin(async move {
            r.lock().unwrap().push("new");
        }));
        settle().await;
        assert!(ran.lock().unwrap().is_empty());

        release_tx.send(()).unwrap();
        settle().await;
        assert_eq!(*ran.lock().unwrap(), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_panicking_and_slow_tasks_do_not_stop_the_loop() {
        let queue = EmbeddingQueue::new(Duration::from_millis(30));
        let done = Arc::new(Mutex::new(false));

        queue.add(Box::pin(async {
            panic!("boom");
        }));
        queue.add(Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));
        let d = done.clone();
        queue.add(Box::pin(async move {
            *d.lock().unwrap() = true;
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(*done.lock().unwrap());
        assert_eq!(queue.state(), QueueState::Idle);
    }

    #[tokio::test]
    async fn test_dispose_ignores_new_work() {
        let queue = EmbeddingQueue::new(Duration::from_secs(5));
        let ran = Arc::new(Mutex::new(false));
        queue.dispose();

        let r = ran.clone();
        queue.add(Box::pin(async move {
            *r.lock().unwrap() = true;
        }));
        settle().await;

        assert!(!*ran.lock().unwrap());
        assert_eq!(queue.state(), QueueState::Idle);
    }
}
