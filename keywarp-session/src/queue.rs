//! Serialized task queue: the agent's only synchronization primitive.
//!
//! A single consumer task owns the state value; work arrives as boxed
//! closures over an unbounded channel and runs strictly in submission order.
//! Collaborators deliver their events from arbitrary tasks and threads, but
//! they only ever reach the state by submitting a task here, so the state
//! itself needs no locks.

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Task<S>),
    Terminate,
}

/// Cloneable submission side of a [`SerialQueue`].
pub struct QueueHandle<S> {
    tx: mpsc::UnboundedSender<Message<S>>,
}

impl<S> Clone for QueueHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> QueueHandle<S> {
    /// Submit a unit of work. Callable from any thread; work submitted after
    /// [`SerialQueue::terminate`] is silently dropped.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let _ = self.tx.send(Message::Run(Box::new(task)));
    }
}

/// Single-consumer FIFO executor owning a state value of type `S`.
pub struct SerialQueue<S> {
    handle: QueueHandle<S>,
    worker: JoinHandle<S>,
}

impl<S: Send + 'static> SerialQueue<S> {
    /// Spawn the consumer. `build` receives a handle to the queue being
    /// created so the state can wire its own event pumps back into it.
    pub fn new(build: impl FnOnce(QueueHandle<S>) -> S) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = QueueHandle { tx };
        let mut state = build(handle.clone());

        let worker = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Message::Run(task) => task(&mut state),
                    // Stop intake; recv keeps yielding already-queued tasks
                    // until the buffer is drained.
                    Message::Terminate => rx.close(),
                }
            }
            state
        });

        Self { handle, worker }
    }

    pub fn handle(&self) -> QueueHandle<S> {
        self.handle.clone()
    }

    /// Stop accepting new work, run every already-queued task to completion,
    /// and return the state.
    pub async fn terminate(self) -> Result<S, JoinError> {
        let _ = self.handle.tx.send(Message::Terminate);
        self.worker.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let queue = SerialQueue::new(|_| Vec::<usize>::new());
        let handle = queue.handle();
        for n in 0..1000 {
            handle.submit(move |seen| seen.push(n));
        }
        let seen = queue.terminate().await.expect("terminate");
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn terminate_drains_queued_tasks_before_returning() {
        let queue = SerialQueue::new(|_| 0usize);
        let handle = queue.handle();
        for _ in 0..100 {
            handle.submit(|count| *count += 1);
        }
        let count = queue.terminate().await.expect("terminate");
        assert_eq!(count, 100, "every task submitted before terminate must run");
    }

    #[tokio::test]
    async fn submissions_after_terminate_are_silently_dropped() {
        let ran = Arc::new(AtomicUsize::new(0));
        let queue = SerialQueue::new(|_| ());
        let handle = queue.handle();
        queue.terminate().await.expect("terminate");

        let ran_in_task = ran.clone();
        handle.submit(move |()| {
            ran_in_task.fetch_add(1, Ordering::SeqCst);
        });
        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0, "dropped, not executed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cross_thread_submissions_never_run_concurrently() {
        // Each task bumps a "currently running" counter and asserts it was
        // the only one inside.
        let running = Arc::new(AtomicUsize::new(0));
        let queue = SerialQueue::new(|_| 0usize);

        let mut producers = Vec::new();
        for _ in 0..8 {
            let handle = queue.handle();
            let running = running.clone();
            producers.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let running = running.clone();
                    handle.submit(move |count| {
                        assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                        *count += 1;
                        running.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }));
        }
        for producer in producers {
            producer.join().expect("producer thread");
        }

        let count = queue.terminate().await.expect("terminate");
        assert_eq!(count, 8 * 50);
    }

    #[tokio::test]
    async fn handle_outlives_queue_without_panicking() {
        let queue = SerialQueue::new(|_| ());
        let handle = queue.handle();
        drop(queue.terminate().await);
        handle.submit(|()| {});
    }
}
