//
// scheduler/worker_queue.rs
//
// Single-threaded FIFO executor owning a piece of state
//

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};

use crate::error::{HeronError, HeronResult};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run(Job<S>),
    Stop,
}

/// Result of a job submitted to a [`WorkerQueue`].
///
/// Await it from async code, or call [`Pending::wait`] from a plain thread.
/// Resolves to [`HeronError::WorkerGone`] when the worker stopped before the
/// job ran or the job panicked.
pub struct Pending<R> {
    name: &'static str,
    rx: oneshot::Receiver<R>,
}

impl<R> Pending<R> {
    /// Block the current thread until the job finished.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> HeronResult<R> {
        let name = self.name;
        self.rx.blocking_recv().map_err(|_| HeronError::WorkerGone(name))
    }
}

impl<R> Future for Pending<R> {
    type Output = HeronResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let name = self.name;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| HeronError::WorkerGone(name)))
    }
}

/// Cloneable submission side of a [`WorkerQueue`]
pub struct WorkerHandle<S> {
    name: &'static str,
    tx: mpsc::UnboundedSender<Message<S>>,
}

impl<S> Clone for WorkerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> WorkerHandle<S> {
    /// Queue `job` behind everything submitted before it
    pub fn submit<R, F>(&self, job: F) -> Pending<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let name = self.name;
        let wrapped: Job<S> = Box::new(move |state: &mut S| {
            match std::panic::catch_unwind(AssertUnwindSafe(|| job(state))) {
                Ok(result) => {
                    let _ = tx.send(result);
                }
                Err(_) => log::error!("Job on worker '{}' panicked", name),
            }
        });
        if self.tx.send(Message::Run(wrapped)).is_err() {
            log::warn!("Worker '{}' is gone, dropping job", name);
        }
        Pending { name, rx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A named thread that runs submitted jobs one at a time, in submission
/// order, against state only it can touch.
pub struct WorkerQueue<S> {
    handle: WorkerHandle<S>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl<S: Send + 'static> WorkerQueue<S> {
    pub fn spawn(name: &'static str, state: S) -> HeronResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message<S>>();
        let thread = std::thread::Builder::new()
            .name(format!("heron-{}", name))
            .spawn(move || {
                let mut state = state;
                log::trace!("Worker '{}' started", name);
                while let Some(Message::Run(job)) = rx.blocking_recv() {
                    job(&mut state);
                }
                log::trace!("Worker '{}' stopped", name);
            })?;
        let thread_id = thread.thread().id();
        Ok(Self {
            handle: WorkerHandle { name, tx },
            thread: Some(thread),
            thread_id,
        })
    }

    pub fn handle(&self) -> WorkerHandle<S> {
        self.handle.clone()
    }

    pub fn submit<R, F>(&self, job: F) -> Pending<R>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.submit(job)
    }

    pub fn name(&self) -> &'static str {
        self.handle.name
    }
}

impl<S> Drop for WorkerQueue<S> {
    fn drop(&mut self) {
        // Jobs queued before this point still run; later submissions fail
        let _ = self.handle.tx.send(Message::Stop);
        if let Some(thread) = self.thread.take() {
            if std::thread::current().id() == self.thread_id {
                return;
            }
            if thread.join().is_err() {
                log::error!("Worker '{}' terminated abnormally", self.handle.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let queue = WorkerQueue::spawn("test", Vec::<u32>::new()).unwrap();
        let mut pending = Vec::new();
        for i in 0..50 {
            pending.push(queue.submit(move |log: &mut Vec<u32>| {
                log.push(i);
                log.len()
            }));
        }
        let mut lens = Vec::new();
        for p in pending {
            lens.push(p.await.unwrap());
        }
        assert_eq!(lens, (1..=50).collect::<Vec<_>>());
        let snapshot = queue.submit(|log: &mut Vec<u32>| log.clone()).await.unwrap();
        assert_eq!(snapshot, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_blocking_wait() {
        let queue = WorkerQueue::spawn("blocking", 41u32).unwrap();
        let value = queue
            .submit(|n: &mut u32| {
                *n += 1;
                *n
            })
            .wait()
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let queue = WorkerQueue::spawn("panics", 0u32).unwrap();
        let failed = queue.submit(|_: &mut u32| -> u32 { panic!("boom") }).await;
        assert!(matches!(failed, Err(HeronError::WorkerGone("panics"))));
        let ok = queue.submit(|n: &mut u32| *n + 1).await.unwrap();
        assert_eq!(ok, 1);
    }

    #[test]
    fn test_drop_runs_queued_jobs() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let queue = WorkerQueue::spawn("drain", ()).unwrap();
            for i in 0..10 {
                let seen = seen.clone();
                let _ = queue.submit(move |_: &mut ()| seen.lock().unwrap().push(i));
            }
        }
        assert_eq!(seen.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let queue = WorkerQueue::spawn("gone", ()).unwrap();
        let handle = queue.handle();
        drop(queue);
        let late = handle.submit(|_: &mut ()| 1).await;
        assert!(matches!(late, Err(HeronError::WorkerGone("gone"))));
    }
}
