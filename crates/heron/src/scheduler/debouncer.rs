//
// scheduler/debouncer.rs
//
// Coalesces bursts of change signals into one task run
//

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::HeronResult;

/// Handed to every debounced task; turns true once a newer task superseded it
#[derive(Debug, Clone)]
pub struct CancelCheck(CancellationToken);

impl CancelCheck {
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

#[derive(Default)]
struct Activity {
    running: AtomicUsize,
    idle: Notify,
}

struct ActiveGuard(Arc<Activity>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs tasks on its own timer thread. At most one task is pending at any
/// time: scheduling a new one cancels the previous one, whether it is still
/// waiting out the delay or already running.
pub struct Debouncer {
    delay: Duration,
    runtime: Option<Runtime>,
    pending: Mutex<Option<CancellationToken>>,
    activity: Arc<Activity>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> HeronResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("heron-debounce")
            .enable_time()
            .build()?;
        Ok(Self {
            delay,
            runtime: Some(runtime),
            pending: Mutex::new(None),
            activity: Arc::new(Activity::default()),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` once the delay passed without another call
    pub fn schedule<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancelCheck) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(self.delay, task);
    }

    /// Run `task` now, cancelling whatever was pending
    pub fn submit_immediately<F, Fut>(&self, task: F)
    where
        F: FnOnce(CancelCheck) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(Duration::ZERO, task);
    }

    /// Cancel the pending task, if any
    pub fn cancel(&self) {
        if let Some(token) = self.lock_pending().take() {
            token.cancel();
        }
    }

    /// Resolves once no task is waiting or running
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.activity.idle.notified();
            if self.activity.running.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    fn spawn<F, Fut>(&self, delay: Duration, task: F)
    where
        F: FnOnce(CancelCheck) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };

        let token = CancellationToken::new();
        if let Some(previous) = self.lock_pending().replace(token.clone()) {
            previous.cancel();
        }

        self.activity.running.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(self.activity.clone());
        runtime.spawn(async move {
            let _guard = guard;
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => {
                        log::trace!("Debounced task superseded before it ran");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            task(CancelCheck(token)).await;
        });
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        // The guarded value is a plain token, a poisoned lock holds nothing half-written
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
