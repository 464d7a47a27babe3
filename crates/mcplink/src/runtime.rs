//! Background execution context.
//!
//! A [`BackgroundRuntime`] owns one named OS thread driving a current-thread
//! tokio runtime. All transport I/O for a loaded server lives on that thread.
//! Foreground code, on any number of threads, submits futures with
//! [`BackgroundRuntime::run`] and blocks on a per-call rendezvous channel until
//! the future resolves.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Grace period used when the runtime is dropped without an explicit close.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Await `future`, failing with [`Error::Timeout`] once `deadline` passes.
///
/// Without a deadline the future runs until it resolves.
pub async fn with_deadline<T, F>(operation: String, deadline: Option<Duration>, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| Error::timeout(operation, limit))?,
        None => future.await,
    }
}

/// Dedicated worker thread with its own event loop.
pub struct BackgroundRuntime {
    name: String,
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    grace: Arc<Mutex<Duration>>,
    done: Mutex<Option<std_mpsc::Receiver<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl BackgroundRuntime {
    /// Start the worker and wait until its event loop is up.
    pub fn start(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::io::Result<()>>(1);
        let (done_tx, done_rx) = std_mpsc::sync_channel::<()>(1);
        let grace = Arc::new(Mutex::new(DEFAULT_CLOSE_GRACE));
        let worker_grace = grace.clone();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => {
                        let _ = ready_tx.send(Ok(()));
                        rt
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Jobs are spawned rather than awaited so a slow operation never
                // blocks the ones queued behind it.
                rt.block_on(async move {
                    while let Some(job) = job_rx.recv().await {
                        tokio::spawn(job);
                    }
                });

                let grace = *worker_grace.lock();
                rt.shutdown_timeout(grace);
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::Runtime(format!("failed to spawn worker thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(Error::Runtime(format!("failed to build event loop: {}", e)));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::Runtime("worker thread exited during startup".to_string()));
            }
        }

        debug!(worker = %name, "Background runtime started");

        Ok(Self {
            thread_id: thread.thread().id(),
            name,
            jobs: Mutex::new(Some(job_tx)),
            grace,
            done: Mutex::new(Some(done_rx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Worker thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker still accepts operations.
    pub fn is_running(&self) -> bool {
        self.jobs
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Whether the caller is on the worker thread.
    pub fn on_worker(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Run `future` on the worker and block until it resolves.
    ///
    /// Safe to call from many threads at once; each call has its own rendezvous.
    /// Calling this from the worker itself would deadlock and is rejected.
    pub fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.on_worker() {
            return Err(Error::Runtime(
                "run() called from the worker thread; await the operation instead".to_string(),
            ));
        }

        let (tx, rx) = std_mpsc::sync_channel::<Result<T>>(1);
        let job: Job = Box::pin(async move {
            let _ = tx.send(future.await);
        });

        {
            let jobs = self.jobs.lock();
            let sender = jobs
                .as_ref()
                .ok_or_else(|| Error::Runtime("background runtime is closed".to_string()))?;
            sender
                .send(job)
                .map_err(|_| Error::Runtime("background runtime has stopped".to_string()))?;
        }

        // The job (and its sender) is dropped if the runtime shuts down first.
        rx.recv()
            .map_err(|_| Error::Runtime("operation was cancelled by runtime shutdown".to_string()))?
    }

    /// Stop the worker, giving running tasks up to `grace` to finish.
    ///
    /// Idempotent. Never blocks longer than roughly `grace` plus thread teardown.
    pub fn close(&self, grace: Duration) {
        let Some(jobs) = self.jobs.lock().take() else {
            return;
        };
        *self.grace.lock() = grace;
        drop(jobs);

        if self.on_worker() {
            // Joining ourselves would deadlock; the loop exits on its own.
            return;
        }

        let done = self.done.lock().take();
        let finished = match done {
            Some(done) => done.recv_timeout(grace + Duration::from_secs(1)).is_ok(),
            None => true,
        };

        if let Some(thread) = self.thread.lock().take() {
            if finished {
                let _ = thread.join();
                debug!(worker = %self.name, "Background runtime stopped");
            } else {
                warn!(worker = %self.name, "Background runtime did not stop in time; detaching");
            }
        }
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        self.close(DEFAULT_CLOSE_GRACE);
    }
}
