//! The single worker thread that runs jobs one at a time.

use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tf_core::{Error, Result};
use tf_pipeline::TransformationJob;
use tokio::sync::mpsc;

/// A dedicated thread draining a FIFO queue of jobs.
///
/// Jobs run in submission order. Closing the queue lets the thread finish
/// whatever is still queued and exit.
pub struct Worker {
    queue: Mutex<Option<mpsc::UnboundedSender<TransformationJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Worker {
    /// Start the worker thread.
    pub fn spawn(thread_name: &str) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<TransformationJob>();

        let handle = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || {
                tracing::debug!("Worker started");
                while let Some(job) = rx.blocking_recv() {
                    let request_id = job.request_id().clone();
                    let outcome = job.run();
                    tracing::debug!(%request_id, %outcome, "Job finished");
                }
                tracing::debug!("Worker stopped");
            })
            .map_err(|source| Error::Io { source })?;

        Ok(Self {
            thread_id: handle.thread().id(),
            queue: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job behind every job submitted before it.
    ///
    /// # Errors
    ///
    /// Hands the job back untouched once the queue has been closed, so the
    /// caller can still end it and release what it holds.
    pub fn submit(&self, job: TransformationJob) -> std::result::Result<(), Box<TransformationJob>> {
        let queue = self.queue.lock();
        match queue.as_ref() {
            Some(tx) => tx.send(job).map_err(|rejected| Box::new(rejected.0)),
            None => Err(Box::new(job)),
        }
    }

    /// Whether the caller is running on the worker thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Close the queue and wait for the thread to drain it. When called from
    /// the worker thread itself the join is skipped.
    pub fn shutdown(&self) {
        self.queue.lock().take();

        if self.is_current() {
            tracing::debug!("Shutdown requested from the worker thread; not joining");
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("thread_id", &self.thread_id)
            .field("open", &self.queue.lock().is_some())
            .finish()
    }
}
