//! Serial Background Worker
//!
//! One named thread draining one bounded FIFO queue. Jobs run strictly in
//! submission order, never concurrently with each other.
//!
//! ```text
//! caller ──try_send──▶ [ job | job | job ] ──▶ worker thread ──▶ handler(job)
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};

use crate::error::{Error, Result};

/// Why a job was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue is at capacity
    Full,
    /// Worker has been shut down
    Closed,
}

/// A single consumer thread with its queue
pub struct SerialWorker<J: Send + 'static> {
    name: &'static str,
    tx: Option<Sender<J>>,
    handle: Option<JoinHandle<()>>,
}

impl<J: Send + 'static> SerialWorker<J> {
    /// Spawn the worker thread
    ///
    /// A panicking job is logged and the worker keeps serving the queue.
    pub fn spawn<F>(name: &'static str, capacity: usize, mut handler: F) -> Result<Self>
    where
        F: FnMut(J) + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded::<J>(capacity);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!("Worker started: {}", name);
                for job in rx.iter() {
                    if catch_unwind(AssertUnwindSafe(|| handler(job))).is_err() {
                        tracing::error!("{}: job panicked", name);
                    }
                }
                tracing::debug!("Worker stopped: {}", name);
            })
            .map_err(|e| Error::Worker {
                message: format!("{name}: {e}"),
            })?;

        Ok(Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a job without blocking
    pub fn submit(&self, job: J) -> std::result::Result<(), SubmitError> {
        let Some(tx) = &self.tx else {
            return Err(SubmitError::Closed);
        };
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }

    /// Number of jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    /// Close the queue and wait for queued jobs to finish
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{}: worker thread panicked", self.name);
            }
        }
    }
}

impl<J: Send + 'static> Drop for SerialWorker<J> {
    fn drop(&mut self) {
        // Closing the queue lets the thread exit after its current job; an
        // in-flight query is not waited for.
        self.tx.take();
    }
}

impl<J: Send + 'static> std::fmt::Debug for SerialWorker<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialWorker")
            .field("name", &self.name)
            .field("queued", &self.queued())
            .field("running", &self.tx.is_some())
            .finish()
    }
}
