//! Bounded tile scheduler.
//!
//! A fixed set of `W` worker tasks pull jobs from one bounded queue of
//! capacity `W`, so at most `2W` jobs are in flight or queued at any time.
//! [`BoundedScheduler::submit`] waits when the queue is full, which throttles
//! level enumeration to the speed of the workers.
//!
//! ```text
//!  driver ──submit──► [ queue (W) ] ──► worker 0 ─┐
//!     ▲                               ├─► worker 1 ─┤ oneshot result
//!     │                               └─► worker W ─┤
//!     └──────────── LevelJoin::wait ◄───────────────┘
//! ```
//!
//! Every submission returns a [`CompletionToken`]. Tokens of one level are
//! collected in a [`LevelJoin`], which is the level barrier: it resolves
//! only once every task has finished, then reports the first failure.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::ConvertError;

type Job = Pin<Box<dyn Future<Output = Result<(), ConvertError>> + Send + 'static>>;

struct Submission {
    job: Job,
    done: oneshot::Sender<Result<(), ConvertError>>,
}

// =============================================================================
// Completion Tokens
// =============================================================================

/// Resolves with the result of one submitted job.
pub struct CompletionToken(oneshot::Receiver<Result<(), ConvertError>>);

impl CompletionToken {
    /// Wait for the job to finish.
    ///
    /// A worker that vanished without reporting yields [`ConvertError::WorkerLost`].
    pub async fn wait(self) -> Result<(), ConvertError> {
        self.0.await.unwrap_or(Err(ConvertError::WorkerLost))
    }
}

/// All completion tokens of one level.
#[derive(Default)]
pub struct LevelJoin {
    tokens: Vec<CompletionToken>,
}

impl LevelJoin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: CompletionToken) {
        self.tokens.push(token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Wait for every token, then return the first failure in submission order.
    pub async fn wait(self) -> Result<(), ConvertError> {
        let mut first_error = None;
        for token in self.tokens {
            if let Err(e) = token.wait().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Bounded Scheduler
// =============================================================================

/// Fixed-size worker pool with a bounded submission queue.
pub struct BoundedScheduler {
    sender: Option<mpsc::Sender<Submission>>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,

    /// Set by the first failing job
    failed: Arc<AtomicBool>,
}

impl BoundedScheduler {
    /// Spawn `worker_count` workers on the current tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel(worker_count);
        let receiver = Arc::new(Mutex::new(receiver));
        let failed = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&failed),
                ))
            })
            .collect();

        debug!("Started {} tile workers", worker_count);
        Self {
            sender: Some(sender),
            workers,
            worker_count,
            failed,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether any job has failed so far.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Queue a job, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Interrupted`] if the scheduler is shutting down.
    pub async fn submit<F>(&self, job: F) -> Result<CompletionToken, ConvertError>
    where
        F: Future<Output = Result<(), ConvertError>> + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or(ConvertError::Interrupted("the tile queue"))?;

        let (done, token) = oneshot::channel();
        sender
            .send(Submission {
                job: Box::pin(job),
                done,
            })
            .await
            .map_err(|_| ConvertError::Interrupted("the tile queue"))?;
        Ok(CompletionToken(token))
    }

    /// Close the queue and wait for every worker to exit.
    ///
    /// Jobs already queued still run to completion.
    pub async fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!("Tile worker terminated abnormally: {}", e);
            }
        }
        debug!("All {} tile workers stopped", self.worker_count);
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Submission>>>,
    failed: Arc<AtomicBool>,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(Submission { job, done }) = next else {
            break;
        };

        // A panicking job fails its own token; the worker keeps serving the queue
        let result = match AssertUnwindSafe(job).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                error!("Tile worker {} caught a panicking job", id);
                Err(ConvertError::WorkerLost)
            }
        };
        if result.is_err() {
            failed.store(true, Ordering::SeqCst);
        }
        // The driver may have stopped listening; the result is still recorded above
        let _ = done.send(result);
    }
    debug!("Tile worker {} exiting", id);
}
