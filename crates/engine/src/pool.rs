use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinSet;

use mcall_core::{Context, ResultRecord, WorkItem};

use crate::api::EngineConfig;
use crate::worker::{self, BatchRuntime};

// One queued unit of work: the item plus the channel its result travels
// back on. The pool never keeps item state beyond the executing worker.
pub(crate) struct Commander {
    pub(crate) item: WorkItem,
    pub(crate) reply: oneshot::Sender<ResultRecord>,
}

/// A fixed fleet of workers consuming one bounded request queue.
///
/// Workers pull items, execute them (probe, validation, remediation), and
/// send each result back on its per-item channel. Results are not emitted
/// in submission order; callers reassemble order from the reply channels
/// they hold.
pub struct Pool {
    tx: mpsc::Sender<Commander>,
    done_tx: watch::Sender<bool>,
    stopped: AtomicBool,
    workers: Mutex<JoinSet<()>>,
    runtime: Arc<BatchRuntime>,
}

impl Pool {
    /// Starts a fresh pool (and a fresh per-batch dedup memo).
    pub fn start(cfg: &EngineConfig, ctx: Arc<Context>) -> anyhow::Result<Self> {
        let runtime = Arc::new(BatchRuntime::new(ctx)?);
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let (done_tx, done_rx) = watch::channel(false);

        let mut workers = JoinSet::new();
        for _ in 0..cfg.workers.max(1) {
            workers.spawn(worker::run_worker(
                rx.clone(),
                done_rx.clone(),
                runtime.clone(),
            ));
        }

        Ok(Self {
            tx,
            done_tx,
            stopped: AtomicBool::new(false),
            workers: Mutex::new(workers),
            runtime,
        })
    }

    /// Submits one item, awaiting while the request queue is full. The
    /// returned receiver yields the item's result record.
    pub async fn submit(&self, item: WorkItem) -> oneshot::Receiver<ResultRecord> {
        let (reply, rx) = oneshot::channel();
        // A send failure means every worker is gone; the dropped reply
        // sender then surfaces as a recv error at the collection site.
        let _ = self.tx.send(Commander { item, reply }).await;
        rx
    }

    /// Signals workers to exit; items already executing run to completion.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.done_tx.send(true);
        }
    }

    /// Returns once every worker has exited.
    pub async fn wait(&self) {
        let mut workers = self.workers.lock().await;
        while workers.join_next().await.is_some() {}
    }

    pub(crate) fn runtime(&self) -> &BatchRuntime {
        &self.runtime
    }
}
