//! Notification dispatch.
//!
//! Table-level events (collection changes, loading completed, pulling
//! changed) are handed to a [`Dispatcher`] rather than invoked directly, so
//! an embedding application can marshal them onto its own thread.

use tokio::sync::mpsc;
use tracing::debug;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Queues jobs for a single [`DispatchLoop`], which runs them in order.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

pub struct DispatchLoop {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl ChannelDispatcher {
    pub fn new() -> (ChannelDispatcher, DispatchLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelDispatcher { tx }, DispatchLoop { rx })
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            debug!("dispatch loop gone, dropping notification");
        }
    }
}

impl DispatchLoop {
    /// Run queued jobs until every dispatcher handle has been dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
        debug!("dispatch loop stopped");
    }

    /// Run whatever is queued right now without waiting. Returns the number
    /// of jobs executed.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }
}
