//! Fixed-size worker pool for filter work items.

use crossbeam_channel::{Receiver, Sender};
use frameserve_core::Result;
use std::thread::JoinHandle;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of OS worker threads draining a shared job queue.
pub struct ThreadPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (tx, rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("frameserve-worker-{i}"))
                .spawn(move || {
                    debug!("worker started");
                    for job in rx.iter() {
                        job();
                    }
                    debug!("worker stopped");
                })?;
            workers.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            workers,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue a unit of work. A queued job always eventually runs.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(job));
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Closing the channel lets workers drain and exit.
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
