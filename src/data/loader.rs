//! Batch loader with optional worker threads
//!
//! With `num_workers == 0` batches are produced on demand in the calling
//! thread. Otherwise worker `w` loads batches `w, w + n, w + 2n, …` and
//! sends them over a bounded channel; the consumer parks early arrivals in
//! a reorder buffer so batches always come out in index order. Combined with
//! per-sample derived RNG streams this makes the batch sequence independent
//! of the worker count.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::batch::Batch;
use crate::error::{Error, Result};

/// Loads batch `i` of the current pass.
pub type LoadFn = Arc<dyn Fn(usize) -> Result<Batch> + Send + Sync>;

/// Batches each worker may have in flight before blocking.
pub const PREFETCH_FACTOR: usize = 2;

/// Iterator over the batches of one pass
pub struct BatchLoader {
    len: usize,
    next: usize,
    mode: Mode,
}

enum Mode {
    Inline(LoadFn),
    Workers(WorkerPool),
}

struct WorkerPool {
    rx: Option<Receiver<(usize, Result<Batch>)>>,
    pending: BTreeMap<usize, Result<Batch>>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl BatchLoader {
    /// Build a loader for `len` batches using `num_workers` threads.
    pub fn new(len: usize, num_workers: usize, load: LoadFn) -> Result<Self> {
        let workers = num_workers.min(len);
        let mode = if workers == 0 {
            Mode::Inline(load)
        } else {
            Mode::Workers(WorkerPool::spawn(len, workers, load)?)
        };
        Ok(Self { len, next: 0, mode })
    }

    /// Total number of batches in this pass.
    pub fn num_batches(&self) -> usize {
        self.len
    }
}

impl WorkerPool {
    fn spawn(len: usize, workers: usize, load: LoadFn) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(workers * PREFETCH_FACTOR);
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let tx = tx.clone();
            let load = Arc::clone(&load);
            let stop = Arc::clone(&stop);
            let handle = thread::Builder::new()
                .name(format!("data-loader-{worker}"))
                .spawn(move || {
                    for index in (worker..len).step_by(workers) {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        // receiver gone: the consumer stopped early
                        if tx.send((index, load(index))).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| Error::io("spawning data loader worker", e))?;
            handles.push(handle);
        }

        Ok(Self {
            rx: Some(rx),
            pending: BTreeMap::new(),
            stop,
            handles,
        })
    }

    fn take(&mut self, index: usize) -> Result<Batch> {
        loop {
            if let Some(batch) = self.pending.remove(&index) {
                return batch;
            }
            let Some(rx) = &self.rx else {
                return Err(Error::data("data loader already shut down"));
            };
            match rx.recv() {
                Ok((i, batch)) => {
                    self.pending.insert(i, batch);
                }
                Err(_) => {
                    return Err(Error::data(format!(
                        "data loader workers exited before producing batch {index}"
                    )));
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // unblock workers waiting on a full channel
        self.rx.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("data loader worker panicked");
            }
        }
    }
}

impl Iterator for BatchLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(match &mut self.mode {
            Mode::Inline(load) => load(index),
            Mode::Workers(pool) => pool.take(index),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchLoader {}
