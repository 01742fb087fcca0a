//! Fixed-size worker pool for per-file directive extraction. Workers pull
//! jobs off a shared channel and hand results back through per-job channels;
//! they own nothing mutable.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A submitted job's worker died before delivering a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("worker pool task failed to deliver a result")]
pub struct PoolError;

/// Handle to one in-flight job. `join` blocks until the worker delivers.
pub struct JobHandle<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> JobHandle<T> {
    pub fn join(self) -> Result<T, PoolError> {
        self.receiver.recv().map_err(|_| PoolError)
    }
}

pub struct WorkerPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (clamped to at least one).
    pub fn new(threads: usize) -> WorkerPool {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..threads.max(1))
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("ifttt-worker-{index}"))
                    .spawn(move || loop {
                        let job = match receiver.lock() {
                            Ok(guard) => guard.recv(),
                            Err(_) => break,
                        };
                        match job {
                            Ok(job) => job(),
                            // Channel closed: the pool is shutting down.
                            Err(_) => break,
                        }
                    })
                    .expect("spawning a worker thread")
            })
            .collect();
        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue one job. If every worker has died the returned handle's `join`
    /// reports a `PoolError`.
    pub fn submit<T, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_sender, receiver) = mpsc::channel();
        let boxed: Job = Box::new(move || {
            let _ = result_sender.send(job());
        });
        if let Some(sender) = &self.sender {
            let _ = sender.send(boxed);
        }
        JobHandle { receiver }
    }

    /// Drain queued work and join every worker. Queued jobs still run; the
    /// pool is unusable afterwards.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.teardown();
    }
}
