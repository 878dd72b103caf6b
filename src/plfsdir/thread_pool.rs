//! Background worker pool used by the engine for block write-out

use std::io;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named worker threads
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `size` workers
    ///
    /// Fails if any worker thread cannot be spawned; already started
    /// workers are shut down again.
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "thread pool needs at least one worker",
            ));
        }

        let (sender, receiver) = unbounded::<Job>();

        let mut pool = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(size),
        };

        for id in 0..size {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("plfsdir-bg-{}", id))
                .spawn(move || worker_loop(receiver))?;
            pool.workers.push(handle);
        }

        tracing::debug!("plfsdir thread pool started with {} workers", size);
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job for execution on one of the workers
    pub fn schedule<F>(&self, job: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "thread pool shut down"))?;

        sender
            .send(Box::new(job))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "thread pool workers exited"))
    }
}

/// Run jobs until every sender is gone
fn worker_loop(receiver: Receiver<Job>) {
    for job in receiver.iter() {
        job();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("plfsdir worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_zero_workers_rejected() {
        assert!(ThreadPool::new(0).is_err());
    }

    #[test]
    fn test_jobs_run_before_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let pool = ThreadPool::new(3).unwrap();
            assert_eq!(pool.size(), 3);

            for _ in 0..32 {
                let counter = counter.clone();
                pool.schedule(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }

        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_workers_run_concurrently() {
        // Every worker must hold a job at the same time to pass the barrier
        let pool = ThreadPool::new(4).unwrap();
        let barrier = Arc::new(Barrier::new(4));
        let (done_tx, done_rx) = unbounded();

        for _ in 0..4 {
            let barrier = barrier.clone();
            let done_tx = done_tx.clone();
            pool.schedule(move || {
                barrier.wait();
                done_tx.send(()).unwrap();
            })
            .unwrap();
        }

        for _ in 0..4 {
            done_rx
                .recv_timeout(std::time::Duration::from_secs(10))
                .unwrap();
        }
    }
}
