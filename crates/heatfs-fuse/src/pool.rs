//! Worker threads for blocking file I/O.
//!
//! The FUSE session thread only decodes requests and routes them. Reads,
//! writes and syncs run here, so a slow disk read or a heatmap render on
//! one file does not hold up requests for every other file.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, SendError, Sender};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named threads draining a shared job queue.
#[derive(Debug)]
pub struct IoPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl IoPool {
    /// Start `threads` workers (at least one).
    pub fn new(threads: usize) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("heatfs-io-{index}"))
                    .spawn(move || worker(receiver))
            })
            .collect::<io::Result<Vec<_>>>()?;

        debug!(threads = workers.len(), "I/O pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job` for a worker.
    ///
    /// Should every worker have died, the job runs on the caller's thread
    /// so the request still gets its reply.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        match &self.sender {
            Some(sender) => {
                if let Err(SendError(job)) = sender.send(job) {
                    warn!("I/O pool has no workers left, running inline");
                    job();
                }
            }
            None => job(),
        }
    }
}

fn worker(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        job();
    }
}

impl Drop for IoPool {
    /// Finish queued jobs, then stop the workers.
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("I/O worker panicked");
            }
        }
    }
}
