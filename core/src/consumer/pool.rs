use crate::{RelaymqError, Result};
use crossbeam::channel;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool running consumer delivery callbacks.
///
/// Workers exit once every handle to the pool has been dropped and the job channel
/// drains. A panicking job is logged and does not take its worker down.
pub struct WorkerPool {
    sender: channel::Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize, name: &str) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();

        for i in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
                            error!("Delivery task panicked: {}", panic_message(&panic));
                        }
                    }
                    debug!("Worker {} stopped", i);
                })?;
        }

        Ok(Self { sender, size })
    }

    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Box::new(job))
            .map_err(|_| RelaymqError::Shutdown("delivery pool has no workers".to_string()))
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
