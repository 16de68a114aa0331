//! Thread pool backed [`AioContext`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::{fmt, io, thread};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};

use crate::context::{AioContext, Job};

/// Setup a [`ThreadPool`].
///
/// This type implements a builder pattern, it's created via
/// [`ThreadPool::setup`].
#[derive(Debug, Clone)]
#[must_use = "`Setup` doesn't do anything until its `build`"]
pub struct Setup {
    /// Name prefix of the worker threads.
    name: String,
    /// Number of worker threads to create.
    threads: usize,
    /// Maximum number of operations queued before `spawn_blocking` blocks.
    queue_size: usize,
}

impl Setup {
    /// Default number of worker threads.
    pub const DEFAULT_THREADS: usize = 4;
    /// Default maximum number of queued operations.
    pub const DEFAULT_QUEUE_SIZE: usize = 64;

    /// See [`ThreadPool::setup`].
    pub fn new() -> Setup {
        Setup {
            name: "aio".to_owned(),
            threads: Setup::DEFAULT_THREADS,
            queue_size: Setup::DEFAULT_QUEUE_SIZE,
        }
    }

    /// Set the name prefix of the worker threads, defaults to `aio`.
    pub fn with_name(mut self, name: String) -> Setup {
        assert!(!name.is_empty(), "Can't use an empty thread name");
        self.name = name;
        self
    }

    /// Set the number of worker threads to use, defaults to four.
    pub fn num_threads(mut self, n: usize) -> Setup {
        assert!(n != 0, "Can't create zero worker threads, 1 is the minimum");
        self.threads = n;
        self
    }

    /// Set the number of worker threads equal to the number of CPU cores.
    pub fn use_all_cores(self) -> Setup {
        let n = match thread::available_parallelism() {
            Ok(n) => n.get(),
            Err(err) => {
                warn!(
                    "failed to get the available concurrency: {err}, using {} worker threads",
                    Setup::DEFAULT_THREADS
                );
                Setup::DEFAULT_THREADS
            }
        };
        self.num_threads(n)
    }

    /// Set the maximum number of operations queued, defaults to 64.
    ///
    /// Once the queue is full submitting more operations blocks until a
    /// worker thread picks up the next operation.
    pub fn queue_size(mut self, n: usize) -> Setup {
        assert!(n != 0, "Can't use a queue size of zero");
        self.queue_size = n;
        self
    }

    /// Returns the number of worker threads to use.
    pub const fn get_threads(&self) -> usize {
        self.threads
    }

    /// Build the thread pool, spawning all worker threads.
    pub fn build(self) -> io::Result<ThreadPool> {
        debug!(workers = self.threads, queue_size = self.queue_size; "starting I/O thread pool");
        let (sender, receiver) = crossbeam_channel::bounded(self.queue_size);
        let mut workers = Vec::with_capacity(self.threads);
        for id in 0..self.threads {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{id}", self.name))
                .spawn(move || worker(id, receiver));
            match handle {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Stop the threads we already started.
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }
        Ok(ThreadPool {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }
}

impl Default for Setup {
    fn default() -> Setup {
        Setup::new()
    }
}

/// [`AioContext`] that executes operations on a pool of worker threads.
///
/// The worker threads are stopped once the pool is [closed] or dropped, after
/// finishing all queued operations.
///
/// Operations are queued in a bounded queue, see [`Setup::queue_size`]. Once
/// the queue is full submitting an operation blocks the calling thread until
/// a worker thread picks up the next operation. Size the queue to the number
/// of operations expected to be in flight at once.
///
/// [closed]: AioContext::close
pub struct ThreadPool {
    /// `None` once closed.
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    /// Setup a new thread pool.
    pub fn setup() -> Setup {
        Setup::new()
    }

    /// Returns the number of running worker threads.
    pub fn workers(&self) -> usize {
        lock(&self.workers).len()
    }
}

impl AioContext for ThreadPool {
    fn spawn_blocking(&self, job: Job) {
        // Clone the sender so we don't hold the lock while the queue is full.
        let sender = lock(&self.sender).clone();
        match sender {
            // If all workers stopped the job is dropped, which the caller
            // observes as error.
            Some(sender) => _ = sender.send(job),
            None => trace!("dropping operation submitted to closed I/O thread pool"),
        }
    }

    fn close(&self) {
        if lock(&self.sender).take().is_none() {
            return;
        }
        let workers = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                // Closed from within a job, can't join ourselves.
                continue;
            }
            if let Err(err) = handle.join() {
                warn!("I/O worker thread panicked: {}", panic_message(&*err));
            }
        }
        debug!("stopped I/O thread pool");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("closed", &lock(&self.sender).is_none())
            .field("workers", &self.workers())
            .finish()
    }
}

/// Entry point of the worker threads.
fn worker(id: usize, receiver: Receiver<Job>) {
    trace!(worker_id = id; "starting I/O worker thread");
    for job in receiver.iter() {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
            warn!(worker_id = id; "I/O operation panicked: {}", panic_message(&*panic));
        }
    }
    trace!(worker_id = id; "stopping I/O worker thread");
}

/// Lock `mutex`, ignoring poisoning as none of the guarded data can be left
/// in an invalid state.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => err.into_inner(),
    }
}

/// Attempts to extract a message from a panic, defaulting to `<unknown>`.
fn panic_message<'a>(panic: &'a (dyn std::any::Any + Send + 'static)) -> &'a str {
    match panic.downcast_ref::<&'static str>() {
        Some(s) => s,
        None => match panic.downcast_ref::<String>() {
            Some(s) => s,
            None => "<unknown>",
        },
    }
}
