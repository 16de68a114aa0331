#![allow(dead_code)] // Not all tests use all functions/types.

use std::collections::VecDeque;
use std::fs::{create_dir_all, remove_dir_all};
use std::future::Future;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{self, Poll};
use std::thread;

use heph_file::context::{AioContext, Completer, Completion, Inline, Job, ThreadPool};

pub fn assert_send<T: Send>() {}

pub fn assert_sync<T: Sync>() {}

/// Enable logging, once.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| std_logger::Config::logfmt().init());
}

pub fn block_on<Fut: Future>(fut: Fut) -> Fut::Output {
    init_logging();
    let mut fut = pin!(fut);
    let mut ctx = task::Context::from_waker(task::Waker::noop());
    loop {
        match fut.as_mut().poll(&mut ctx) {
            Poll::Ready(output) => return output,
            // Waiting on a worker thread.
            Poll::Pending => thread::yield_now(),
        }
    }
}

/// Poll `fut` once.
pub fn poll_once<Fut: Future>(fut: Pin<&mut Fut>) -> Poll<Fut::Output> {
    let mut ctx = task::Context::from_waker(task::Waker::noop());
    fut.poll(&mut ctx)
}

/// Run all `futures` concurrently, returning their outputs in order.
pub fn join_all<Fut: Future>(futures: Vec<Fut>) -> Vec<Fut::Output> {
    let mut futures: Vec<Pin<Box<Fut>>> = futures.into_iter().map(Box::pin).collect();
    let mut outputs: Vec<Option<Fut::Output>> = futures.iter().map(|_| None).collect();
    block_on(std::future::poll_fn(|ctx| {
        let mut done = true;
        for (fut, output) in futures.iter_mut().zip(outputs.iter_mut()) {
            if output.is_none() {
                match fut.as_mut().poll(ctx) {
                    Poll::Ready(out) => *output = Some(out),
                    Poll::Pending => done = false,
                }
            }
        }
        if done {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }));
    outputs.into_iter().flatten().collect()
}

/// Returns a path to a non-existing temporary file.
pub fn temp_file(name: &str) -> PathBuf {
    let mut dir = temp_dir_root();
    dir.push(name);
    dir
}

/// Returns the path to root of our temporary directory, cleaned before each
/// test run.
pub fn temp_dir_root() -> PathBuf {
    static CLEANUP: Once = Once::new();

    let mut dir = std::env::temp_dir();
    dir.push("heph_file.test/");

    CLEANUP.call_once(|| {
        let _ = remove_dir_all(&dir);
        if let Err(err) = create_dir_all(&dir) {
            panic!("failed to create temporary directory: {err}");
        }
    });

    dir
}

/// Returns `n` random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0; n];
    getrandom::getrandom(&mut buf).expect("failed to get random bytes");
    buf
}

/// Returns a thread pool with two workers.
pub fn thread_pool() -> Arc<ThreadPool> {
    Arc::new(ThreadPool::setup().num_threads(2).build().unwrap())
}

/// Context that executes all jobs inline, but returns scripted results for
/// writes without writing anything.
#[derive(Debug, Default)]
pub struct ScriptedContext {
    /// Results returned by `write`, once empty all bytes are written.
    results: Mutex<VecDeque<isize>>,
    /// Arguments of all `write` calls.
    writes: Mutex<Vec<(Vec<u8>, u64)>>,
    /// Number of jobs run.
    jobs: AtomicUsize,
}

impl ScriptedContext {
    pub fn new<I: IntoIterator<Item = isize>>(results: I) -> Arc<ScriptedContext> {
        Arc::new(ScriptedContext {
            results: Mutex::new(results.into_iter().collect()),
            ..ScriptedContext::default()
        })
    }

    /// Returns the data and offset of all write calls.
    pub fn writes(&self) -> Vec<(Vec<u8>, u64)> {
        self.writes.lock().unwrap().clone()
    }

    /// Returns the number of jobs run, e.g. opening or closing a file.
    pub fn jobs(&self) -> usize {
        self.jobs.load(Ordering::Acquire)
    }
}

impl AioContext for ScriptedContext {
    fn spawn_blocking(&self, job: Job) {
        let _ = self.jobs.fetch_add(1, Ordering::AcqRel);
        job()
    }

    fn write(&self, data: Vec<u8>, _: RawFd, offset: u64) -> Completion<isize> {
        let result = self.results.lock().unwrap().pop_front();
        let result = result.unwrap_or(data.len() as isize);
        self.writes.lock().unwrap().push((data, offset));
        Completion::ready(Ok(result))
    }
}

/// Context that executes all jobs inline, but never completes reads and
/// writes while stalled.
#[derive(Debug)]
pub struct StallingContext {
    stalled: AtomicBool,
    /// Completers of the stalled operations, kept so the operations stay
    /// pending.
    reads: Mutex<Vec<Completer<Vec<u8>>>>,
    writes: Mutex<Vec<Completer<isize>>>,
}

impl StallingContext {
    pub fn new() -> Arc<StallingContext> {
        Arc::new(StallingContext {
            stalled: AtomicBool::new(false),
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Stall (or resume) all reads and writes submitted from now on.
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    /// Returns the number of stalled operations.
    pub fn stalled(&self) -> usize {
        self.reads.lock().unwrap().len() + self.writes.lock().unwrap().len()
    }
}

impl AioContext for StallingContext {
    fn spawn_blocking(&self, job: Job) {
        job()
    }

    fn read(&self, size: usize, fd: RawFd, offset: u64) -> Completion<Vec<u8>> {
        if self.stalled.load(Ordering::Acquire) {
            let (completer, completion) = Completion::new();
            self.reads.lock().unwrap().push(completer);
            completion
        } else {
            Inline.read(size, fd, offset)
        }
    }

    fn write(&self, data: Vec<u8>, fd: RawFd, offset: u64) -> Completion<isize> {
        if self.stalled.load(Ordering::Acquire) {
            let (completer, completion) = Completion::new();
            self.writes.lock().unwrap().push(completer);
            completion
        } else {
            Inline.write(data, fd, offset)
        }
    }
}
