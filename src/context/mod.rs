//! Asynchronous I/O (AIO) execution contexts.
//!
//! An [`AioContext`] executes read, write and sync operations on a file
//! descriptor and notifies the caller once they complete, returning a
//! [`Completion`] [`Future`]. The file types in this crate only ever submit an
//! operation and await its completion, they don't care how the context gets
//! the work done.
//!
//! Two contexts are provided:
//!  * [`ThreadPool`]: executes operations on a pool of worker threads, see
//!    [`Setup`] to configure it.
//!  * [`Inline`]: executes operations on the calling thread, blocking it.
//!    Mostly useful for testing or when no threads can be spawned.
//!
//! Which one is used is decided once at startup using [`Backend`].
//!
//! [`Future`]: std::future::Future

use std::future::Future;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};
use std::{env, fmt, io};

use heph_inbox::oneshot::{new_oneshot, RecvOnce, Sender};
use log::{debug, warn};

use crate::sys;

mod thread_pool;

pub use thread_pool::{Setup, ThreadPool};

/// Blocking job submitted to an [`AioContext`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Asynchronous I/O execution context.
///
/// The only required method is [`spawn_blocking`], which runs a blocking job
/// off the scheduler's hot path. The I/O operations by default are executed
/// as such a job, but implementations can override them, for example to
/// submit them to the kernel directly.
///
/// [`spawn_blocking`]: AioContext::spawn_blocking
pub trait AioContext: fmt::Debug + Send + Sync {
    /// Run `job`.
    ///
    /// If the context is unable to run the job it must drop it, which will
    /// cause the related [`Completion`] to return an error.
    fn spawn_blocking(&self, job: Job);

    /// Read up to `size` bytes from `fd` at `offset`.
    ///
    /// Returns fewer bytes only if the end of the file is reached.
    fn read(&self, size: usize, fd: RawFd, offset: u64) -> Completion<Vec<u8>> {
        run_blocking(self, move || sys::pread(fd, size, offset))
    }

    /// Write `data` to `fd` at `offset`.
    ///
    /// Returns the number of bytes written, which may be fewer than
    /// `data.len()`, or a negative OS error number (errno).
    fn write(&self, data: Vec<u8>, fd: RawFd, offset: u64) -> Completion<isize> {
        run_blocking(self, move || Ok(sys::pwrite(fd, &data, offset)))
    }

    /// Sync all data and metadata of `fd`, see [`fsync(2)`].
    ///
    /// [`fsync(2)`]: https://man7.org/linux/man-pages/man2/fsync.2.html
    fn fsync(&self, fd: RawFd) -> Completion<()> {
        run_blocking(self, move || sys::fsync(fd))
    }

    /// Sync all data of `fd`, see [`fdatasync(2)`].
    ///
    /// [`fdatasync(2)`]: https://man7.org/linux/man-pages/man2/fdatasync.2.html
    fn fdsync(&self, fd: RawFd) -> Completion<()> {
        run_blocking(self, move || sys::fdatasync(fd))
    }

    /// Shut down the context.
    ///
    /// Operations submitted after this call fail.
    fn close(&self) {}
}

/// Run `f` as blocking job on `ctx`, returning its result.
pub fn run_blocking<C, F, T>(ctx: &C, f: F) -> Completion<T>
where
    C: AioContext + ?Sized,
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (completer, completion) = Completion::new();
    ctx.spawn_blocking(Box::new(move || completer.complete(f())));
    completion
}

/// Completion of an operation submitted to an [`AioContext`].
///
/// Dropping the `Completion` doesn't cancel the operation, the result will
/// simply be discarded.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Completion<T> {
    inner: CompletionInner<T>,
}

enum CompletionInner<T> {
    Ready(Option<io::Result<T>>),
    Pending(RecvOnce<io::Result<T>>),
}

impl<T> Completion<T> {
    /// Create a new pending `Completion`, completed using the returned
    /// [`Completer`].
    pub fn new() -> (Completer<T>, Completion<T>) {
        let (sender, receiver) = new_oneshot();
        let completion = Completion {
            inner: CompletionInner::Pending(receiver.recv_once()),
        };
        (Completer { sender }, completion)
    }

    /// Create a `Completion` that is already completed.
    pub const fn ready(result: io::Result<T>) -> Completion<T> {
        Completion {
            inner: CompletionInner::Ready(Some(result)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = io::Result<T>;

    fn poll(mut self: Pin<&mut Self>, ctx: &mut task::Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            CompletionInner::Ready(result) => match result.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("polled `Completion` after completion"),
            },
            CompletionInner::Pending(receiver) => match Pin::new(receiver).poll(ctx) {
                Poll::Ready(Some(result)) => Poll::Ready(result),
                Poll::Ready(None) => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::Other,
                    "operation dropped by the I/O context",
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

// Never pinned structurally.
impl<T> Unpin for Completion<T> {}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner {
            CompletionInner::Ready(Some(..)) => "ready",
            CompletionInner::Ready(None) => "done",
            CompletionInner::Pending(..) => "pending",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

/// Completes a [`Completion`], see [`Completion::new`].
pub struct Completer<T> {
    sender: Sender<io::Result<T>>,
}

impl<T> Completer<T> {
    /// Complete the operation with `result`.
    pub fn complete(self, result: io::Result<T>) {
        // If the `Completion` is dropped no one is interested in the result.
        let _ = self.sender.try_send(result);
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

/// Context that executes all operations on the calling thread.
///
/// This blocks the thread (and with it the scheduler) for the duration of the
/// operation, but requires no additional threads.
#[derive(Copy, Clone, Debug, Default)]
pub struct Inline;

impl AioContext for Inline {
    fn spawn_blocking(&self, job: Job) {
        job();
    }
}

/// Name of the environment variable read by [`Backend::detect`].
pub const BACKEND_ENV: &str = "HEPH_FILE_BACKEND";

/// Kind of [`AioContext`] to use.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Backend {
    /// [`ThreadPool`].
    ThreadPool,
    /// [`Inline`].
    Inline,
}

impl Backend {
    /// Determine the backend to use.
    ///
    /// This reads the `HEPH_FILE_BACKEND` environment variable, which can be
    /// set to `thread` or `inline`. Defaults to [`Backend::ThreadPool`].
    pub fn detect() -> Backend {
        match env::var(BACKEND_ENV) {
            Ok(value) => match value.parse() {
                Ok(backend) => backend,
                Err(()) => {
                    warn!(
                        value = value.as_str();
                        "unknown I/O backend in ${BACKEND_ENV}, using thread pool"
                    );
                    Backend::ThreadPool
                }
            },
            Err(..) => Backend::ThreadPool,
        }
    }

    /// Create a new context of this kind.
    ///
    /// `setup` is only used for [`Backend::ThreadPool`].
    pub fn create(self, setup: Setup) -> io::Result<Arc<dyn AioContext>> {
        debug!(backend = self.as_str(); "creating I/O context");
        match self {
            Backend::ThreadPool => setup.build().map(|pool| Arc::new(pool) as _),
            Backend::Inline => Ok(Arc::new(Inline)),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Backend::ThreadPool => "thread",
            Backend::Inline => "inline",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ();

    fn from_str(value: &str) -> Result<Backend, ()> {
        match value {
            "thread" | "threads" | "thread_pool" => Ok(Backend::ThreadPool),
            "inline" => Ok(Backend::Inline),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
