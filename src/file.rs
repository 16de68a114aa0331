//! Module with [`AioFile`], the asynchronous file handle.

use std::ops::AsyncFnOnce;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::{fmt, mem};

use log::{debug, trace, warn};

use crate::context::{run_blocking, AioContext};
use crate::encoding::Encoding;
use crate::error::{DecodeError, Error, InvalidState, Result};
use crate::mode::Mode;
use crate::sync::Mutex;
use crate::sys;

/// Options to configure how an [`AioFile`] is opened.
///
/// # Examples
///
/// ```
/// use heph_file::{Encoding, OpenOptions};
///
/// let options = OpenOptions::new("w+")
///     .unwrap()
///     .encoding(Encoding::Utf16Le)
///     .permissions(0o600);
/// # _ = options;
/// ```
#[derive(Copy, Clone, Debug)]
pub struct OpenOptions {
    mode: Mode,
    encoding: Encoding,
    permissions: u32,
}

impl OpenOptions {
    /// Default permissions of created files, before the umask is applied.
    pub const DEFAULT_PERMISSIONS: u32 = 0o666;

    /// Create new options from a mode string, see [`Mode::parse`].
    pub fn new(mode: &str) -> Result<OpenOptions> {
        Ok(OpenOptions::from_mode(Mode::parse(mode)?))
    }

    /// Create new options from an already parsed `mode`.
    pub const fn from_mode(mode: Mode) -> OpenOptions {
        OpenOptions {
            mode,
            encoding: Encoding::Utf8,
            permissions: OpenOptions::DEFAULT_PERMISSIONS,
        }
    }

    /// Set the encoding used for text, defaults to UTF-8.
    pub const fn encoding(mut self, encoding: Encoding) -> OpenOptions {
        self.encoding = encoding;
        self
    }

    /// Set the permissions of the file if it's created.
    pub const fn permissions(mut self, permissions: u32) -> OpenOptions {
        self.permissions = permissions;
        self
    }

    /// Returns the parsed mode.
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Create a file handle for `path`, without opening it.
    pub fn build<P: Into<PathBuf>>(self, path: P, context: Arc<dyn AioContext>) -> AioFile {
        AioFile::with_state(path.into(), self, context, State::NotOpened)
    }

    /// Create a file handle for `path` and open it.
    pub async fn open<P: Into<PathBuf>>(
        self,
        path: P,
        context: Arc<dyn AioContext>,
    ) -> Result<AioFile> {
        let file = self.build(path, context);
        let _ = file.open().await?;
        Ok(file)
    }
}

/// Asynchronous file handle.
///
/// The handle starts unopened, [`AioFile::open`] opens the file descriptor
/// and [`AioFile::close`] closes it again. Once closed a handle can't be
/// reopened.
///
/// All I/O is submitted to the [`AioContext`] the handle was created with.
/// Reads and writes take an explicit offset, so multiple operations can be in
/// flight at once. For sequential access see [`Reader`], [`Writer`] and
/// [`LineReader`], for a file-like API see [`FileView`].
///
/// # Sharing
///
/// Cloning the handle shares the file descriptor and increments the clone
/// count. Every owner must call [`close`] once, only the last call actually
/// closes the descriptor. An owner that drops its handle without closing it
/// releases its clone, so the last [`close`] still syncs and closes the file.
///
/// If the last handle is dropped while still open the descriptor is closed
/// without syncing the file first.
///
/// [`Reader`]: crate::Reader
/// [`Writer`]: crate::Writer
/// [`LineReader`]: crate::LineReader
/// [`FileView`]: crate::FileView
/// [`close`]: AioFile::close
pub struct AioFile {
    inner: Arc<Inner>,
    /// Set once this handle called `close`.
    released: AtomicBool,
}

struct Inner {
    path: PathBuf,
    options: OpenOptions,
    context: Arc<dyn AioContext>,
    /// Serialises `open` and `close`.
    lifecycle: Mutex<()>,
    state: StdMutex<State>,
    clones: AtomicUsize,
}

/// State of the file descriptor.
enum State {
    NotOpened,
    Open(OwnedFd),
    Closed,
}

impl AioFile {
    /// Create a handle for `path` opened with `mode`, without opening it.
    ///
    /// See [`OpenOptions`] to open a file with a different encoding or
    /// permissions.
    pub fn new<P: Into<PathBuf>>(
        path: P,
        mode: &str,
        context: Arc<dyn AioContext>,
    ) -> Result<AioFile> {
        Ok(OpenOptions::new(mode)?.build(path, context))
    }

    /// Create a handle from an already opened `file`.
    ///
    /// `path` and `mode` must describe how `file` was opened. The handle
    /// takes ownership of the file and starts in the open state.
    pub fn from_std<P: Into<PathBuf>>(
        file: std::fs::File,
        path: P,
        mode: &str,
        context: Arc<dyn AioContext>,
    ) -> Result<AioFile> {
        let options = OpenOptions::new(mode)?;
        let state = State::Open(OwnedFd::from(file));
        Ok(AioFile::with_state(path.into(), options, context, state))
    }

    fn with_state(
        path: PathBuf,
        options: OpenOptions,
        context: Arc<dyn AioContext>,
        state: State,
    ) -> AioFile {
        AioFile {
            inner: Arc::new(Inner {
                path,
                options,
                context,
                lifecycle: Mutex::new(()),
                state: StdMutex::new(state),
                clones: AtomicUsize::new(0),
            }),
            released: AtomicBool::new(false),
        }
    }

    /// Returns the path of the file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the mode the file is opened with.
    pub fn mode(&self) -> Mode {
        self.inner.options.mode
    }

    /// Returns the encoding used for text.
    pub fn encoding(&self) -> Encoding {
        self.inner.options.encoding
    }

    /// Returns the I/O context used.
    pub fn context(&self) -> &Arc<dyn AioContext> {
        &self.inner.context
    }

    /// Returns the number of outstanding clones.
    pub fn clone_count(&self) -> usize {
        self.inner.clones.load(Ordering::Acquire)
    }

    /// Returns `true` if the file is open.
    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state(), State::Open(..))
    }

    /// Returns `true` if the file is closed.
    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.state(), State::Closed)
    }

    /// Returns the file descriptor.
    pub fn fileno(&self) -> Result<RawFd> {
        match &*self.inner.state() {
            State::Open(fd) => Ok(fd.as_raw_fd()),
            State::NotOpened => Err(Error::InvalidState(InvalidState::NotOpened)),
            State::Closed => Err(Error::InvalidState(InvalidState::Closed)),
        }
    }

    /// Open the file.
    ///
    /// Returns the file descriptor if this call opened the file, or `None`
    /// if the file was already open. If called concurrently only a single
    /// call opens the file, the others wait for it to complete.
    ///
    /// Returns an [`InvalidState::Closed`] error if the file was closed.
    pub async fn open(&self) -> Result<Option<RawFd>> {
        let _guard = self.inner.lifecycle.lock().await;
        match *self.inner.state() {
            State::NotOpened => {}
            State::Open(..) => return Ok(None),
            State::Closed => return Err(Error::InvalidState(InvalidState::Closed)),
        }

        let path = self.inner.path.clone();
        let flags = self.inner.options.mode.flags();
        let permissions = self.inner.options.permissions;
        let fd = run_blocking(&*self.inner.context, move || {
            sys::open(&path, flags, permissions)
        })
        .await?;
        let raw_fd = fd.as_raw_fd();
        *self.inner.state() = State::Open(fd);
        debug!(fd = raw_fd, mode:% = self.mode(); "opened file '{}'", self.inner.path.display());
        Ok(Some(raw_fd))
    }

    /// Close the file.
    ///
    /// If the handle has outstanding clones this only decrements the clone
    /// count. Otherwise a writable file is synced using [`AioFile::fsync`]
    /// before the file descriptor is closed. Closing a file that is not open
    /// does nothing.
    ///
    /// If syncing fails the file descriptor is still closed, the sync error
    /// is returned.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.released.store(true, Ordering::Release);
        let decremented = self
            .inner
            .clones
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if let Ok(n) = decremented {
            trace!(clones = n - 1; "released clone of file '{}'", self.inner.path.display());
            return Ok(());
        }

        // Operations started after this point see the file as closed.
        let fd = {
            let mut state = self.inner.state();
            match mem::replace(&mut *state, State::Closed) {
                State::Open(fd) => fd,
                other => {
                    *state = other;
                    return Ok(());
                }
            }
        };

        let sync_result = if self.mode().writable() {
            self.inner.context.fsync(fd.as_raw_fd()).await.map_err(Error::Io)
        } else {
            Ok(())
        };

        let raw_fd = fd.as_raw_fd();
        let close_result = run_blocking(&*self.inner.context, move || sys::close(fd)).await;
        debug!(fd = raw_fd; "closed file '{}'", self.inner.path.display());
        sync_result?;
        close_result?;
        Ok(())
    }

    /// Open the file, run `f` with it and close it afterwards.
    ///
    /// The file is closed even if `f` returns an error. The error of `f` takes
    /// precedence over an error closing the file.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use heph_file::context::Inline;
    /// use heph_file::AioFile;
    ///
    /// # fn block_on<Fut: std::future::Future>(fut: Fut) -> Fut::Output {
    /// #     let mut fut = std::pin::pin!(fut);
    /// #     let mut ctx = std::task::Context::from_waker(std::task::Waker::noop());
    /// #     loop {
    /// #         if let std::task::Poll::Ready(res) = fut.as_mut().poll(&mut ctx) {
    /// #             return res;
    /// #         }
    /// #     }
    /// # }
    /// # let path = std::env::temp_dir().join("heph_file.with_doc.txt");
    /// let file = AioFile::new(path, "w", Arc::new(Inline))?;
    /// let written = block_on(file.with(async |file| file.write_text("Hello", 0).await))?;
    /// assert_eq!(written, 5);
    /// # Ok::<(), heph_file::Error>(())
    /// ```
    pub async fn with<F, T>(self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&AioFile) -> Result<T>,
    {
        let _ = self.open().await?;
        let result = f(&self).await;
        let closed = self.close().await;
        match result {
            Ok(value) => closed.map(|()| value),
            Err(err) => Err(err),
        }
    }

    /// Read `size` bytes at `offset`.
    ///
    /// If `size` is `None` this reads up to the end of the file. Returns
    /// fewer bytes only when the end of the file is reached.
    pub async fn read_bytes(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>> {
        let fd = self.fileno()?;
        let size = match size {
            Some(size) => size,
            None => self.size().await?.saturating_sub(offset) as usize,
        };
        if size == 0 {
            return Ok(Vec::new());
        }
        Ok(self.inner.context.read(size, fd, offset).await?)
    }

    /// Write all of `data` at `offset`, returns the number of bytes written.
    ///
    /// The I/O context may write fewer bytes than requested, in which case
    /// the remainder is written at the advanced offset. If the context makes
    /// no progress this returns [`Error::WriteStalled`], if it returns an OS
    /// error this returns [`Error::Os`].
    pub async fn write_bytes(&self, data: &[u8], offset: u64) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let fd = self.fileno()?;
        let mut written = 0;
        while written < data.len() {
            let res = self
                .inner
                .context
                .write(data[written..].to_vec(), fd, offset + written as u64)
                .await?;
            if res == 0 {
                return Err(Error::WriteStalled {
                    path: self.inner.path.clone(),
                    offset,
                    written,
                });
            } else if res < 0 {
                return Err(Error::Os {
                    errno: (-res) as i32,
                    path: self.inner.path.clone(),
                });
            }

            written += (res as usize).min(data.len() - written);
            if written < data.len() {
                trace!(
                    fd = fd, offset = offset, written = written, total = data.len();
                    "partial write"
                );
            }
        }
        Ok(written)
    }

    /// Read and decode `size` bytes of text at `offset`.
    ///
    /// If `size` ends inside a character more bytes are read, see
    /// [`decode_chunk`]. If `size` is `None` this reads up to the end of the
    /// file.
    ///
    /// [`decode_chunk`]: crate::decode_chunk
    pub async fn read_text(&self, size: Option<usize>, offset: u64) -> Result<String> {
        self.check_text()?;
        crate::reader::decode_chunk(self, size, offset)
            .await
            .map(|(_, text)| text)
    }

    /// Encode and write `text` at `offset`, returns the number of bytes
    /// written.
    pub async fn write_text(&self, text: &str, offset: u64) -> Result<usize> {
        self.check_text()?;
        self.write_bytes(&self.encode(text), offset).await
    }

    fn check_text(&self) -> Result<()> {
        if self.mode().binary() {
            Err(Error::InvalidInput("text operation on a file in binary mode"))
        } else {
            Ok(())
        }
    }

    /// Encode `text` using the file's encoding.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        self.encoding().encode(text)
    }

    /// Decode `bytes` using the file's encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let encoding = self.encoding();
        encoding.decode(bytes).map_err(|valid_up_to| {
            Error::Decode(DecodeError {
                encoding,
                offset: 0,
                valid_up_to,
            })
        })
    }

    /// Sync all data and metadata to disk, see [`fsync(2)`].
    ///
    /// [`fsync(2)`]: https://man7.org/linux/man-pages/man2/fsync.2.html
    pub async fn fsync(&self) -> Result<()> {
        let fd = self.fileno()?;
        Ok(self.inner.context.fsync(fd).await?)
    }

    /// Sync all data to disk, see [`fdatasync(2)`].
    ///
    /// [`fdatasync(2)`]: https://man7.org/linux/man-pages/man2/fdatasync.2.html
    pub async fn fdsync(&self) -> Result<()> {
        let fd = self.fileno()?;
        Ok(self.inner.context.fdsync(fd).await?)
    }

    /// Truncate (or extend) the file to `length` bytes.
    pub async fn truncate(&self, length: u64) -> Result<()> {
        let fd = self.fileno()?;
        Ok(run_blocking(&*self.inner.context, move || sys::ftruncate(fd, length)).await?)
    }

    /// Returns the size of the file in bytes.
    pub async fn size(&self) -> Result<u64> {
        let fd = self.fileno()?;
        Ok(run_blocking(&*self.inner.context, move || sys::file_size(fd)).await?)
    }

    /// Change the permissions of the file, see [`fchmod(2)`].
    ///
    /// [`fchmod(2)`]: https://man7.org/linux/man-pages/man2/fchmod.2.html
    pub async fn set_permissions(&self, permissions: u32) -> Result<()> {
        let fd = self.fileno()?;
        Ok(run_blocking(&*self.inner.context, move || sys::fchmod(fd, permissions)).await?)
    }

    /// Duplicate the file descriptor into a new, independent handle.
    ///
    /// Unlike [`Clone`] the returned handle has its own lifecycle and must be
    /// closed separately.
    pub async fn try_clone_fd(&self) -> Result<AioFile> {
        let fd = self.fileno()?;
        let new_fd = run_blocking(&*self.inner.context, move || sys::dup(fd)).await?;
        debug!(fd = fd, new_fd = new_fd.as_raw_fd(); "duplicated file descriptor");
        Ok(AioFile::with_state(
            self.inner.path.clone(),
            self.inner.options,
            self.inner.context.clone(),
            State::Open(new_fd),
        ))
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // The state is only ever replaced as a whole, so never inconsistent.
        match self.state.lock() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        }
    }
}

/// Shares the file descriptor, incrementing the clone count.
impl Clone for AioFile {
    fn clone(&self) -> AioFile {
        let _ = self.inner.clones.fetch_add(1, Ordering::AcqRel);
        AioFile {
            inner: self.inner.clone(),
            released: AtomicBool::new(false),
        }
    }
}

/// Releases the clone held by the handle if it wasn't closed.
impl Drop for AioFile {
    fn drop(&mut self) {
        if !*self.released.get_mut() {
            let _ = self
                .inner
                .clones
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        };
        if let State::Open(fd) = mem::replace(state, State::Closed) {
            warn!(fd = fd.as_raw_fd(); "file '{}' dropped without closing it", self.path.display());
            drop(fd);
        }
    }
}

impl fmt::Debug for AioFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("AioFile");
        let _ = f
            .field("path", &self.inner.path)
            .field("mode", &self.inner.options.mode)
            .field("encoding", &self.inner.options.encoding);
        let _ = match &*self.inner.state() {
            State::NotOpened => f.field("fd", &"not opened"),
            State::Open(fd) => f.field("fd", &fd.as_raw_fd()),
            State::Closed => f.field("fd", &"closed"),
        };
        f.finish()
    }
}
