//! Blocking system calls used by the I/O contexts and [`AioFile`].
//!
//! None of these should be called on a scheduler thread directly, they're
//! executed by an [`AioContext`].
//!
//! [`AioFile`]: crate::AioFile
//! [`AioContext`]: crate::context::AioContext

use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

pub(crate) fn open(path: &Path, flags: libc::c_int, permissions: u32) -> io::Result<OwnedFd> {
    let path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    let fd = loop {
        match syscall!(open(path.as_ptr(), flags | libc::O_CLOEXEC, permissions)) {
            Ok(fd) => break fd,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    };
    // SAFETY: `open(2)` returned a valid fd.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Close `fd`, unlike dropping `OwnedFd` this returns the error.
pub(crate) fn close(fd: OwnedFd) -> io::Result<()> {
    syscall!(close(fd.into_raw_fd())).map(|_| ())
}

pub(crate) fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    let fd = syscall!(fcntl(fd, libc::F_DUPFD_CLOEXEC, 0))?;
    // SAFETY: `fcntl(2)` returned a valid fd.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Initial buffer size of [`pread`], the buffer grows as more data is read.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Read up to `size` bytes at `offset`, stopping early only at the end of the
/// file.
pub(crate) fn pread(fd: RawFd, size: usize, offset: u64) -> io::Result<Vec<u8>> {
    // `size` may be far larger than the file, so don't allocate it up front.
    let mut buf: Vec<u8> = Vec::with_capacity(size.min(READ_BUF_SIZE));
    while buf.len() < size {
        if buf.len() == buf.capacity() {
            buf.reserve((size - buf.len()).min(buf.capacity()));
        }
        let filled = buf.len();
        let spare = buf.spare_capacity_mut();
        let len = spare.len().min(size - filled);
        let res = syscall!(pread(
            fd,
            spare.as_mut_ptr().cast(),
            len,
            (offset + filled as u64) as libc::off_t
        ));
        match res {
            Ok(0) => break,
            // SAFETY: `pread(2)` initialised `n` bytes.
            Ok(n) => unsafe { buf.set_len(buf.len() + n as usize) },
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(buf)
}

/// Write `data` at `offset`.
///
/// Returns the number of bytes written, which may be less than `data.len()`,
/// or the negated errno.
pub(crate) fn pwrite(fd: RawFd, data: &[u8], offset: u64) -> isize {
    loop {
        let res = syscall!(pwrite(
            fd,
            data.as_ptr().cast(),
            data.len(),
            offset as libc::off_t
        ));
        match res {
            Ok(n) => return n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return -(err.raw_os_error().unwrap_or(libc::EIO) as isize),
        }
    }
}

pub(crate) fn fsync(fd: RawFd) -> io::Result<()> {
    syscall!(fsync(fd)).map(|_| ())
}

#[cfg(not(any(target_os = "ios", target_os = "macos")))]
pub(crate) fn fdatasync(fd: RawFd) -> io::Result<()> {
    syscall!(fdatasync(fd)).map(|_| ())
}

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub(crate) fn fdatasync(fd: RawFd) -> io::Result<()> {
    fsync(fd)
}

/// Returns the size of the file.
pub(crate) fn file_size(fd: RawFd) -> io::Result<u64> {
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    let _ = syscall!(fstat(fd, stat.as_mut_ptr()))?;
    // SAFETY: `fstat(2)` initialised `stat`.
    let stat = unsafe { stat.assume_init() };
    Ok(stat.st_size as u64)
}

pub(crate) fn ftruncate(fd: RawFd, length: u64) -> io::Result<()> {
    syscall!(ftruncate(fd, length as libc::off_t)).map(|_| ())
}

#[allow(trivial_numeric_casts)] // for `u32 as u32` on Linux.
pub(crate) fn fchmod(fd: RawFd, mode: u32) -> io::Result<()> {
    syscall!(fchmod(fd, mode as libc::mode_t)).map(|_| ())
}
