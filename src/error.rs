//! Module containing the error types.

use std::path::{Path, PathBuf};
use std::{fmt, io};

use crate::encoding::Encoding;
use crate::mode::ModeError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by the file operations.
///
/// Errors are never retried automatically, with two bounded exceptions: the
/// continuation of partial writes and the re-reading of a text chunk that
/// ended inside a multi-byte character.
#[derive(Debug)]
pub enum Error {
    /// Invalid mode string, see [`Mode::parse`].
    ///
    /// [`Mode::parse`]: crate::Mode::parse
    Mode(ModeError),
    /// Operation attempted on a file that isn't open (anymore).
    InvalidState(InvalidState),
    /// A write made no progress while data was still pending.
    WriteStalled {
        /// Path of the file.
        path: PathBuf,
        /// Offset at which the write started.
        offset: u64,
        /// Number of bytes written before the write stalled.
        written: usize,
    },
    /// The I/O context returned an OS error for a write.
    Os {
        /// The error number, e.g. `libc::EFBIG`.
        errno: i32,
        /// Path of the file.
        path: PathBuf,
    },
    /// Failed to decode text, even after re-reading additional bytes.
    Decode(DecodeError),
    /// Operation not supported by the file's mode, e.g. writing text to a
    /// binary file.
    InvalidInput(&'static str),
    /// Error returned by the OS, e.g. when opening a file that doesn't exist.
    Io(io::Error),
}

impl Error {
    /// Returns the OS error number, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Os { errno, .. } => Some(*errno),
            Error::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// Returns the path of the file involved, if known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Error::WriteStalled { path, .. } | Error::Os { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ModeError> for Error {
    fn from(err: ModeError) -> Error {
        Error::Mode(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Error {
        Error::Decode(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(err) => err,
            Error::Os { errno, .. } => io::Error::from_raw_os_error(errno),
            Error::WriteStalled { .. } => io::Error::new(io::ErrorKind::WriteZero, err),
            Error::Decode(..) => io::Error::new(io::ErrorKind::InvalidData, err),
            Error::Mode(..) | Error::InvalidInput(..) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            Error::InvalidState(..) => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mode(err) => write!(f, "invalid file mode: {err}"),
            Error::InvalidState(state) => state.fmt(f),
            Error::WriteStalled {
                path,
                offset,
                written,
            } => write!(
                f,
                "write to '{}' made no progress at offset {} after writing {written} bytes",
                path.display(),
                offset + *written as u64,
            ),
            Error::Os { errno, path } => write!(
                f,
                "{} (os error {errno}): '{}'",
                io::Error::from_raw_os_error(*errno),
                path.display()
            ),
            Error::Decode(err) => err.fmt(f),
            Error::InvalidInput(msg) => f.write_str(msg),
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Mode(err) => Some(err),
            Error::Decode(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// State of a file on which an operation was attempted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InvalidState {
    /// The file was never opened.
    NotOpened,
    /// The file is already closed.
    Closed,
}

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvalidState::NotOpened => "file is not opened",
            InvalidState::Closed => "file is closed",
        })
    }
}

/// Error decoding text read from a file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodeError {
    /// Encoding used in decoding.
    pub encoding: Encoding,
    /// Offset in the file at which the chunk started.
    pub offset: u64,
    /// Number of bytes in the chunk that were valid.
    pub valid_up_to: usize,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} sequence at offset {}",
            self.encoding,
            self.offset + self.valid_up_to as u64
        )
    }
}

impl std::error::Error for DecodeError {}
