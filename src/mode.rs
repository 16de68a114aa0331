//! Module with [`Mode`], parsing of textual open modes.

use std::fmt;

/// Mode in which a file is opened.
///
/// Created by parsing a mode string, see [`Mode::parse`]. The string must
/// contain exactly one of the following primary intents:
///  * `r`: open for reading.
///  * `w`: open for writing, creating the file if it doesn't exist and
///    truncating it if it does.
///  * `a`: open for appending, creating the file if it doesn't exist.
///  * `x`: create the file and open it for writing, failing if it already
///    exists.
///
/// Optionally followed by `+` (open for both reading and writing) and `b`
/// (binary) or `t` (text, the default).
///
/// # Examples
///
/// ```
/// use heph_file::Mode;
///
/// let mode = Mode::parse("a+b").unwrap();
/// assert!(mode.readable());
/// assert!(mode.writable());
/// assert!(mode.appending());
/// assert!(mode.binary());
/// assert_eq!(mode.flags(), libc::O_RDWR | libc::O_CREAT | libc::O_APPEND);
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mode {
    readable: bool,
    writable: bool,
    plus: bool,
    appending: bool,
    exclusive_create: bool,
    binary: bool,
    flags: libc::c_int,
}

impl Mode {
    /// Parse a mode string.
    pub fn parse(mode: &str) -> Result<Mode, ModeError> {
        let mut intent = None;
        let mut plus = false;
        let mut binary = None;

        for c in mode.chars() {
            match c {
                'r' | 'w' | 'a' | 'x' => match intent {
                    Some(i) if i == c => return Err(ModeError::Duplicate(c)),
                    Some(_) => return Err(ModeError::MultipleIntents),
                    None => intent = Some(c),
                },
                '+' if plus => return Err(ModeError::Duplicate(c)),
                '+' => plus = true,
                'b' | 't' => match binary {
                    Some(b) if (c == 'b') == b => return Err(ModeError::Duplicate(c)),
                    Some(_) => return Err(ModeError::BinaryAndText),
                    None => binary = Some(c == 'b'),
                },
                c => return Err(ModeError::Unrecognised(c)),
            }
        }

        let mut readable = plus;
        let mut writable = plus;
        let mut appending = false;
        let mut exclusive_create = false;
        let mut flags = 0;
        match intent {
            Some('r') => readable = true,
            Some('w') => {
                writable = true;
                flags |= libc::O_CREAT | libc::O_TRUNC;
            }
            Some('a') => {
                writable = true;
                appending = true;
                flags |= libc::O_CREAT | libc::O_APPEND;
            }
            Some('x') => {
                writable = true;
                exclusive_create = true;
                flags |= libc::O_CREAT | libc::O_EXCL;
            }
            _ => return Err(ModeError::MissingIntent),
        }

        flags |= match (readable, writable) {
            (true, true) => libc::O_RDWR,
            (true, false) => libc::O_RDONLY,
            (false, _) => libc::O_WRONLY,
        };

        Ok(Mode {
            readable,
            writable,
            plus,
            appending,
            exclusive_create,
            binary: binary.unwrap_or(false),
            flags,
        })
    }

    /// Returns `true` if the file can be read from.
    pub const fn readable(&self) -> bool {
        self.readable
    }

    /// Returns `true` if the file can be written to.
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// Returns `true` if the `+` modifier was used.
    pub const fn plus(&self) -> bool {
        self.plus
    }

    /// Returns `true` if writes append to the end of the file.
    pub const fn appending(&self) -> bool {
        self.appending
    }

    /// Returns `true` if the file is created exclusively (`x`).
    pub const fn exclusive_create(&self) -> bool {
        self.exclusive_create
    }

    /// Returns `true` if the file is opened in binary mode.
    pub const fn binary(&self) -> bool {
        self.binary
    }

    /// Flags to pass to [`open(2)`].
    ///
    /// The binary flag isn't reflected here as POSIX doesn't distinguish
    /// between binary and text streams.
    ///
    /// [`open(2)`]: https://man7.org/linux/man-pages/man2/open.2.html
    pub const fn flags(&self) -> libc::c_int {
        self.flags
    }
}

impl std::str::FromStr for Mode {
    type Err = ModeError;

    fn from_str(mode: &str) -> Result<Mode, ModeError> {
        Mode::parse(mode)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let intent = if self.exclusive_create {
            "x"
        } else if self.appending {
            "a"
        } else if self.flags & libc::O_TRUNC != 0 {
            "w"
        } else {
            "r"
        };
        f.write_str(intent)?;
        if self.plus {
            f.write_str("+")?;
        }
        if self.binary {
            f.write_str("b")?;
        }
        Ok(())
    }
}

/// Error returned by [`Mode::parse`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModeError {
    /// More than one of `r`, `w`, `a` and `x` is present.
    MultipleIntents,
    /// None of `r`, `w`, `a` or `x` is present.
    MissingIntent,
    /// A character is repeated, e.g. `r++`.
    Duplicate(char),
    /// Both `b` and `t` are present.
    BinaryAndText,
    /// Unknown character in the mode.
    Unrecognised(char),
}

impl fmt::Display for ModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeError::MultipleIntents => {
                f.write_str("must have exactly one of read, write, append or create mode")
            }
            ModeError::MissingIntent => {
                f.write_str("must have one of read, write, append or create mode")
            }
            ModeError::Duplicate(c) => write!(f, "mode character '{c}' repeated"),
            ModeError::BinaryAndText => f.write_str("can't have both binary and text mode"),
            ModeError::Unrecognised(c) => write!(f, "unrecognised mode character '{c}'"),
        }
    }
}

impl std::error::Error for ModeError {}
