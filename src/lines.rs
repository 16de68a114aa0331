//! Splitting files into lines.

use std::{fmt, mem};

use crate::error::Result;
use crate::file::AioFile;
use crate::reader::{Content, Reader};

/// Reads a file line by line.
///
/// Lines include the separator, except for the last line if the file doesn't
/// end with one. Once the end of the file is reached the reader stays there.
pub struct LineReader<'f, C = Vec<u8>> {
    reader: Reader<'f, C>,
    separator: C,
    /// Data read but not yet returned.
    buffer: C,
    eof: bool,
}

impl<'f, C: Content> LineReader<'f, C> {
    /// Default size of the chunks read.
    pub const DEFAULT_CHUNK_SIZE: usize = 4192;

    /// Create a new line reader starting at `offset`, reading chunks of
    /// `chunk_size` and splitting on `separator`.
    ///
    /// # Panics
    ///
    /// This panics if `chunk_size` is zero or `separator` is empty.
    pub fn new(
        file: &'f AioFile,
        offset: u64,
        chunk_size: usize,
        separator: &str,
    ) -> LineReader<'f, C> {
        assert!(!separator.is_empty(), "can't split lines on an empty separator");
        LineReader {
            reader: Reader::new(file, offset, chunk_size),
            separator: C::separator(file, separator),
            buffer: C::default(),
            eof: false,
        }
    }

    /// Read the next line.
    ///
    /// Returns an empty line at the end of the file.
    pub async fn read_line(&mut self) -> Result<C> {
        loop {
            if let Some(pos) = find(self.buffer.as_bytes(), self.separator.as_bytes()) {
                let rest = self.buffer.split_off(pos + self.separator.as_bytes().len());
                return Ok(mem::replace(&mut self.buffer, rest));
            }
            if self.eof {
                return Ok(mem::take(&mut self.buffer));
            }

            let chunk = self.reader.read_chunk().await?;
            if chunk.is_empty() {
                self.eof = true;
            } else {
                self.buffer.append(chunk);
            }
        }
    }

    /// Returns the next line, or `None` at the end of the file.
    pub async fn next(&mut self) -> Option<Result<C>> {
        match self.read_line().await {
            Ok(line) if line.is_empty() => None,
            result => Some(result),
        }
    }
}

/// Returns the position of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl<'f, C: fmt::Debug> fmt::Debug for LineReader<'f, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineReader")
            .field("reader", &self.reader)
            .field("separator", &self.separator)
            .field("buffered", &self.buffer)
            .field("eof", &self.eof)
            .finish()
    }
}
