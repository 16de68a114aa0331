//! Chunked sequential reading.

use std::fmt;
use std::marker::PhantomData;

use log::trace;

use crate::error::{DecodeError, Error, Result};
use crate::file::AioFile;
use crate::sync::Mutex;

/// Content read from a file, either bytes (`Vec<u8>`) or text (`String`).
///
/// This trait is sealed and can't be implemented outside of this crate.
#[allow(async_fn_in_trait)] // Only implemented in this crate.
pub trait Content: private::Sealed + Default + fmt::Debug + Sized {
    /// `true` for bytes, read from files opened in binary mode.
    #[doc(hidden)]
    const BINARY: bool;

    /// Read a chunk of roughly `size` bytes at `offset`.
    ///
    /// Returns the number of bytes consumed from the file and the content.
    #[doc(hidden)]
    async fn read_chunk(file: &AioFile, size: usize, offset: u64) -> Result<(usize, Self)>;

    /// Returns the content as bytes.
    #[doc(hidden)]
    fn as_bytes(&self) -> &[u8];

    /// Append `other`.
    #[doc(hidden)]
    fn append(&mut self, other: Self);

    /// Split at byte index `at`, which must be a valid boundary.
    #[doc(hidden)]
    fn split_off(&mut self, at: usize) -> Self;

    /// Convert `separator` into content as it would be read from `file`.
    #[doc(hidden)]
    fn separator(file: &AioFile, separator: &str) -> Self;

    /// Returns `true` if the content is empty.
    fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for Vec<u8> {}
    impl Sealed for String {}
}

impl Content for Vec<u8> {
    const BINARY: bool = true;

    async fn read_chunk(file: &AioFile, size: usize, offset: u64) -> Result<(usize, Self)> {
        let bytes = file.read_bytes(Some(size), offset).await?;
        Ok((bytes.len(), bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn append(&mut self, mut other: Self) {
        Vec::append(self, &mut other);
    }

    fn split_off(&mut self, at: usize) -> Self {
        Vec::split_off(self, at)
    }

    fn separator(file: &AioFile, separator: &str) -> Self {
        file.encode(separator)
    }
}

impl Content for String {
    const BINARY: bool = false;

    async fn read_chunk(file: &AioFile, size: usize, offset: u64) -> Result<(usize, Self)> {
        decode_chunk(file, Some(size), offset).await
    }

    fn as_bytes(&self) -> &[u8] {
        str::as_bytes(self)
    }

    fn append(&mut self, other: Self) {
        self.push_str(&other);
    }

    fn split_off(&mut self, at: usize) -> Self {
        String::split_off(self, at)
    }

    fn separator(_: &AioFile, separator: &str) -> Self {
        separator.to_owned()
    }
}

/// Read and decode `size` bytes of text from `file` at `offset`.
///
/// If the bytes end inside a multi-byte character, reading is retried with
/// one more byte at a time, up to [`Encoding::max_extra_bytes`], so that the
/// returned text only ever contains whole characters. Returns the number of
/// bytes consumed, which should be used to advance the offset, and the text.
///
/// If `size` is `None` this reads up to the end of the file.
///
/// [`Encoding::max_extra_bytes`]: crate::Encoding::max_extra_bytes
pub async fn decode_chunk(
    file: &AioFile,
    size: Option<usize>,
    offset: u64,
) -> Result<(usize, String)> {
    let encoding = file.encoding();
    let Some(size) = size else {
        let bytes = file.read_bytes(None, offset).await?;
        return match encoding.decode(&bytes) {
            Ok(text) => Ok((bytes.len(), text)),
            Err(valid_up_to) => Err(Error::Decode(DecodeError {
                encoding,
                offset,
                valid_up_to,
            })),
        };
    };

    let mut extra = 0;
    loop {
        let bytes = file.read_bytes(Some(size.saturating_add(extra)), offset).await?;
        match encoding.decode(&bytes) {
            Ok(text) => return Ok((bytes.len(), text)),
            Err(valid_up_to) => {
                // Reading more won't help if we already hit the end of the
                // file.
                let at_end = bytes.len() < size.saturating_add(extra);
                extra += 1;
                if extra >= encoding.max_extra_bytes() || at_end {
                    return Err(Error::Decode(DecodeError {
                        encoding,
                        offset,
                        valid_up_to,
                    }));
                }
                trace!(
                    offset = offset, size = size, extra = extra;
                    "chunk ends inside a character, reading more"
                );
            }
        }
    }
}

/// Sequential reader yielding chunks of a file.
///
/// Each call to [`Reader::read_chunk`] reads the next chunk of (up to)
/// `chunk_size` bytes and advances the reader's offset. Calls are serialised,
/// so concurrent calls never read the same chunk.
///
/// For text files use [`TextReader`], which never splits a character.
pub struct Reader<'f, C = Vec<u8>> {
    file: &'f AioFile,
    offset: Mutex<u64>,
    chunk_size: usize,
    _content: PhantomData<fn() -> C>,
}

/// [`Reader`] yielding bytes.
pub type ByteReader<'f> = Reader<'f, Vec<u8>>;

/// [`Reader`] yielding text.
pub type TextReader<'f> = Reader<'f, String>;

impl<'f, C: Content> Reader<'f, C> {
    /// Default size of a chunk, 32 KiB.
    pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

    /// Create a new reader starting at `offset`.
    ///
    /// # Panics
    ///
    /// This panics if `chunk_size` is zero.
    pub fn new(file: &'f AioFile, offset: u64, chunk_size: usize) -> Reader<'f, C> {
        assert!(chunk_size != 0, "can't read chunks of zero bytes");
        Reader {
            file,
            offset: Mutex::new(offset),
            chunk_size,
            _content: PhantomData,
        }
    }

    /// Returns the file being read.
    pub const fn file(&self) -> &'f AioFile {
        self.file
    }

    /// Returns the offset of the next chunk.
    pub fn offset(&mut self) -> u64 {
        *self.offset.get_mut()
    }

    /// Read the next chunk.
    ///
    /// An empty chunk means the end of the file was reached.
    pub async fn read_chunk(&self) -> Result<C> {
        let mut offset = self.offset.lock().await;
        let (consumed, chunk) = C::read_chunk(self.file, self.chunk_size, *offset).await?;
        *offset += consumed as u64;
        Ok(chunk)
    }

    /// Returns the next chunk, or `None` at the end of the file.
    pub async fn next(&self) -> Option<Result<C>> {
        match self.read_chunk().await {
            Ok(chunk) if chunk.is_empty() => None,
            result => Some(result),
        }
    }
}

impl<'f, C> fmt::Debug for Reader<'f, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("file", &self.file)
            .field("offset", &self.offset)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}
