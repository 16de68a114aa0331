//! File-like API with a cursor.

use std::fmt;
use std::marker::PhantomData;
use std::ops::AsyncFnOnce;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::AioContext;
use crate::error::{Error, Result};
use crate::file::{AioFile, OpenOptions};
use crate::lines::{find, LineReader};
use crate::reader::{decode_chunk, Content, Reader};
use crate::sync::Mutex;

/// Size of the chunks read by `readline`.
const READLINE_CHUNK_SIZE: usize = 4192;

/// File-like view of an [`AioFile`].
///
/// The view keeps a cursor: reads and writes happen at the cursor and advance
/// it. Operations on the same view are executed one at a time, the cursor is
/// only advanced once an operation succeeds.
///
/// See [`BinaryFile`] and [`TextFile`].
pub struct FileView<C> {
    file: AioFile,
    cursor: AtomicU64,
    /// Serialises all cursor based operations.
    lock: Mutex<()>,
    _content: PhantomData<fn() -> C>,
}

/// [`FileView`] of a file opened in binary mode, reading and writing bytes.
pub type BinaryFile = FileView<Vec<u8>>;

/// [`FileView`] of a file opened in text mode, reading and writing strings.
///
/// Sizes passed to [`TextFile::read`] and [`TextFile::readline`] are in
/// characters, the cursor is in bytes.
pub type TextFile = FileView<String>;

impl<C: Content> FileView<C> {
    /// Create a new view of `file`, opening it if not yet opened.
    ///
    /// The cursor starts at the end of the file if it's opened in append
    /// mode, or at the start otherwise. Returns an error if the file's mode
    /// doesn't match the kind of view, e.g. a text mode file for a
    /// [`BinaryFile`].
    pub async fn new(file: AioFile) -> Result<FileView<C>> {
        if file.mode().binary() != C::BINARY {
            return Err(Error::InvalidInput(if C::BINARY {
                "binary view of a file in text mode"
            } else {
                "text view of a file in binary mode"
            }));
        }
        let _ = file.open().await?;
        let cursor = if file.mode().appending() {
            file.size().await?
        } else {
            0
        };
        Ok(FileView {
            file,
            cursor: AtomicU64::new(cursor),
            lock: Mutex::new(()),
            _content: PhantomData,
        })
    }

    /// Open the file at `path` with `mode`.
    pub async fn open<P: Into<PathBuf>>(
        path: P,
        mode: &str,
        context: Arc<dyn AioContext>,
    ) -> Result<FileView<C>> {
        FileView::with_options(path, OpenOptions::new(mode)?, context).await
    }

    /// Open the file at `path` using `options`.
    pub async fn with_options<P: Into<PathBuf>>(
        path: P,
        options: OpenOptions,
        context: Arc<dyn AioContext>,
    ) -> Result<FileView<C>> {
        FileView::new(options.build(path, context)).await
    }

    /// Returns the underlying file.
    pub const fn file(&self) -> &AioFile {
        &self.file
    }

    /// Returns the underlying file, dropping the view.
    pub fn into_inner(self) -> AioFile {
        self.file
    }

    /// Returns the position of the cursor.
    pub fn tell(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Move the cursor to `offset`.
    pub fn seek(&self, offset: u64) {
        self.cursor.store(offset, Ordering::Release);
    }

    fn advance(&self, n: usize) {
        let _ = self.cursor.fetch_add(n as u64, Ordering::AcqRel);
    }

    /// Close the underlying file, see [`AioFile::close`].
    pub async fn close(&self) -> Result<()> {
        self.file.close().await
    }

    /// Run `f` with the view, closing it afterwards.
    ///
    /// The file is closed even if `f` returns an error. The error of `f` takes
    /// precedence over an error closing the file.
    pub async fn with<F, T>(self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&FileView<C>) -> Result<T>,
    {
        let result = f(&self).await;
        let closed = self.close().await;
        match result {
            Ok(value) => closed.map(|()| value),
            Err(err) => Err(err),
        }
    }

    /// Returns a reader of chunks of `chunk_size`, starting at the cursor.
    ///
    /// The reader keeps its own offset, the cursor isn't moved.
    pub fn chunks(&self, chunk_size: usize) -> Reader<'_, C> {
        Reader::new(&self.file, self.tell(), chunk_size)
    }

    /// Returns a line reader starting at the cursor, splitting on new lines.
    ///
    /// The reader keeps its own offset, the cursor isn't moved.
    pub fn lines(&self) -> LineReader<'_, C> {
        LineReader::new(
            &self.file,
            self.tell(),
            LineReader::<C>::DEFAULT_CHUNK_SIZE,
            "\n",
        )
    }
}

impl BinaryFile {
    /// Read up to `n` bytes at the cursor.
    ///
    /// Returns fewer bytes only at the end of the file.
    pub async fn read(&self, n: usize) -> Result<Vec<u8>> {
        let _guard = self.lock.lock().await;
        let data = self.file.read_bytes(Some(n), self.tell()).await?;
        self.advance(data.len());
        Ok(data)
    }

    /// Read everything from the cursor up to the end of the file.
    pub async fn read_to_end(&self) -> Result<Vec<u8>> {
        let _guard = self.lock.lock().await;
        let data = self.file.read_bytes(None, self.tell()).await?;
        self.advance(data.len());
        Ok(data)
    }

    /// Write all of `data` at the cursor.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let written = self.file.write_bytes(data, self.tell()).await?;
        self.advance(written);
        Ok(written)
    }

    /// Read a line ending with `separator`, including the separator.
    ///
    /// At most `max_size` bytes are returned, if set, in which case the line
    /// may be cut short. A `max_size` of zero means no limit, same as `None`.
    /// Returns an empty line at the end of the file.
    pub async fn readline(&self, max_size: Option<usize>, separator: &[u8]) -> Result<Vec<u8>> {
        if separator.is_empty() {
            return Err(Error::InvalidInput("empty line separator"));
        }
        let max_size = max_size.filter(|max| *max != 0);

        let _guard = self.lock.lock().await;
        let start = self.tell();
        let mut line = Vec::new();
        let mut offset = start;
        let mut search_from = 0;
        let end = loop {
            if let Some(pos) = find(&line[search_from..], separator) {
                break search_from + pos + separator.len();
            }
            if max_size.is_some_and(|max| line.len() >= max) {
                break line.len();
            }
            let chunk = self.file.read_bytes(Some(READLINE_CHUNK_SIZE), offset).await?;
            if chunk.is_empty() {
                break line.len();
            }
            // The separator could span two chunks.
            search_from = line.len().saturating_sub(separator.len() - 1);
            offset += chunk.len() as u64;
            line.extend_from_slice(&chunk);
        };

        let end = max_size.map_or(end, |max| end.min(max));
        line.truncate(end);
        self.seek(start + end as u64);
        Ok(line)
    }
}

impl TextFile {
    /// Read up to `n` characters at the cursor.
    ///
    /// Returns fewer characters only at the end of the file.
    pub async fn read(&self, n: usize) -> Result<String> {
        let _guard = self.lock.lock().await;
        let start = self.tell();
        let mut text = String::new();
        let mut offset = start;
        let mut chars = 0;
        while chars < n {
            let (consumed, part) = decode_chunk(&self.file, Some(n - chars), offset).await?;
            if part.is_empty() {
                break;
            }
            chars += part.chars().count();
            offset += consumed as u64;
            text.push_str(&part);
        }

        if chars > n {
            text.truncate(char_boundary(&text, n));
            offset = start + self.file.encoding().encoded_len(&text) as u64;
        }
        self.seek(offset);
        Ok(text)
    }

    /// Read everything from the cursor up to the end of the file.
    pub async fn read_to_end(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        let (consumed, text) = decode_chunk(&self.file, None, self.tell()).await?;
        self.advance(consumed);
        Ok(text)
    }

    /// Encode and write `text` at the cursor, returns the number of bytes
    /// written.
    pub async fn write(&self, text: &str) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let data = self.file.encode(text);
        let written = self.file.write_bytes(&data, self.tell()).await?;
        self.advance(written);
        Ok(written)
    }

    /// Read a line ending with `separator`, including the separator.
    ///
    /// At most `max_size` characters are returned, if set, in which case the
    /// line may be cut short. A `max_size` of zero means no limit, same as
    /// `None`. Returns an empty line at the end of the file.
    pub async fn readline(&self, max_size: Option<usize>, separator: &str) -> Result<String> {
        if separator.is_empty() {
            return Err(Error::InvalidInput("empty line separator"));
        }
        let max_size = max_size.filter(|max| *max != 0);

        let _guard = self.lock.lock().await;
        let start = self.tell();
        let mut line = String::new();
        let mut chars = 0;
        let mut offset = start;
        let mut search_from = 0;
        let end = loop {
            if let Some(pos) = line[search_from..].find(separator) {
                break search_from + pos + separator.len();
            }
            if max_size.is_some_and(|max| chars >= max) {
                break line.len();
            }
            let (consumed, part) =
                decode_chunk(&self.file, Some(READLINE_CHUNK_SIZE), offset).await?;
            if part.is_empty() {
                break line.len();
            }
            let overlap = line.len().saturating_sub(separator.len() - 1);
            search_from = floor_char_boundary(&line, overlap);
            chars += part.chars().count();
            offset += consumed as u64;
            line.push_str(&part);
        };

        let end = match max_size {
            Some(max) => end.min(char_boundary(&line, max)),
            None => end,
        };
        line.truncate(end);
        self.seek(start + self.file.encoding().encoded_len(&line) as u64);
        Ok(line)
    }
}

/// Returns the byte index of the `n`th character in `text`, or its length.
fn char_boundary(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(idx, _)| idx)
}

/// Returns the largest character boundary in `text` not after `idx`.
fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

impl<C> fmt::Debug for FileView<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileView")
            .field("file", &self.file)
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

/// Either a [`BinaryFile`] or a [`TextFile`], returned by [`open`].
#[derive(Debug)]
pub enum AnyFile {
    /// File opened in binary mode.
    Binary(BinaryFile),
    /// File opened in text mode.
    Text(TextFile),
}

impl AnyFile {
    /// Returns the underlying file.
    pub fn file(&self) -> &AioFile {
        match self {
            AnyFile::Binary(view) => view.file(),
            AnyFile::Text(view) => view.file(),
        }
    }

    /// Close the underlying file, see [`AioFile::close`].
    pub async fn close(&self) -> Result<()> {
        self.file().close().await
    }
}

/// Open the file at `path` with `mode`, using `context` for all I/O.
///
/// Returns a [`BinaryFile`] if `mode` contains `b`, a [`TextFile`] otherwise.
/// See [`Mode::parse`] for the supported modes.
///
/// [`Mode::parse`]: crate::Mode::parse
pub async fn open<P: Into<PathBuf>>(
    path: P,
    mode: &str,
    context: Arc<dyn AioContext>,
) -> Result<AnyFile> {
    let options = OpenOptions::new(mode)?;
    let file = options.build(path, context);
    if options.mode().binary() {
        FileView::new(file).await.map(AnyFile::Binary)
    } else {
        FileView::new(file).await.map(AnyFile::Text)
    }
}
