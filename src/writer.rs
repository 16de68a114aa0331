//! Sequential writing.

use crate::error::Result;
use crate::file::AioFile;
use crate::sync::Mutex;

/// Sequential writer.
///
/// Writes data at its offset, advancing it by the number of bytes written.
/// Calls are serialised, so concurrent writes are appended one after the
/// other and never overlap.
#[derive(Debug)]
pub struct Writer<'f> {
    file: &'f AioFile,
    offset: Mutex<u64>,
}

impl<'f> Writer<'f> {
    /// Create a new writer starting at `offset`.
    pub const fn new(file: &'f AioFile, offset: u64) -> Writer<'f> {
        Writer {
            file,
            offset: Mutex::new(offset),
        }
    }

    /// Returns the file being written.
    pub const fn file(&self) -> &'f AioFile {
        self.file
    }

    /// Returns the offset of the next write.
    pub fn offset(&mut self) -> u64 {
        *self.offset.get_mut()
    }

    /// Write all of `data`.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut offset = self.offset.lock().await;
        let written = self.file.write_bytes(data, *offset).await?;
        *offset += written as u64;
        Ok(written)
    }

    /// Encode `text` using the file's encoding and write it.
    pub async fn write_text(&self, text: &str) -> Result<usize> {
        self.write(&self.file.encode(text)).await
    }
}
