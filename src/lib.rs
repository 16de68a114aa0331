//! Asynchronous file access for Heph.
//!
//! Blocking file system calls don't mix with a scheduler running many
//! futures on a single thread. This crate moves all file I/O to an
//! asynchronous I/O (AIO) [context] and exposes the results as futures.
//!
//! [context]: context::AioContext
//!
//! ## Layers
//!
//! The crate is built up in layers, each using the one below it:
//!
//!  * [`AioContext`] executes positional reads, writes and syncs on a file
//!    descriptor, see the [`context`] module.
//!  * [`AioFile`] is the file handle. It manages the lifecycle of the file
//!    descriptor and exposes reads and writes at explicit offsets, retrying
//!    partial writes.
//!  * [`Reader`], [`Writer`] and [`LineReader`] provide sequential access,
//!    keeping their own offset.
//!  * [`FileView`] provides a cursor based, file-like API. [`open`] is the
//!    simplest way to get one.
//!  * [`Registry`] hands out a context per scheduler.
//!
//! ## Examples
//!
//! ```
//! use std::sync::Arc;
//!
//! use heph_file::context::Inline;
//! use heph_file::{open, AnyFile};
//!
//! # fn block_on<Fut: std::future::Future>(fut: Fut) -> Fut::Output {
//! #     let mut fut = std::pin::pin!(fut);
//! #     let mut ctx = std::task::Context::from_waker(std::task::Waker::noop());
//! #     loop {
//! #         if let std::task::Poll::Ready(res) = fut.as_mut().poll(&mut ctx) {
//! #             return res;
//! #         }
//! #     }
//! # }
//! # let path = std::env::temp_dir().join("heph_file.lib_doc.txt");
//! # let path = path.to_str().unwrap();
//! block_on(async {
//!     let AnyFile::Text(file) = open(path, "w+", Arc::new(Inline)).await? else {
//!         unreachable!()
//!     };
//!     let _ = file.write("Hello world").await?;
//!     file.seek(0);
//!     assert_eq!(file.read_to_end().await?, "Hello world");
//!     file.close().await
//! })
//! .unwrap();
//! ```
//!
//! ## Logging
//!
//! The crate logs using the [`log`] crate. Opening and closing files and
//! starting and stopping contexts is logged at the debug level, partial
//! writes and decoding retries at the trace level. Files dropped without
//! being closed are logged as a warning.
//!
//! [`log`]: https://docs.rs/log

#![warn(
    anonymous_parameters,
    bare_trait_objects,
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results,
    variant_size_differences
)]
// Disallow warnings when running tests.
#![cfg_attr(test, deny(warnings))]
// Disallow warnings in examples, we want to set a good example after all.
#![doc(test(attr(deny(warnings))))]

#[cfg(not(unix))]
compile_error!("Heph-file currently only supports Unix.");

/// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)? ) ) => {{
        let res = unsafe { libc::$fn($( $arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod context;
mod encoding;
mod error;
mod file;
mod lines;
mod mode;
mod reader;
pub mod registry;
mod sync;
mod sys;
mod view;
mod writer;

#[doc(no_inline)]
pub use context::AioContext;
pub use encoding::Encoding;
pub use error::{DecodeError, Error, InvalidState, Result};
pub use file::{AioFile, OpenOptions};
pub use lines::LineReader;
pub use mode::{Mode, ModeError};
pub use reader::{decode_chunk, ByteReader, Content, Reader, TextReader};
#[doc(no_inline)]
pub use registry::Registry;
pub use view::{open, AnyFile, BinaryFile, FileView, TextFile};
pub use writer::Writer;
