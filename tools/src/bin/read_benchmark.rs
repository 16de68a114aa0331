//! Tool to measure the read throughput of a file using the different readers.
//!
//! Usage: `read_benchmark <path> [bytes|text|lines] [chunk_size]`.
//!
//! The I/O context is selected using the `HEPH_FILE_BACKEND` environment
//! variable, see `Backend::detect`.

use std::env::args;
use std::future::Future;
use std::pin::pin;
use std::process::ExitCode;
use std::task::{self, Poll};
use std::thread;
use std::time::{Duration, Instant};

use heph_file::context::{Backend, Setup};
use heph_file::{ByteReader, LineReader, OpenOptions, TextReader};
use log::{error, info};

fn main() -> ExitCode {
    std_logger::Config::logfmt().init();

    let mut args = args().skip(1);
    let Some(path) = args.next() else {
        error!("missing path to read");
        return ExitCode::FAILURE;
    };
    let kind = args.next().unwrap_or_else(|| "bytes".to_owned());
    let chunk_size = match args.next().map(|s| s.parse()) {
        Some(Ok(size)) => size,
        Some(Err(err)) => {
            error!("invalid chunk size: {err}");
            return ExitCode::FAILURE;
        }
        None => ByteReader::DEFAULT_CHUNK_SIZE,
    };

    let backend = Backend::detect();
    let ctx = match backend.create(Setup::new().use_all_cores()) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("failed to create I/O context: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mode = if kind == "bytes" { "rb" } else { "r" };
    let result = block_on(async {
        let file = OpenOptions::new(mode)?.open(&path, ctx.clone()).await?;
        let start = Instant::now();
        let mut bytes = 0;
        let mut items = 0;
        match kind.as_str() {
            "bytes" => {
                let reader = ByteReader::new(&file, 0, chunk_size);
                while let Some(chunk) = reader.next().await {
                    bytes += chunk?.len();
                    items += 1;
                }
            }
            "text" => {
                let reader = TextReader::new(&file, 0, chunk_size);
                while let Some(chunk) = reader.next().await {
                    bytes += file.encoding().encoded_len(&chunk?);
                    items += 1;
                }
            }
            "lines" => {
                let mut lines = LineReader::<String>::new(&file, 0, chunk_size, "\n");
                while let Some(line) = lines.next().await {
                    bytes += file.encoding().encoded_len(&line?);
                    items += 1;
                }
            }
            _ => return Err(heph_file::Error::InvalidInput("unknown reader kind")),
        }
        let elapsed = start.elapsed();
        file.close().await?;
        Ok((bytes, items, elapsed))
    });
    ctx.close();

    match result {
        Ok((bytes, items, elapsed)) => {
            info!(
                backend:% = backend, kind = kind.as_str(), chunk_size = chunk_size,
                bytes = bytes, items = items, elapsed_ms = elapsed.as_millis() as u64;
                "read {} in {elapsed:?}", throughput(bytes, elapsed)
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("failed to read '{path}': {err}");
            ExitCode::FAILURE
        }
    }
}

fn throughput(bytes: usize, elapsed: Duration) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    format!("{mb:.2} MiB ({:.2} MiB/s)", mb / elapsed.as_secs_f64().max(f64::EPSILON))
}

fn block_on<Fut: Future>(fut: Fut) -> Fut::Output {
    let mut fut = pin!(fut);
    let mut ctx = task::Context::from_waker(task::Waker::noop());
    loop {
        match fut.as_mut().poll(&mut ctx) {
            Poll::Ready(output) => return output,
            Poll::Pending => thread::yield_now(),
        }
    }
}
