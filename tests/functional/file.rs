//! Tests for `AioFile`.

use std::sync::Arc;

use heph_file::context::{AioContext, Inline};
use heph_file::{AioFile, Encoding, Error, InvalidState, OpenOptions};

use crate::util::{
    assert_send, assert_sync, block_on, join_all, random_bytes, temp_file, thread_pool,
    ScriptedContext,
};

const DATA: &[u8] = b"Hello, World";

#[test]
fn is_send_and_sync() {
    assert_send::<AioFile>();
    assert_sync::<AioFile>();
}

#[test]
fn round_trip() {
    let ctx: Arc<dyn AioContext> = thread_pool();
    for n in [0, 1, 4096, 1_000_000] {
        let path = temp_file(&format!("round_trip_{n}"));
        let data = random_bytes(n);
        block_on(async {
            let file = OpenOptions::new("w+b").unwrap().open(path, ctx.clone()).await.unwrap();
            assert_eq!(file.write_bytes(&data, 0).await.unwrap(), n);
            let got = file.read_bytes(Some(n), 0).await.unwrap();
            assert!(got == data, "read different bytes for n = {n}");
            file.close().await.unwrap();
        });
    }
}

#[test]
fn read_to_end() {
    let path = temp_file("file_read_to_end");
    block_on(async {
        let file = OpenOptions::new("w+b").unwrap().open(path, Arc::new(Inline)).await.unwrap();
        let _ = file.write_bytes(DATA, 0).await.unwrap();
        assert_eq!(file.size().await.unwrap(), DATA.len() as u64);
        assert_eq!(file.read_bytes(None, 0).await.unwrap(), DATA);
        assert_eq!(file.read_bytes(None, 7).await.unwrap(), &DATA[7..]);
        assert!(file.read_bytes(None, 100).await.unwrap().is_empty());
        // Reading past the end returns fewer bytes.
        assert_eq!(file.read_bytes(Some(100), 7).await.unwrap(), &DATA[7..]);
        file.close().await.unwrap();
    });
}

#[test]
fn partial_write() {
    let path = temp_file("file_partial_write");
    let ctx = ScriptedContext::new([3, 4]);
    block_on(async {
        let file = OpenOptions::new("w").unwrap().open(&path, ctx.clone()).await.unwrap();
        assert_eq!(file.write_bytes(b"payload", 0).await.unwrap(), 7);
        file.close().await.unwrap();
    });
    assert_eq!(
        ctx.writes(),
        vec![(b"payload".to_vec(), 0), (b"load".to_vec(), 3)]
    );
}

#[test]
fn partial_write_at_offset() {
    let path = temp_file("file_partial_write_at_offset");
    let ctx = ScriptedContext::new([1, 1, 2]);
    block_on(async {
        let file = OpenOptions::new("w").unwrap().open(&path, ctx.clone()).await.unwrap();
        assert_eq!(file.write_bytes(b"data", 10).await.unwrap(), 4);
        file.close().await.unwrap();
    });
    assert_eq!(
        ctx.writes(),
        vec![
            (b"data".to_vec(), 10),
            (b"ata".to_vec(), 11),
            (b"ta".to_vec(), 12),
        ]
    );
}

#[test]
fn write_stalled() {
    let path = temp_file("file_write_stalled");
    let ctx = ScriptedContext::new([3, 0]);
    block_on(async {
        let file = OpenOptions::new("w").unwrap().open(&path, ctx.clone()).await.unwrap();
        match file.write_bytes(b"payload", 0).await {
            Err(Error::WriteStalled { path: p, offset, written }) => {
                assert_eq!(p, path);
                assert_eq!(offset, 0);
                assert_eq!(written, 3);
            }
            res => panic!("unexpected result: {res:?}"),
        }
        file.close().await.unwrap();
    });
    assert_eq!(ctx.writes().len(), 2);
}

#[test]
fn write_os_error() {
    let path = temp_file("file_write_os_error");
    let ctx = ScriptedContext::new([-27]);
    block_on(async {
        let file = OpenOptions::new("w").unwrap().open(&path, ctx.clone()).await.unwrap();
        let err = file.write_bytes(b"payload", 0).await.unwrap_err();
        assert_eq!(err.errno(), Some(27));
        assert_eq!(err.path(), Some(&*path));
        assert!(matches!(err, Error::Os { errno: 27, .. }));
        file.close().await.unwrap();
    });
}

#[test]
fn concurrent_open() {
    let path = temp_file("file_concurrent_open");
    let file = AioFile::new(&path, "w", thread_pool()).unwrap();
    assert!(!file.is_open());

    let results = join_all(vec![file.open(), file.open(), file.open()]);
    let opened: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(opened.iter().filter(|fd| fd.is_some()).count(), 1);
    let fd = opened.into_iter().flatten().next().unwrap();
    assert_eq!(file.fileno().unwrap(), fd);
    assert!(file.is_open());

    // Opening again is a no-op.
    assert_eq!(block_on(file.open()).unwrap(), None);
    block_on(file.close()).unwrap();
}

#[test]
fn clone_then_close() {
    let path = temp_file("file_clone_then_close");
    let ctx = ScriptedContext::new([]);
    block_on(async {
        let file = OpenOptions::new("w+").unwrap().open(&path, ctx.clone()).await.unwrap();
        let clone = file.clone();
        assert_eq!(file.clone_count(), 1);

        // Only releases the clone.
        clone.close().await.unwrap();
        assert!(file.is_open());
        assert_eq!(file.clone_count(), 0);
        assert_eq!(file.write_text("still usable", 0).await.unwrap(), 12);

        file.close().await.unwrap();
        assert!(file.is_closed());
        assert!(clone.is_closed());
    });
}

#[test]
fn close_is_idempotent() {
    let path = temp_file("file_close_is_idempotent");
    let ctx = ScriptedContext::new([]);
    block_on(async {
        let file = OpenOptions::new("r+").unwrap();
        std::fs::write(&path, DATA).unwrap();
        let file = file.open(&path, ctx.clone()).await.unwrap();

        // Sync and close.
        let jobs = ctx.jobs();
        file.close().await.unwrap();
        assert_eq!(ctx.jobs(), jobs + 2);
        assert!(file.is_closed());

        file.close().await.unwrap();
        assert_eq!(ctx.jobs(), jobs + 2);
    });
}

#[test]
fn closed_file() {
    let path = temp_file("file_closed_file");
    block_on(async {
        let file = OpenOptions::new("w").unwrap().open(&path, Arc::new(Inline)).await.unwrap();
        file.close().await.unwrap();

        assert!(matches!(
            file.open().await,
            Err(Error::InvalidState(InvalidState::Closed))
        ));
        assert!(matches!(
            file.write_bytes(DATA, 0).await,
            Err(Error::InvalidState(InvalidState::Closed))
        ));
        assert!(matches!(
            file.fileno(),
            Err(Error::InvalidState(InvalidState::Closed))
        ));
    });
}

#[test]
fn not_opened_file() {
    let path = temp_file("file_not_opened");
    let file = AioFile::new(&path, "r", Arc::new(Inline)).unwrap();
    assert!(!file.is_open());
    assert!(!file.is_closed());
    block_on(async {
        assert!(matches!(
            file.read_bytes(Some(1), 0).await,
            Err(Error::InvalidState(InvalidState::NotOpened))
        ));
        // Closing an unopened file does nothing.
        file.close().await.unwrap();
        assert!(!file.is_closed());
    });
}

#[test]
fn open_not_found() {
    let path = temp_file("file_open_not_found");
    let err = block_on(OpenOptions::new("r").unwrap().open(&path, Arc::new(Inline))).unwrap_err();
    assert_eq!(err.errno(), Some(libc::ENOENT));
    assert!(matches!(err, Error::Io(..)));
}

#[test]
fn exclusive_create() {
    let path = temp_file("file_exclusive_create");
    block_on(async {
        let file = OpenOptions::new("x").unwrap().open(&path, Arc::new(Inline)).await.unwrap();
        file.close().await.unwrap();

        let err = OpenOptions::new("x").unwrap().open(&path, Arc::new(Inline)).await.unwrap_err();
        assert_eq!(err.errno(), Some(libc::EEXIST));
    });
}

#[test]
fn invalid_mode() {
    let path = temp_file("file_invalid_mode");
    assert!(matches!(
        AioFile::new(&path, "rw", Arc::new(Inline)),
        Err(Error::Mode(..))
    ));
    // Never reached the file system.
    assert!(!path.exists());
}

#[test]
fn text() {
    let path = temp_file("file_text");
    block_on(async {
        let file = OpenOptions::new("w+")
            .unwrap()
            .encoding(Encoding::Utf16Be)
            .open(&path, Arc::new(Inline))
            .await
            .unwrap();
        assert_eq!(file.write_text("한글", 0).await.unwrap(), 4);
        // Size in bytes, ending in the middle of a character.
        assert_eq!(file.read_text(Some(3), 0).await.unwrap(), "한글");
        assert_eq!(file.read_text(None, 2).await.unwrap(), "글");
        assert_eq!(file.decode(&file.read_bytes(None, 0).await.unwrap()).unwrap(), "한글");
        file.close().await.unwrap();
    });
}

#[test]
fn text_on_binary_file() {
    let path = temp_file("file_text_on_binary_file");
    block_on(async {
        let file = OpenOptions::new("wb").unwrap().open(&path, Arc::new(Inline)).await.unwrap();
        assert!(matches!(
            file.write_text("text", 0).await,
            Err(Error::InvalidInput(..))
        ));
        file.close().await.unwrap();
    });
}

#[test]
fn from_std() {
    let path = temp_file("file_from_std");
    std::fs::write(&path, DATA).unwrap();
    let std_file = std::fs::File::open(&path).unwrap();
    let file = AioFile::from_std(std_file, &path, "rb", Arc::new(Inline)).unwrap();
    assert!(file.is_open());
    block_on(async {
        assert_eq!(file.open().await.unwrap(), None);
        assert_eq!(file.read_bytes(None, 0).await.unwrap(), DATA);
        file.close().await.unwrap();
    });
}

#[test]
fn try_clone_fd() {
    let path = temp_file("file_try_clone_fd");
    block_on(async {
        let file = OpenOptions::new("w+b").unwrap().open(&path, Arc::new(Inline)).await.unwrap();
        let dup = file.try_clone_fd().await.unwrap();
        assert_ne!(file.fileno().unwrap(), dup.fileno().unwrap());
        assert_eq!(dup.clone_count(), 0);

        let _ = dup.write_bytes(DATA, 0).await.unwrap();
        dup.close().await.unwrap();
        assert!(file.is_open());
        assert_eq!(file.read_bytes(None, 0).await.unwrap(), DATA);
        file.close().await.unwrap();
    });
}

#[test]
fn truncate_sync_and_permissions() {
    let path = temp_file("file_truncate_sync_and_permissions");
    block_on(async {
        let file = OpenOptions::new("w+b")
            .unwrap()
            .permissions(0o600)
            .open(&path, thread_pool())
            .await
            .unwrap();
        let _ = file.write_bytes(DATA, 0).await.unwrap();
        file.fsync().await.unwrap();
        file.truncate(5).await.unwrap();
        file.fdsync().await.unwrap();
        assert_eq!(file.read_bytes(None, 0).await.unwrap(), &DATA[..5]);

        file.set_permissions(0o640).await.unwrap();
        file.close().await.unwrap();
    });

    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(&path).unwrap();
    assert_eq!(metadata.permissions().mode() & 0o777, 0o640);
    assert_eq!(metadata.len(), 5);
}

#[test]
fn drop_without_close() {
    let path = temp_file("file_drop_without_close");
    let file = block_on(OpenOptions::new("w+b").unwrap().open(&path, Arc::new(Inline))).unwrap();
    let clone = file.clone();
    // Dropping a clone doesn't close the file.
    drop(file);
    block_on(async {
        let _ = clone.write_bytes(DATA, 0).await.unwrap();
        assert_eq!(clone.read_bytes(None, 0).await.unwrap(), DATA);
    });
    assert!(clone.is_open());
    // Closes the file without syncing.
    drop(clone);
}

#[test]
fn read_more_than_the_file() {
    let path = temp_file("file_read_more_than_the_file");
    let data = random_bytes(200_000);
    std::fs::write(&path, &data).unwrap();
    block_on(async {
        let file = OpenOptions::new("r").unwrap().open(&path, thread_pool()).await.unwrap();
        assert_eq!(file.read_bytes(Some(usize::MAX), 0).await.unwrap(), data);
        assert_eq!(file.read_bytes(Some(usize::MAX), 199_998).await.unwrap(), &data[199_998..]);
        assert!(file.read_bytes(Some(usize::MAX), 300_000).await.unwrap().is_empty());
        file.close().await.unwrap();
    });
}

#[test]
fn dropped_clone_is_released() {
    let path = temp_file("file_dropped_clone_is_released");
    let ctx = ScriptedContext::new([]);
    block_on(async {
        let file = OpenOptions::new("w").unwrap().open(&path, ctx.clone()).await.unwrap();
        let owner = file.clone();
        let closed_owner = file.clone();
        assert_eq!(file.clone_count(), 2);

        closed_owner.close().await.unwrap();
        assert_eq!(file.clone_count(), 1);
        // Already released by closing it.
        drop(closed_owner);
        assert_eq!(file.clone_count(), 1);

        // Owner returning early, without closing.
        drop(owner);
        assert_eq!(file.clone_count(), 0);

        // Sync and close.
        let jobs = ctx.jobs();
        file.close().await.unwrap();
        assert_eq!(ctx.jobs(), jobs + 2);
        assert!(file.is_closed());
    });
}

#[test]
fn clone_then_close_twice() {
    let path = temp_file("file_clone_then_close_twice");
    block_on(async {
        let file = OpenOptions::new("w").unwrap().open(&path, Arc::new(Inline)).await.unwrap();
        let _clone = file.clone();

        file.close().await.unwrap();
        assert!(file.is_open());
        file.close().await.unwrap();
        assert!(file.is_closed());
    });
}

#[test]
fn with_opens_and_closes() {
    let path = temp_file("file_with_opens_and_closes");
    block_on(async {
        let file = AioFile::new(&path, "w", Arc::new(Inline)).unwrap();
        let observer = file.clone();
        // Release our clone, so `with` closes the file.
        observer.close().await.unwrap();

        let written = file
            .with(async |file| file.write_text("scoped", 0).await)
            .await
            .unwrap();
        assert_eq!(written, 6);
        assert!(observer.is_closed());
    });
    assert_eq!(std::fs::read(&path).unwrap(), b"scoped");
}

#[test]
fn with_closes_on_error() {
    let path = temp_file("file_with_closes_on_error");
    block_on(async {
        let file = AioFile::new(&path, "w", Arc::new(Inline)).unwrap();
        let observer = file.clone();
        observer.close().await.unwrap();

        let result: Result<(), Error> = file
            .with(async |file| {
                let _ = file.write_text("partial", 0).await?;
                Err(Error::InvalidInput("stop"))
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput("stop"))));
        assert!(observer.is_closed());
    });
    assert_eq!(std::fs::read(&path).unwrap(), b"partial");
}

#[test]
fn with_open_error() {
    let path = temp_file("file_with_open_error");
    block_on(async {
        let file = AioFile::new(&path, "r", Arc::new(Inline)).unwrap();
        let result = file.with(async |_| Ok::<_, Error>(())).await;
        assert_eq!(result.unwrap_err().errno(), Some(libc::ENOENT));
    });
}
