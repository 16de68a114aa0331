//! Tests for the `Registry`.

use std::sync::Arc;

use heph_file::context::{Backend, Setup};
use heph_file::registry::{Registry, SchedulerId};
use heph_file::TextFile;

use crate::util::{assert_send, assert_sync, block_on, temp_file};

#[test]
fn registry_is_send_and_sync() {
    assert_send::<Registry>();
    assert_sync::<Registry>();
}

#[test]
fn default_context_per_scheduler() {
    let registry = Arc::new(Registry::from_backend(
        Backend::ThreadPool,
        Setup::new().num_threads(1),
    ));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                // Each thread acts as a scheduler.
                let scheduler = SchedulerId::current_thread();
                let _hook = registry.shutdown_hook(scheduler);
                let ctx = registry.context(scheduler).unwrap();
                assert!(Arc::ptr_eq(&ctx, &registry.context(scheduler).unwrap()));

                let path = temp_file(&format!("registry_default_context_{i}"));
                block_on(async {
                    let file = TextFile::open(path, "w+", ctx).await.unwrap();
                    let _ = file.write("scheduler").await.unwrap();
                    file.seek(0);
                    assert_eq!(file.read_to_end().await.unwrap(), "scheduler");
                    file.close().await.unwrap();
                });
                scheduler
            })
        })
        .collect();

    let schedulers: Vec<SchedulerId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_ne!(schedulers[0], schedulers[1]);
    // All contexts shut down by the hooks.
    assert!(registry.is_empty());
    assert!(registry.get(schedulers[0]).is_none());
}

#[test]
fn shutdown_closes_the_context() {
    let registry = Registry::from_backend(Backend::ThreadPool, Setup::new().num_threads(1));
    let scheduler = SchedulerId::new();
    let ctx = registry.context(scheduler).unwrap();
    assert!(registry.shutdown(scheduler));

    // Operations submitted after the shut down fail.
    let path = temp_file("registry_shutdown_closes_the_context");
    let res = block_on(TextFile::open(path, "w", ctx));
    assert!(res.is_err());

    // New context on next use.
    let new_ctx = registry.context(scheduler).unwrap();
    assert!(Arc::ptr_eq(&new_ctx, &registry.get(scheduler).unwrap()));
    assert_eq!(registry.len(), 1);
}
