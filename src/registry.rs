//! Default I/O context per scheduler.
//!
//! Files always take their [`AioContext`] explicitly. For schedulers that
//! want a single context shared by all futures they run, the [`Registry`]
//! lazily creates one context per scheduler and shuts it down once the
//! scheduler is done with it.
//!
//! # Examples
//!
//! ```
//! use heph_file::context::{Backend, Setup};
//! use heph_file::registry::{Registry, SchedulerId};
//!
//! let registry = Registry::from_backend(Backend::Inline, Setup::new());
//! let scheduler = SchedulerId::new();
//!
//! // Shut down the context when the scheduler stops.
//! let hook = registry.shutdown_hook(scheduler);
//! let ctx = registry.context(scheduler).unwrap();
//! # _ = ctx;
//! assert_eq!(registry.len(), 1);
//!
//! drop(hook);
//! assert_eq!(registry.len(), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::{fmt, io};

use log::debug;

use crate::context::{AioContext, Backend, Setup};

/// Identifier of a scheduler.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SchedulerId(u64);

impl SchedulerId {
    /// Create a new unique id.
    pub fn new() -> SchedulerId {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        SchedulerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the id of the scheduler running on the current thread.
    ///
    /// This assumes a single scheduler per thread, returning the same id for
    /// each call on the same thread.
    pub fn current_thread() -> SchedulerId {
        thread_local! {
            static ID: SchedulerId = SchedulerId::new();
        }
        ID.with(|id| *id)
    }
}

impl Default for SchedulerId {
    fn default() -> SchedulerId {
        SchedulerId::new()
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Function used by the [`Registry`] to create a new context.
type Factory = Box<dyn Fn(SchedulerId) -> io::Result<Arc<dyn AioContext>> + Send + Sync>;

/// Registry of the default context of each scheduler.
///
/// All contexts still registered are shut down when the registry is dropped.
pub struct Registry {
    factory: Factory,
    contexts: Mutex<HashMap<SchedulerId, Arc<dyn AioContext>>>,
}

impl Registry {
    /// Create a new registry that creates contexts using `factory`.
    pub fn new<F>(factory: F) -> Registry
    where
        F: Fn(SchedulerId) -> io::Result<Arc<dyn AioContext>> + Send + Sync + 'static,
    {
        Registry {
            factory: Box::new(factory),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new registry that creates contexts of `backend`.
    ///
    /// The worker threads of each scheduler's context are named after the
    /// scheduler.
    pub fn from_backend(backend: Backend, setup: Setup) -> Registry {
        Registry::new(move |scheduler| {
            let setup = setup.clone().with_name(format!("aio{scheduler}"));
            backend.create(setup)
        })
    }

    /// Returns the context of `scheduler`, creating it if needed.
    pub fn context(&self, scheduler: SchedulerId) -> io::Result<Arc<dyn AioContext>> {
        let mut contexts = self.contexts();
        if let Some(ctx) = contexts.get(&scheduler) {
            return Ok(ctx.clone());
        }
        let ctx = (self.factory)(scheduler)?;
        debug!(scheduler = scheduler.0; "created default I/O context");
        let _ = contexts.insert(scheduler, ctx.clone());
        Ok(ctx)
    }

    /// Returns the context of `scheduler`, if any.
    pub fn get(&self, scheduler: SchedulerId) -> Option<Arc<dyn AioContext>> {
        self.contexts().get(&scheduler).cloned()
    }

    /// Remove and shut down the context of `scheduler`.
    ///
    /// Returns `false` if the scheduler didn't have a context.
    pub fn shutdown(&self, scheduler: SchedulerId) -> bool {
        let ctx = self.contexts().remove(&scheduler);
        match ctx {
            Some(ctx) => {
                ctx.close();
                debug!(scheduler = scheduler.0; "shut down default I/O context");
                true
            }
            None => false,
        }
    }

    /// Returns a hook that shuts down the context of `scheduler` once
    /// dropped.
    ///
    /// This should be held by the scheduler for as long as it runs.
    pub fn shutdown_hook(&self, scheduler: SchedulerId) -> ShutdownHook<'_> {
        ShutdownHook {
            registry: self,
            scheduler,
        }
    }

    /// Returns the number of registered contexts.
    pub fn len(&self) -> usize {
        self.contexts().len()
    }

    /// Returns `true` if no contexts are registered.
    pub fn is_empty(&self) -> bool {
        self.contexts().is_empty()
    }

    fn contexts(&self) -> MutexGuard<'_, HashMap<SchedulerId, Arc<dyn AioContext>>> {
        match self.contexts.lock() {
            Ok(contexts) => contexts,
            Err(err) => err.into_inner(),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let contexts = match self.contexts.get_mut() {
            Ok(contexts) => contexts,
            Err(err) => err.into_inner(),
        };
        for (_, ctx) in contexts.drain() {
            ctx.close();
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("contexts", &self.contexts())
            .finish_non_exhaustive()
    }
}

/// Shuts down the context of a scheduler when dropped, see
/// [`Registry::shutdown_hook`].
#[derive(Debug)]
#[must_use = "the context is shut down immediately if the hook is not held"]
pub struct ShutdownHook<'r> {
    registry: &'r Registry,
    scheduler: SchedulerId,
}

impl<'r> ShutdownHook<'r> {
    /// Returns the scheduler this hook belongs to.
    pub const fn scheduler(&self) -> SchedulerId {
        self.scheduler
    }
}

impl<'r> Drop for ShutdownHook<'r> {
    fn drop(&mut self) {
        let _ = self.registry.shutdown(self.scheduler);
    }
}
