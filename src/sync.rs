//! Asynchronous mutual exclusion.
//!
//! The I/O operations in this crate suspend while waiting on the I/O context,
//! so a lock that must be held over those suspension points can't be a
//! [`std::sync::Mutex`]. [`Mutex`] here queues waiting futures and wakes them
//! in FIFO order on unlock.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use std::task::{self, Poll, Waker};

/// Asynchronous mutex.
pub(crate) struct Mutex<T> {
    state: StdMutex<State>,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is guarded by `state.locked`.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

struct State {
    locked: bool,
    /// Waiting futures, by id.
    waiters: VecDeque<(u64, Waker)>,
    next_id: u64,
}

impl<T> Mutex<T> {
    pub(crate) const fn new(value: T) -> Mutex<T> {
        Mutex {
            state: StdMutex::new(State {
                locked: false,
                waiters: VecDeque::new(),
                next_id: 0,
            }),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock.
    pub(crate) const fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            id: None,
        }
    }

    /// Returns a mutable reference to the data, no locking required.
    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // The state is always consistent, even if a thread panicked while
        // holding the lock.
        match self.state.lock() {
            Ok(state) => state,
            Err(err) => err.into_inner(),
        }
    }

    fn unlock(&self) {
        let waker = {
            let mut state = self.state();
            state.locked = false;
            state.waiters.front().map(|(_, waker)| waker.clone())
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.state().locked)
            .finish_non_exhaustive()
    }
}

/// [`Future`] behind [`Mutex::lock`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub(crate) struct Lock<'m, T> {
    mutex: &'m Mutex<T>,
    /// Id in the waiters queue, if queued.
    id: Option<u64>,
}

impl<'m, T> Future for Lock<'m, T> {
    type Output = MutexGuard<'m, T>;

    fn poll(mut self: Pin<&mut Self>, ctx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let mutex = self.mutex;
        let mut state = mutex.state();
        let first_in_line = match self.id {
            Some(id) => state.waiters.front().is_some_and(|(i, _)| *i == id),
            None => state.waiters.is_empty(),
        };
        if !state.locked && first_in_line {
            state.locked = true;
            if let Some(id) = self.id.take() {
                state.waiters.retain(|(i, _)| *i != id);
            }
            return Poll::Ready(MutexGuard { mutex });
        }

        match self.id {
            Some(id) => {
                if let Some((_, waker)) = state.waiters.iter_mut().find(|(i, _)| *i == id) {
                    waker.clone_from(ctx.waker());
                }
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.waiters.push_back((id, ctx.waker().clone()));
                drop(state);
                self.id = Some(id);
            }
        }
        Poll::Pending
    }
}

impl<'m, T> Drop for Lock<'m, T> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            let waker = {
                let mut state = self.mutex.state();
                let was_first = state.waiters.front().is_some_and(|(i, _)| *i == id);
                state.waiters.retain(|(i, _)| *i != id);
                // Pass on the wake up we might have gotten.
                if was_first && !state.locked {
                    state.waiters.front().map(|(_, waker)| waker.clone())
                } else {
                    None
                }
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

/// Guard returned by [`Mutex::lock`], unlocks the mutex when dropped.
#[must_use = "the mutex is unlocked immediately if the guard is not held"]
pub(crate) struct MutexGuard<'m, T> {
    mutex: &'m Mutex<T>,
}

// SAFETY: only gives out references to `T`.
unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
