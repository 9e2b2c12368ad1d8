//! Reentrant lock that can be switched off for single-threaded hosting.
//!
//! With [`LockMode::Threaded`] the lock is a real inter-thread mutex that the
//! owning thread may re-enter; it is only released when the outermost guard
//! drops. With [`LockMode::Disabled`] acquisition always succeeds immediately,
//! which is only sound while every user runs on the thread that created the
//! lock. That precondition is checked on every acquisition.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Real mutual exclusion between threads.
    Threaded,
    /// No-op; all users share one thread.
    Disabled,
}

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: usize,
}

#[derive(Debug, Default)]
struct Gate {
    ownership: Mutex<Ownership>,
    released: Condvar,
}

impl Gate {
    fn ownership(&self) -> MutexGuard<'_, Ownership> {
        self.ownership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, me: ThreadId) {
        let mut ownership = self.ownership();
        if ownership.owner == Some(me) {
            ownership.depth += 1;
            return;
        }
        while ownership.owner.is_some() {
            ownership = self
                .released
                .wait(ownership)
                .unwrap_or_else(PoisonError::into_inner);
        }
        ownership.owner = Some(me);
        ownership.depth = 1;
    }

    fn release(&self) {
        let mut ownership = self.ownership();
        if ownership.depth > 1 {
            ownership.depth -= 1;
            return;
        }
        ownership.owner = None;
        ownership.depth = 0;
        drop(ownership);
        self.released.notify_one();
    }
}

pub struct ReentrantLock<T> {
    gate: Option<Gate>,
    home: ThreadId,
    data: T,
}

// Guards hand out `&T` to one thread at a time: the gate serialises threads
// in `Threaded` mode and `acquire` rejects foreign threads in `Disabled` mode.
unsafe impl<T: Send> Sync for ReentrantLock<T> {}

impl<T> ReentrantLock<T> {
    pub fn new(mode: LockMode, data: T) -> Self {
        Self {
            gate: match mode {
                LockMode::Threaded => Some(Gate::default()),
                LockMode::Disabled => None,
            },
            home: thread::current().id(),
            data,
        }
    }

    pub fn mode(&self) -> LockMode {
        if self.gate.is_some() {
            LockMode::Threaded
        } else {
            LockMode::Disabled
        }
    }

    /// Blocks until the calling thread owns the lock. Re-entry from the
    /// owning thread never blocks.
    ///
    /// # Panics
    ///
    /// In `Disabled` mode, panics when called from a thread other than the
    /// one that created the lock.
    pub fn acquire(&self) -> ReentrantLockGuard<'_, T> {
        let me = thread::current().id();
        match &self.gate {
            Some(gate) => gate.acquire(me),
            None => assert_eq!(
                me, self.home,
                "disabled ReentrantLock used from a foreign thread"
            ),
        }
        ReentrantLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// True if the calling thread currently holds the lock. Always true in
    /// `Disabled` mode on the home thread.
    pub fn held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        match &self.gate {
            Some(gate) => gate.ownership().owner == Some(me),
            None => me == self.home,
        }
    }

    /// Nesting depth of the current owner, 0 when free or disabled.
    pub fn depth(&self) -> usize {
        self.gate
            .as_ref()
            .map(|gate| gate.ownership().depth)
            .unwrap_or(0)
    }
}

impl<T: Default> Default for ReentrantLock<T> {
    fn default() -> Self {
        Self::new(LockMode::Threaded, T::default())
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantLockGuard<'a, T> {
    lock: &'a ReentrantLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for ReentrantLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.lock.data
    }
}

impl<T> Drop for ReentrantLockGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(gate) = &self.lock.gate {
            gate.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn nested_acquire_does_not_deadlock() {
        let lock = ReentrantLock::new(LockMode::Threaded, 5u32);
        let outer = lock.acquire();
        let inner = lock.acquire();
        assert_eq!(*inner, 5);
        assert_eq!(lock.depth(), 2);
        drop(inner);
        assert_eq!(lock.depth(), 1);
        assert!(lock.held_by_current_thread());
        drop(outer);
        assert_eq!(lock.depth(), 0);
        assert!(!lock.held_by_current_thread());
    }

    #[test]
    fn second_thread_waits_for_outermost_release() {
        let lock = Arc::new(ReentrantLock::new(LockMode::Threaded, ()));
        let acquired = Arc::new(AtomicBool::new(false));

        let outer = lock.acquire();
        let inner = lock.acquire();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let contender = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                ready_tx.send(()).unwrap();
                let _guard = lock.acquire();
                acquired.store(true, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            })
        };

        ready_rx.recv().unwrap();
        drop(inner);
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!acquired.load(Ordering::SeqCst));

        drop(outer);
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("contender should acquire after outer release");
        contender.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn disabled_lock_always_succeeds_on_home_thread() {
        let lock = ReentrantLock::new(LockMode::Disabled, 1u8);
        let a = lock.acquire();
        let b = lock.acquire();
        assert_eq!(*a + *b, 2);
        assert_eq!(lock.depth(), 0);
        assert_eq!(lock.mode(), LockMode::Disabled);
    }

    #[test]
    fn disabled_lock_rejects_foreign_thread() {
        let lock = Arc::new(ReentrantLock::new(LockMode::Disabled, ()));
        let remote = Arc::clone(&lock);
        let result = thread::spawn(move || {
            let _guard = remote.acquire();
        })
        .join();
        assert!(result.is_err());
    }
}
