//! Counting semaphore (§4.8).
//!
//! Grounded on `riot-rs-threads::sync::semaphore::Semaphore`, but (like
//! [`crate::sync::mutex`]) acquire is a bounded yield-poll loop rather than
//! a suspend onto an intrusive wait list, since this spec's blocking
//! primitives have no targeted-wakeup operation to drive a wait list with.

use core::ptr::NonNull;

use crate::atomic::{AtomicSignedWord, AtomicWord, Ordering};
use crate::config;
use crate::error::{self, ErrorCode};
use crate::handle::{Handle, Stamped};
use crate::thread;
use crate::time::{self, Duration};

use super::edit_lock::EditLock;

fn edit_lock_timeout() -> Duration {
    Duration::from_ticks(config::THREAD_TIMEOUT)
}

/// Backing storage for a handle-wrapped semaphore.
pub struct SemaphoreInner {
    edit_lock: EditLock,
    capacity: u32,
    count: AtomicWord,
    id: AtomicSignedWord,
}

// SAFETY: `count` is only ever mutated while `edit_lock` is held; it is
// plain atomic so unlocked reads of `semaphore_count` stay memory-safe.
unsafe impl Sync for SemaphoreInner {}

impl Stamped for SemaphoreInner {
    fn stamped_id(&self) -> i32 {
        self.id.load(Ordering::Acquire)
    }
}

/// Handle to a semaphore (§4.8).
pub type Semaphore = Handle<SemaphoreInner>;

/// Initializes `mem` as a fresh semaphore with the given capacity, full at
/// creation (`count == capacity`), and returns a handle to it.
pub fn create_semaphore(mem: &'static mut SemaphoreInner, capacity: u32) -> Semaphore {
    let id = crate::handle::next_id();
    *mem = SemaphoreInner {
        edit_lock: EditLock::new(),
        capacity,
        count: AtomicWord::new(capacity),
        id: AtomicSignedWord::new(id),
    };
    // SAFETY: `mem` was just stamped with `id` above.
    unsafe { Handle::new(id, NonNull::from(mem)) }
}

/// Acquires one permit, blocking (yield-poll, bounded by `timeout`) while
/// the count is zero.
pub fn acquire_semaphore(sem: Semaphore, timeout: Duration, out: &mut ErrorCode) -> bool {
    let Some(inner) = sem.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };

    let start = time::now();
    let acquired = time::poll_until(
        start,
        timeout,
        || {
            if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
                return None;
            }
            let mut count = inner.count.load(Ordering::Acquire);
            let won = loop {
                if count == 0 {
                    break false;
                }
                if inner
                    .count
                    .compare_exchange(&mut count, count - 1, Ordering::AcqRel, Ordering::Relaxed)
                {
                    break true;
                }
            };
            inner
                .edit_lock
                .release()
                .expect("semaphore edit-lock released by its own holder");
            won.then_some(())
        },
        thread::yield_now,
    );

    match acquired {
        Some(()) => error::ok(out, true),
        None => error::fail(out, ErrorCode::Timeout, false),
    }
}

/// Releases one permit. Fails with [`ErrorCode::InvalidState`] if the
/// semaphore is already at capacity.
pub fn release_semaphore(sem: Semaphore, out: &mut ErrorCode) -> bool {
    let Some(inner) = sem.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    let mut count = inner.count.load(Ordering::Acquire);
    let result = loop {
        if count >= inner.capacity {
            break Err(ErrorCode::InvalidState);
        }
        if inner
            .count
            .compare_exchange(&mut count, count + 1, Ordering::AcqRel, Ordering::Relaxed)
        {
            break Ok(());
        }
    };
    inner
        .edit_lock
        .release()
        .expect("semaphore edit-lock released by its own holder");
    match result {
        Ok(()) => error::ok(out, true),
        Err(code) => error::fail(out, code, false),
    }
}

/// Destroys `sem`, invalidating its handle. Unlike a mutex, a semaphore
/// carries no "currently held" state that would forbid destruction.
pub fn destroy_semaphore(sem: Semaphore, out: &mut ErrorCode) -> bool {
    let Some(inner) = sem.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    inner.id.store(-1, Ordering::Release);
    inner
        .edit_lock
        .release()
        .expect("semaphore edit-lock released by its own holder");
    error::ok(out, true)
}

/// The current permit count.
pub fn semaphore_count(sem: Semaphore, out: &mut ErrorCode) -> u32 {
    match sem.validate() {
        Some(inner) => error::ok(out, inner.count.load(Ordering::Acquire)),
        None => error::fail(out, ErrorCode::InvalidArg, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(capacity: u32) -> Semaphore {
        let mem: &'static mut SemaphoreInner = Box::leak(Box::new(SemaphoreInner {
            edit_lock: EditLock::new(),
            capacity,
            count: AtomicWord::new(0),
            id: AtomicSignedWord::new(0),
        }));
        create_semaphore(mem, capacity)
    }

    #[test]
    fn acquire_decrements_release_increments() {
        let s = fresh(2);
        let mut err = ErrorCode::None;
        assert!(acquire_semaphore(s, Duration::ZERO, &mut err));
        assert_eq!(semaphore_count(s, &mut err), 1);
        assert!(release_semaphore(s, &mut err));
        assert_eq!(semaphore_count(s, &mut err), 2);
    }

    #[test]
    fn acquire_on_empty_semaphore_times_out() {
        let s = fresh(1);
        let mut err = ErrorCode::None;
        assert!(acquire_semaphore(s, Duration::ZERO, &mut err));
        assert!(!acquire_semaphore(s, Duration::ZERO, &mut err));
        assert_eq!(err, ErrorCode::Timeout);
    }

    #[test]
    fn release_past_capacity_is_invalid_state() {
        let s = fresh(1);
        let mut err = ErrorCode::None;
        assert!(!release_semaphore(s, &mut err));
        assert_eq!(err, ErrorCode::InvalidState);
        assert_eq!(semaphore_count(s, &mut err), 1);
    }

    #[test]
    fn destroy_invalidates_regardless_of_count() {
        let s = fresh(1);
        let mut err = ErrorCode::None;
        acquire_semaphore(s, Duration::ZERO, &mut err);
        assert!(destroy_semaphore(s, &mut err));
        assert!(!s.is_valid());
    }
}
