//! Owner-tracking blocking mutex, normal or recursive (§4.7).
//!
//! Grounded on `riot-rs-threads::sync::lock::Lock` for the
//! owner/acquire/release shape, but the blocking strategy is different: the
//! teacher suspends the calling thread onto an intrusive [`ThreadList`] and
//! relies on the scheduler to wake it; this spec has no targeted-wakeup
//! primitive, so acquire is a bounded yield-poll loop instead (§4.7, §5
//! "Suspension points"). The teacher also has no recursive variant — that
//! is new here, modeled as a `lock_count` the owner alone may decrement
//! (§3 Mutex invariants).
//!
//! [`ThreadList`]: crate::threadlist::ThreadList

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::atomic::{AtomicSignedWord, AtomicWord, Ordering};
use crate::config;
use crate::core_state;
use crate::error::{self, ErrorCode};
use crate::handle::{Handle, Stamped};
use crate::thread::{self, ThreadHandle};
use crate::time::{self, Duration};

use super::edit_lock::EditLock;

fn edit_lock_timeout() -> Duration {
    Duration::from_ticks(config::THREAD_TIMEOUT)
}

/// Whether a mutex allows its owner to re-acquire without blocking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MutexKind {
    Normal,
    Recursive,
}

struct MutexState {
    owner: Option<ThreadHandle>,
}

/// Backing storage for a handle-wrapped mutex.
pub struct MutexInner {
    edit_lock: EditLock,
    kind: MutexKind,
    state: UnsafeCell<MutexState>,
    /// Mirrors `state.owner`'s lock count; kept as a plain atomic so
    /// lock-free diagnostic queries ([`is_mutex_locked`],
    /// [`mutex_lock_count`]) don't need the edit-lock. Every compound
    /// check-then-act transition is still serialized by `edit_lock`.
    lock_count: AtomicWord,
    id: AtomicSignedWord,
}

// SAFETY: `state` is only ever touched while `edit_lock` is held.
unsafe impl Sync for MutexInner {}

impl Stamped for MutexInner {
    fn stamped_id(&self) -> i32 {
        self.id.load(Ordering::Acquire)
    }
}

/// Handle to a mutex (§4.7).
pub type Mutex = Handle<MutexInner>;

/// Initializes `mem` as a fresh, unlocked mutex of the given kind and
/// returns a handle to it.
pub fn create_mutex(mem: &'static mut MutexInner, kind: MutexKind) -> Mutex {
    let id = crate::handle::next_id();
    *mem = MutexInner {
        edit_lock: EditLock::new(),
        kind,
        state: UnsafeCell::new(MutexState { owner: None }),
        lock_count: AtomicWord::new(0),
        id: AtomicSignedWord::new(id),
    };
    // SAFETY: `mem` was just stamped with `id` above.
    unsafe { Handle::new(id, NonNull::from(mem)) }
}

/// Acquires `mutex`, blocking (yield-poll, bounded by `timeout`) until it
/// is free or, for a recursive mutex already owned by the caller,
/// returning immediately with the lock count incremented (§4.7).
pub fn acquire_mutex(mutex: Mutex, timeout: Duration, out: &mut ErrorCode) -> bool {
    if core_state::in_interrupt() {
        return error::fail(out, ErrorCode::InvalidOp, false);
    }
    let Some(inner) = mutex.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    let current = thread::current_thread();

    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    let state = unsafe { &mut *inner.state.get() };
    let self_owned = state
        .owner
        .is_some_and(|owner| owner.raw_id() == current.raw_id());
    if self_owned {
        let result = match inner.kind {
            MutexKind::Recursive => {
                inner.lock_count.fetch_add(1, Ordering::AcqRel);
                true
            }
            MutexKind::Normal => false,
        };
        inner
            .edit_lock
            .release()
            .expect("mutex edit-lock released by its own holder");
        return if result {
            error::ok(out, true)
        } else {
            error::fail(out, ErrorCode::InvalidState, false)
        };
    }
    inner
        .edit_lock
        .release()
        .expect("mutex edit-lock released by its own holder");

    let start = time::now();
    let acquired = time::poll_until(
        start,
        timeout,
        || {
            if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
                return None;
            }
            let state = unsafe { &mut *inner.state.get() };
            let won = inner.lock_count.load(Ordering::Acquire) == 0;
            if won {
                state.owner = Some(current);
                inner.lock_count.store(1, Ordering::Release);
            }
            inner
                .edit_lock
                .release()
                .expect("mutex edit-lock released by its own holder");
            won.then_some(())
        },
        thread::yield_now,
    );

    match acquired {
        Some(()) => error::ok(out, true),
        None => error::fail(out, ErrorCode::Timeout, false),
    }
}

/// Releases `mutex`. Must be called by the current owner; otherwise fails
/// with [`ErrorCode::InvalidState`] leaving the lock count unchanged
/// (§8 property 6). Non-blocking (§9 open question: the header's release
/// timeout parameter is unused in the source this was distilled from).
pub fn release_mutex(mutex: Mutex, out: &mut ErrorCode) -> bool {
    let Some(inner) = mutex.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    let state = unsafe { &mut *inner.state.get() };
    let current = thread::current_thread();
    let is_owner = state
        .owner
        .is_some_and(|owner| owner.raw_id() == current.raw_id())
        && inner.lock_count.load(Ordering::Acquire) > 0;

    if !is_owner {
        inner
            .edit_lock
            .release()
            .expect("mutex edit-lock released by its own holder");
        return error::fail(out, ErrorCode::InvalidState, false);
    }

    match inner.kind {
        MutexKind::Recursive => {
            let remaining = inner.lock_count.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining == 0 {
                state.owner = None;
            }
        }
        MutexKind::Normal => {
            state.owner = None;
            inner.lock_count.store(0, Ordering::Release);
        }
    }
    inner
        .edit_lock
        .release()
        .expect("mutex edit-lock released by its own holder");
    error::ok(out, true)
}

/// Destroys `mutex`. Fails with [`ErrorCode::InvalidState`] while locked.
pub fn destroy_mutex(mutex: Mutex, out: &mut ErrorCode) -> bool {
    let Some(inner) = mutex.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    if inner.lock_count.load(Ordering::Acquire) > 0 {
        inner
            .edit_lock
            .release()
            .expect("mutex edit-lock released by its own holder");
        return error::fail(out, ErrorCode::InvalidState, false);
    }
    inner.id.store(-1, Ordering::Release);
    inner
        .edit_lock
        .release()
        .expect("mutex edit-lock released by its own holder");
    error::ok(out, true)
}

/// `true` iff `mutex` currently has an owner.
pub fn is_mutex_locked(mutex: Mutex, out: &mut ErrorCode) -> bool {
    match mutex.validate() {
        Some(inner) => error::ok(out, inner.lock_count.load(Ordering::Acquire) > 0),
        None => error::fail(out, ErrorCode::InvalidArg, false),
    }
}

/// The current recursion depth (always `0` or `1` for a normal mutex).
pub fn mutex_lock_count(mutex: Mutex, out: &mut ErrorCode) -> u32 {
    match mutex.validate() {
        Some(inner) => error::ok(out, inner.lock_count.load(Ordering::Acquire)),
        None => error::fail(out, ErrorCode::InvalidArg, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(kind: MutexKind) -> Mutex {
        let mem: &'static mut MutexInner = Box::leak(Box::new(MutexInner {
            edit_lock: EditLock::new(),
            kind: MutexKind::Normal,
            state: UnsafeCell::new(MutexState { owner: None }),
            lock_count: AtomicWord::new(0),
            id: AtomicSignedWord::new(0),
        }));
        create_mutex(mem, kind)
    }

    #[test]
    fn normal_mutex_rejects_self_reacquire() {
        let m = fresh(MutexKind::Normal);
        let mut err = ErrorCode::None;
        assert!(acquire_mutex(m, Duration::ZERO, &mut err));
        assert!(!acquire_mutex(m, Duration::ZERO, &mut err));
        assert_eq!(err, ErrorCode::InvalidState);
        assert_eq!(mutex_lock_count(m, &mut err), 1);
    }

    #[test]
    fn recursive_mutex_counts_and_unwinds() {
        let m = fresh(MutexKind::Recursive);
        let mut err = ErrorCode::None;
        assert!(acquire_mutex(m, Duration::ZERO, &mut err));
        assert!(acquire_mutex(m, Duration::ZERO, &mut err));
        assert!(acquire_mutex(m, Duration::ZERO, &mut err));
        assert_eq!(mutex_lock_count(m, &mut err), 3);
        assert!(is_mutex_locked(m, &mut err));

        assert!(release_mutex(m, &mut err));
        assert!(release_mutex(m, &mut err));
        assert!(is_mutex_locked(m, &mut err));
        assert!(release_mutex(m, &mut err));
        assert!(!is_mutex_locked(m, &mut err));

        assert!(!release_mutex(m, &mut err));
        assert_eq!(err, ErrorCode::InvalidState);
    }

    #[test]
    fn release_of_unlocked_mutex_is_invalid_state_and_preserves_count() {
        let m = fresh(MutexKind::Normal);
        let mut err = ErrorCode::None;
        assert!(acquire_mutex(m, Duration::ZERO, &mut err));
        assert!(release_mutex(m, &mut err));
        assert!(!release_mutex(m, &mut err));
        assert_eq!(err, ErrorCode::InvalidState);
        assert_eq!(mutex_lock_count(m, &mut err), 0);
    }

    #[test]
    fn destroy_forbidden_while_locked() {
        let m = fresh(MutexKind::Normal);
        let mut err = ErrorCode::None;
        acquire_mutex(m, Duration::ZERO, &mut err);
        assert!(!destroy_mutex(m, &mut err));
        release_mutex(m, &mut err);
        assert!(destroy_mutex(m, &mut err));
        assert!(!m.is_valid());
    }
}
