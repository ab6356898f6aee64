//! Single-shot value with multi-reader await (§4.8).
//!
//! No teacher module covers this shape directly; grounded on the same
//! edit-lock-serialized caller-storage pattern as
//! [`crate::sync::mutex`]/[`crate::sync::semaphore`], with the readiness
//! flag split out as a lock-free atomic the way [`crate::sync::mutex`]
//! keeps its lock count lock-free, so [`is_future_ready`] needs no edit-lock
//! round trip.

use core::ptr::{self, NonNull};

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

const NOT_READY: u32 = 0;
const READY: u32 = 1;

/// Backing storage for a handle-wrapped future. `storage` must point at
/// `value_size` caller-owned bytes, valid for as long as any handle to
/// this future is used.
pub struct FutureInner {
    edit_lock: EditLock,
    value_size: usize,
    storage: NonNull<u8>,
    ready: AtomicWord,
    id: AtomicSignedWord,
}

// SAFETY: the bytes behind `storage` are only written while `edit_lock` is
// held, and only read by `await_future` after observing `ready`.
unsafe impl Sync for FutureInner {}

impl Stamped for FutureInner {
    fn stamped_id(&self) -> i32 {
        self.id.load(Ordering::Acquire)
    }
}

/// Handle to a future (§4.8).
pub type Future = Handle<FutureInner>;

/// Initializes `mem` as a fresh, unset future over `storage`
/// (`value_size` bytes) and returns a handle to it.
pub fn create_future(
    mem: &'static mut FutureInner,
    storage: &'static mut [u8],
    value_size: usize,
    out: &mut ErrorCode,
) -> Future {
    if value_size == 0 || storage.len() < value_size {
        return error::fail(out, ErrorCode::InvalidArg, Future::invalid());
    }
    let id = crate::handle::next_id();
    let storage_ptr = NonNull::new(storage.as_mut_ptr()).expect("caller-supplied storage is never null");
    *mem = FutureInner {
        edit_lock: EditLock::new(),
        value_size,
        storage: storage_ptr,
        ready: AtomicWord::new(NOT_READY),
        id: AtomicSignedWord::new(id),
    };
    // SAFETY: `mem` was just stamped with `id` above.
    error::ok(out, unsafe { Handle::new(id, NonNull::from(mem)) })
}

/// Writes `value` (must be exactly `value_size` bytes) and marks the
/// future ready. A second call after the first is undefined upstream
/// (§9); this implementation simply overwrites the value and leaves
/// `ready` set.
pub fn set_future(future: Future, value: &[u8], out: &mut ErrorCode) -> bool {
    let Some(inner) = future.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if value.len() != inner.value_size {
        return error::fail(out, ErrorCode::InvalidArg, false);
    }
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    // SAFETY: `storage` holds `value_size` bytes; `value.len()` checked
    // above.
    unsafe {
        ptr::copy_nonoverlapping(value.as_ptr(), inner.storage.as_ptr(), inner.value_size);
    }
    inner.ready.store(READY, Ordering::Release);
    inner
        .edit_lock
        .release()
        .expect("future edit-lock released by its own holder");
    error::ok(out, true)
}

/// Polls readiness (bounded by `timeout`) and copies the value into `dst`
/// (must be exactly `value_size` bytes) once set.
pub fn await_future(future: Future, dst: &mut [u8], timeout: Duration, out: &mut ErrorCode) -> bool {
    let Some(inner) = future.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if dst.len() != inner.value_size {
        return error::fail(out, ErrorCode::InvalidArg, false);
    }

    let start = time::now();
    let got = time::poll_until(
        start,
        timeout,
        || {
            if inner.ready.load(Ordering::Acquire) != READY {
                return None;
            }
            if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
                return None;
            }
            // SAFETY: `storage` holds `value_size` bytes; `dst.len()`
            // checked above; `ready == READY` observed above, under the
            // edit-lock that `set_future` also holds while writing.
            unsafe {
                ptr::copy_nonoverlapping(inner.storage.as_ptr(), dst.as_mut_ptr(), inner.value_size);
            }
            inner
                .edit_lock
                .release()
                .expect("future edit-lock released by its own holder");
            Some(())
        },
        thread::yield_now,
    );

    match got {
        Some(()) => error::ok(out, true),
        None => error::fail(out, ErrorCode::Timeout, false),
    }
}

/// `true` iff [`set_future`] has been called at least once.
pub fn is_future_ready(future: Future, out: &mut ErrorCode) -> bool {
    match future.validate() {
        Some(inner) => error::ok(out, inner.ready.load(Ordering::Acquire) == READY),
        None => error::fail(out, ErrorCode::InvalidArg, false),
    }
}

/// Destroys `future`, invalidating its handle.
pub fn destroy_future(future: Future, out: &mut ErrorCode) -> bool {
    let Some(inner) = future.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    inner.id.store(-1, Ordering::Release);
    inner
        .edit_lock
        .release()
        .expect("future edit-lock released by its own holder");
    error::ok(out, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(value_size: usize) -> Future {
        let storage: &'static mut [u8] = Box::leak(vec![0u8; value_size].into_boxed_slice());
        let mem: &'static mut FutureInner = Box::leak(Box::new(FutureInner {
            edit_lock: EditLock::new(),
            value_size,
            storage: NonNull::dangling(),
            ready: AtomicWord::new(NOT_READY),
            id: AtomicSignedWord::new(0),
        }));
        let mut err = ErrorCode::None;
        create_future(mem, storage, value_size, &mut err)
    }

    #[test]
    fn set_then_await_returns_the_set_value() {
        let f = fresh(4);
        let mut err = ErrorCode::None;
        assert!(set_future(f, &[1, 2, 3, 4], &mut err));
        let mut dst = [0u8; 4];
        assert!(await_future(f, &mut dst, Duration::ZERO, &mut err));
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn await_before_set_times_out() {
        let f = fresh(1);
        let mut err = ErrorCode::None;
        let mut dst = [0u8; 1];
        assert!(!await_future(f, &mut dst, Duration::ZERO, &mut err));
        assert_eq!(err, ErrorCode::Timeout);
    }

    #[test]
    fn is_ready_reflects_set_state() {
        let f = fresh(1);
        let mut err = ErrorCode::None;
        assert!(!is_future_ready(f, &mut err));
        set_future(f, &[7], &mut err);
        assert!(is_future_ready(f, &mut err));
    }
}
