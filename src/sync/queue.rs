//! Bounded FIFO queue of fixed-size elements in caller-supplied storage
//! (§4.8).
//!
//! No teacher module covers this shape directly (`riot-rs-threads` has no
//! queue primitive); grounded on the same edit-lock-serialized,
//! caller-storage pattern as [`crate::sync::mutex`]/[`crate::sync::semaphore`]
//! and on `other_examples/`'s ring-buffer idiom for the head/tail/count
//! bookkeeping.

use core::ptr::{self, NonNull};

use crate::atomic::{AtomicSignedWord, Ordering};
use crate::config;
use crate::error::{self, ErrorCode};
use crate::handle::{Handle, Stamped};
use crate::time::Duration;

use super::edit_lock::EditLock;

fn edit_lock_timeout() -> Duration {
    Duration::from_ticks(config::THREAD_TIMEOUT)
}

struct QueueState {
    head: usize,
    tail: usize,
    count: usize,
}

/// Backing storage for a handle-wrapped queue. `storage` must point at
/// `element_size * capacity` caller-owned bytes, valid for as long as any
/// handle to this queue is used.
pub struct QueueInner {
    edit_lock: EditLock,
    element_size: usize,
    capacity: usize,
    storage: NonNull<u8>,
    state: core::cell::UnsafeCell<QueueState>,
    id: AtomicSignedWord,
}

// SAFETY: `state` and the bytes behind `storage` are only ever touched
// while `edit_lock` is held.
unsafe impl Sync for QueueInner {}

impl Stamped for QueueInner {
    fn stamped_id(&self) -> i32 {
        self.id.load(Ordering::Acquire)
    }
}

/// Handle to a queue (§4.8).
pub type Queue = Handle<QueueInner>;

/// Initializes `mem` as a fresh, empty queue over `storage`
/// (`element_size * capacity` bytes) and returns a handle to it.
///
/// Fails with [`ErrorCode::InvalidArg`] if `storage` is shorter than
/// `element_size * capacity` or either size is zero.
pub fn create_queue(
    mem: &'static mut QueueInner,
    storage: &'static mut [u8],
    element_size: usize,
    capacity: usize,
    out: &mut ErrorCode,
) -> Queue {
    if element_size == 0 || capacity == 0 || storage.len() < element_size * capacity {
        return error::fail(out, ErrorCode::InvalidArg, Queue::invalid());
    }
    let id = crate::handle::next_id();
    let storage_ptr = NonNull::new(storage.as_mut_ptr()).expect("caller-supplied storage is never null");
    *mem = QueueInner {
        edit_lock: EditLock::new(),
        element_size,
        capacity,
        storage: storage_ptr,
        state: core::cell::UnsafeCell::new(QueueState {
            head: 0,
            tail: 0,
            count: 0,
        }),
        id: AtomicSignedWord::new(id),
    };
    // SAFETY: `mem` was just stamped with `id` above.
    error::ok(out, unsafe { Handle::new(id, NonNull::from(mem)) })
}

/// Copies `element` (must be exactly `element_size` bytes) to the tail and
/// advances it. Fails with [`ErrorCode::NoMem`] if the queue is full.
pub fn push_queue(queue: Queue, element: &[u8], out: &mut ErrorCode) -> bool {
    let Some(inner) = queue.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if element.len() != inner.element_size {
        return error::fail(out, ErrorCode::InvalidArg, false);
    }
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    let state = unsafe { &mut *inner.state.get() };
    if state.count == inner.capacity {
        inner
            .edit_lock
            .release()
            .expect("queue edit-lock released by its own holder");
        return error::fail(out, ErrorCode::NoMem, false);
    }
    // SAFETY: `tail < capacity` and `storage` holds `capacity` contiguous
    // `element_size`-byte slots; `element.len() == element_size` checked
    // above.
    unsafe {
        let dst = inner.storage.as_ptr().add(state.tail * inner.element_size);
        ptr::copy_nonoverlapping(element.as_ptr(), dst, inner.element_size);
    }
    state.tail = (state.tail + 1) % inner.capacity;
    state.count += 1;
    inner
        .edit_lock
        .release()
        .expect("queue edit-lock released by its own holder");
    error::ok(out, true)
}

/// Copies the head element into `out_element` (must be exactly
/// `element_size` bytes) and advances the head. Fails with
/// [`ErrorCode::InvalidState`] if the queue is empty.
pub fn pop_queue(queue: Queue, out_element: &mut [u8], out: &mut ErrorCode) -> bool {
    let Some(inner) = queue.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if out_element.len() != inner.element_size {
        return error::fail(out, ErrorCode::InvalidArg, false);
    }
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    let state = unsafe { &mut *inner.state.get() };
    if state.count == 0 {
        inner
            .edit_lock
            .release()
            .expect("queue edit-lock released by its own holder");
        return error::fail(out, ErrorCode::InvalidState, false);
    }
    // SAFETY: `head < capacity` and `storage` holds `capacity` contiguous
    // `element_size`-byte slots; `out_element.len() == element_size`
    // checked above.
    unsafe {
        let src = inner.storage.as_ptr().add(state.head * inner.element_size);
        ptr::copy_nonoverlapping(src, out_element.as_mut_ptr(), inner.element_size);
    }
    state.head = (state.head + 1) % inner.capacity;
    state.count -= 1;
    inner
        .edit_lock
        .release()
        .expect("queue edit-lock released by its own holder");
    error::ok(out, true)
}

/// Destroys `queue`, invalidating its handle.
pub fn destroy_queue(queue: Queue, out: &mut ErrorCode) -> bool {
    let Some(inner) = queue.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if inner.edit_lock.acquire(edit_lock_timeout(), || {}).is_err() {
        return error::fail(out, ErrorCode::Timeout, false);
    }
    inner.id.store(-1, Ordering::Release);
    inner
        .edit_lock
        .release()
        .expect("queue edit-lock released by its own holder");
    error::ok(out, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(capacity: usize, element_size: usize) -> Queue {
        let storage: &'static mut [u8] = Box::leak(vec![0u8; capacity * element_size].into_boxed_slice());
        let mem: &'static mut QueueInner = Box::leak(Box::new(QueueInner {
            edit_lock: EditLock::new(),
            element_size,
            capacity,
            storage: NonNull::dangling(),
            state: core::cell::UnsafeCell::new(QueueState {
                head: 0,
                tail: 0,
                count: 0,
            }),
            id: AtomicSignedWord::new(0),
        }));
        let mut err = ErrorCode::None;
        create_queue(mem, storage, element_size, capacity, &mut err)
    }

    #[test]
    fn push_then_pop_returns_exact_bytes() {
        let q = fresh(4, 2);
        let mut err = ErrorCode::None;
        assert!(push_queue(q, &[1, 2], &mut err));
        assert!(push_queue(q, &[3, 4], &mut err));
        let mut out = [0u8; 2];
        assert!(pop_queue(q, &mut out, &mut err));
        assert_eq!(out, [1, 2]);
        assert!(pop_queue(q, &mut out, &mut err));
        assert_eq!(out, [3, 4]);
    }

    #[test]
    fn pop_on_empty_queue_is_invalid_state() {
        let q = fresh(2, 1);
        let mut err = ErrorCode::None;
        let mut out = [0u8; 1];
        assert!(!pop_queue(q, &mut out, &mut err));
        assert_eq!(err, ErrorCode::InvalidState);
    }

    #[test]
    fn push_past_capacity_is_no_mem() {
        let q = fresh(1, 1);
        let mut err = ErrorCode::None;
        assert!(push_queue(q, &[9], &mut err));
        assert!(!push_queue(q, &[9], &mut err));
        assert_eq!(err, ErrorCode::NoMem);
    }

    #[test]
    fn wraps_around_ring_buffer() {
        let q = fresh(2, 1);
        let mut err = ErrorCode::None;
        let mut out = [0u8; 1];
        assert!(push_queue(q, &[1], &mut err));
        assert!(push_queue(q, &[2], &mut err));
        assert!(pop_queue(q, &mut out, &mut err));
        assert_eq!(out, [1]);
        assert!(push_queue(q, &[3], &mut err));
        assert!(pop_queue(q, &mut out, &mut err));
        assert_eq!(out, [2]);
        assert!(pop_queue(q, &mut out, &mut err));
        assert_eq!(out, [3]);
    }
}
