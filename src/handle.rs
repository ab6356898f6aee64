//! The `{ id, handle }` shape shared by every primitive in this crate (§3).
//!
//! A handle is valid iff `id >= 0 && handle != null && *handle.id == handle.id`.
//! `Handle<T>` is the safe, typed wrapper around that pair; `Stamped` is the
//! trait every backing-memory struct (`Tcb`, `CritlockInner`, `MutexInner`, ...)
//! implements so [`Handle::validate`] can read the live `id` field back out of
//! the pointee without each primitive re-deriving the check by hand.

use core::ptr::NonNull;

use portable_atomic::{AtomicI32, Ordering};

/// Implemented by every primitive's backing-memory struct so that handle
/// validation can read its current `id` without the caller reaching into
/// primitive-specific fields.
pub trait Stamped {
    /// The `id` currently stamped into this instance. `-1` once destroyed.
    fn stamped_id(&self) -> i32;
}

/// A `{id, pointer}` pair identifying a live primitive instance.
///
/// `Handle` is `Copy`: callers pass it by value the way the spec's C-style
/// ABI passes a small struct by value. It carries no lifetime because the
/// backing memory is supplied by the caller and outlives the handle by
/// construction (§3 ownership model) — the crate does not enforce that at
/// the type level, matching the source's own unchecked-lifetime design.
pub struct Handle<T> {
    id: i32,
    ptr: Option<NonNull<T>>,
}

// Manual impls: `#[derive(Clone, Copy)]` would require `T: Clone`/`T: Copy`,
// but a handle is a reference-shaped value regardless of what it points to.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Handle<T> {}

impl<T> core::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("ptr", &self.ptr.map(NonNull::as_ptr))
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.ptr == other.ptr
    }
}
impl<T> Eq for Handle<T> {}

// SAFETY: a `Handle` is a plain `{id, pointer}` value, sent across cores
// exactly as the spec's C-ABI handle is: the pointee itself is what actually
// needs synchronized access, and every primitive serializes access to its
// pointee through its own edit-lock.
unsafe impl<T> Send for Handle<T> {}
unsafe impl<T> Sync for Handle<T> {}

impl<T: Stamped> Handle<T> {
    /// Constructs a handle from a freshly stamped pointee and its id.
    ///
    /// # Safety
    /// `ptr` must point at caller-owned memory, valid for at least as long
    /// as any handle derived from it is used, with `id` already written into
    /// it such that `stamped_id() == id`.
    pub(crate) unsafe fn new(id: i32, ptr: NonNull<T>) -> Self {
        Handle {
            id,
            ptr: Some(ptr),
        }
    }

    /// The distinguished invalid handle: `{ id: -1, handle: null }`.
    #[must_use]
    pub const fn invalid() -> Self {
        Handle { id: -1, ptr: None }
    }

    /// `true` iff `id >= 0`, the pointer is non-null, and the pointee's
    /// live id still matches `self.id`.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.validate().is_some()
    }

    /// Returns a reference to the pointee iff this handle is currently
    /// valid, re-checking the live stamped id on every call (a destroyed
    /// primitive's id becomes `-1` and this then returns `None`).
    #[must_use]
    pub fn validate(self) -> Option<&'static T> {
        if self.id < 0 {
            return None;
        }
        let ptr = self.ptr?;
        // SAFETY: the pointee is caller-owned storage that outlives every
        // handle derived from it (construction contract of `new`).
        let inner = unsafe { ptr.as_ref() };
        (inner.stamped_id() == self.id).then_some(inner)
    }

    pub(crate) fn raw_id(self) -> i32 {
        self.id
    }
}

/// Process-wide monotonic id allocator shared by every primitive type.
///
/// A single counter (rather than one per primitive type) matches the
/// source's "monotonically allocated positive integer" wording in §3: ids
/// are unique across the whole kernel, not just within one primitive kind.
static NEXT_ID: AtomicI32 = AtomicI32::new(0);

/// Allocates the next id, wrapping past `i32::MAX` back to `0` rather than
/// going negative (negative ids are reserved for the invalidated/INVALID
/// sentinel).
pub(crate) fn next_id() -> i32 {
    loop {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        if id >= 0 {
            return id;
        }
        // Observed a negative value from wraparound; reset and retry. Racy
        // under concurrent wraparound, but wraparound after 2^31 ids is not
        // a case this kernel is expected to survive gracefully anyway.
        NEXT_ID.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy {
        id: AtomicI32,
    }

    impl Stamped for Dummy {
        fn stamped_id(&self) -> i32 {
            self.id.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn invalid_handle_never_validates() {
        let h: Handle<Dummy> = Handle::invalid();
        assert!(!h.is_valid());
        assert!(h.validate().is_none());
    }

    #[test]
    fn fresh_handle_validates_until_destroyed() {
        let dummy = Dummy {
            id: AtomicI32::new(7),
        };
        let ptr = NonNull::from(&dummy);
        let h = unsafe { Handle::new(7, ptr) };
        assert!(h.is_valid());
        assert_eq!(h.validate().map(|d| d.stamped_id()), Some(7));

        dummy.id.store(-1, Ordering::Relaxed);
        assert!(!h.is_valid());
        assert!(h.validate().is_none());
    }

    #[test]
    fn next_id_is_monotonic_and_nonnegative() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
        assert!(a >= 0 && b >= 0);
    }
}
