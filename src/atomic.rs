//! 32-bit atomic primitives (§4.1).
//!
//! Thin wrapper over `portable_atomic::AtomicU32`/`AtomicI32`: load, store,
//! exchange, compare-and-exchange (strong), fetch-add, fetch-sub. These are
//! the only means by which shared state is mutated while holding no lock —
//! every edit-lock and the exclusive-section counters are built on top of
//! this module rather than on `core::sync::atomic` directly, so that the
//! `require-cas` fallback (for cores without native 32-bit CAS) stays
//! confined to one place, mirroring how `riot-rs-threads` centralizes its
//! atomic usage behind `portable-atomic` rather than reaching for
//! `core::sync::atomic` ad hoc.

pub use portable_atomic::Ordering;
use portable_atomic::{AtomicI32, AtomicU32};

/// An atomic 32-bit unsigned word.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicWord(AtomicU32);

impl AtomicWord {
    #[must_use]
    pub const fn new(v: u32) -> Self {
        AtomicWord(AtomicU32::new(v))
    }

    #[must_use]
    pub fn load(&self, order: Ordering) -> u32 {
        self.0.load(order)
    }

    pub fn store(&self, v: u32, order: Ordering) {
        self.0.store(v, order);
    }

    #[must_use]
    pub fn exchange(&self, v: u32, order: Ordering) -> u32 {
        self.0.swap(v, order)
    }

    /// Strong compare-and-exchange. On failure, `*expected` is updated to
    /// the value actually observed, matching the spec's "in/out expected
    /// slot" CAS shape.
    pub fn compare_exchange(
        &self,
        expected: &mut u32,
        new: u32,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        match self.0.compare_exchange(*expected, new, success, failure) {
            Ok(_) => true,
            Err(observed) => {
                *expected = observed;
                false
            }
        }
    }

    #[must_use]
    pub fn fetch_add(&self, v: u32, order: Ordering) -> u32 {
        self.0.fetch_add(v, order)
    }

    #[must_use]
    pub fn fetch_sub(&self, v: u32, order: Ordering) -> u32 {
        self.0.fetch_sub(v, order)
    }
}

/// An atomic 32-bit signed word, used for fields such as the exclusive-
/// section counters that carry the `-1` sentinel (§4.4).
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicSignedWord(AtomicI32);

impl AtomicSignedWord {
    #[must_use]
    pub const fn new(v: i32) -> Self {
        AtomicSignedWord(AtomicI32::new(v))
    }

    #[must_use]
    pub fn load(&self, order: Ordering) -> i32 {
        self.0.load(order)
    }

    pub fn store(&self, v: i32, order: Ordering) {
        self.0.store(v, order);
    }

    #[must_use]
    pub fn exchange(&self, v: i32, order: Ordering) -> i32 {
        self.0.swap(v, order)
    }

    pub fn compare_exchange(
        &self,
        expected: &mut i32,
        new: i32,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        match self.0.compare_exchange(*expected, new, success, failure) {
            Ok(_) => true,
            Err(observed) => {
                *expected = observed;
                false
            }
        }
    }

    #[must_use]
    pub fn fetch_add(&self, v: i32, order: Ordering) -> i32 {
        self.0.fetch_add(v, order)
    }

    #[must_use]
    pub fn fetch_sub(&self, v: i32, order: Ordering) -> i32 {
        self.0.fetch_sub(v, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_success_leaves_expected_untouched() {
        let w = AtomicWord::new(0);
        let mut expected = 0u32;
        assert!(w.compare_exchange(&mut expected, 1, Ordering::SeqCst, Ordering::SeqCst));
        assert_eq!(expected, 0);
        assert_eq!(w.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cas_failure_updates_expected_to_observed() {
        let w = AtomicWord::new(5);
        let mut expected = 0u32;
        assert!(!w.compare_exchange(&mut expected, 1, Ordering::SeqCst, Ordering::SeqCst));
        assert_eq!(expected, 5);
        assert_eq!(w.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn signed_word_carries_sentinel() {
        let w = AtomicSignedWord::new(0);
        w.store(-1, Ordering::SeqCst);
        assert_eq!(w.load(Ordering::SeqCst), -1);
    }

    #[test]
    fn fetch_add_and_sub_roundtrip() {
        let w = AtomicWord::new(10);
        assert_eq!(w.fetch_add(5, Ordering::SeqCst), 10);
        assert_eq!(w.fetch_sub(5, Ordering::SeqCst), 15);
        assert_eq!(w.load(Ordering::SeqCst), 10);
    }
}
