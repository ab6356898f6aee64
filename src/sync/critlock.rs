//! Critlock (§4.6): a combined interrupt-disabler and atomic spin lock.
//!
//! [`RawCritlock`] is the bare mechanism — enter critical, CAS the lock
//! word, retry bounded by a timeout — shared by the public, handle-wrapped
//! [`Critlock`] primitive *and* by the thread scheduler's own internal
//! registry lock (§4.5.2), since the scheduler's lock is architecturally
//! the same construct, just never exposed through a handle. The two differ
//! only in what they do between failed CAS attempts: the public primitive
//! yields to the scheduler, while the scheduler's own lock must not (it
//! would recurse into itself), so it just re-enters a fresh critical
//! section and spins.

use core::ptr::NonNull;

use crate::atomic::{AtomicWord, Ordering};
use crate::critical;
use crate::error::{self, ErrorCode};
use crate::handle::{Handle, Stamped};
use crate::time::{self, Duration};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// The bare interrupt-disable + CAS-spin mechanism, with no identity of its
/// own.
pub(crate) struct RawCritlock {
    word: AtomicWord,
}

impl RawCritlock {
    pub(crate) const fn new() -> Self {
        RawCritlock {
            word: AtomicWord::new(UNLOCKED),
        }
    }

    /// Attempts to acquire, retrying until `timeout` ticks have elapsed,
    /// calling `backoff` between attempts. Timeout `0` still attempts once.
    ///
    /// Returns [`ErrorCode::Internal`] if the lock word is observed holding
    /// a value other than `0`/`1` (lock-word corruption, §4.5.6).
    pub(crate) fn acquire(
        &self,
        timeout: Duration,
        mut backoff: impl FnMut(),
    ) -> Result<(), ErrorCode> {
        let start = time::now();
        loop {
            critical::enter_critical();
            let mut expected = UNLOCKED;
            if self
                .word
                .compare_exchange(&mut expected, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            {
                return Ok(());
            }
            critical::exit_critical();
            if expected != UNLOCKED && expected != LOCKED {
                return Err(ErrorCode::Internal);
            }
            if start.has_elapsed(timeout) {
                return Err(ErrorCode::Timeout);
            }
            backoff();
        }
    }

    /// Releases the lock. Requires the lock to currently be held; returns
    /// [`ErrorCode::InvalidState`] otherwise.
    pub(crate) fn release(&self) -> Result<(), ErrorCode> {
        let mut expected = LOCKED;
        if self
            .word
            .compare_exchange(&mut expected, UNLOCKED, Ordering::Release, Ordering::Relaxed)
        {
            critical::exit_critical();
            Ok(())
        } else {
            Err(ErrorCode::InvalidState)
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) == LOCKED
    }
}

/// Backing storage for a handle-wrapped critlock.
pub struct CritlockInner {
    raw: RawCritlock,
    id: i32,
}

impl Stamped for CritlockInner {
    fn stamped_id(&self) -> i32 {
        self.id
    }
}

/// Handle to a critlock (§4.6).
pub type Critlock = Handle<CritlockInner>;

/// Initializes `mem` as a fresh, unlocked critlock and returns a handle to
/// it.
pub fn create_critlock(mem: &'static mut CritlockInner) -> Critlock {
    let id = crate::handle::next_id();
    *mem = CritlockInner {
        raw: RawCritlock::new(),
        id,
    };
    // SAFETY: `mem` was just stamped with `id` above.
    unsafe { Handle::new(id, NonNull::from(mem)) }
}

/// Acquires `lock`, spinning (yielding to the scheduler between attempts)
/// until `timeout` ticks elapse.
pub fn acquire_critlock(lock: Critlock, timeout: Duration, out: &mut ErrorCode) -> bool {
    let Some(inner) = lock.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    match inner.raw.acquire(timeout, crate::thread::yield_now) {
        Ok(()) => error::ok(out, true),
        Err(code) => error::fail(out, code, false),
    }
}

/// Releases `lock`. Fails with [`ErrorCode::InvalidState`] if not held.
pub fn release_critlock(lock: Critlock, out: &mut ErrorCode) -> bool {
    let Some(inner) = lock.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    match inner.raw.release() {
        Ok(()) => error::ok(out, true),
        Err(code) => error::fail(out, code, false),
    }
}

/// Destroys `lock`. Fails with [`ErrorCode::InvalidState`] while locked.
pub fn destroy_critlock(lock: Critlock, out: &mut ErrorCode) -> bool {
    let Some(inner) = lock.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    if inner.raw.is_locked() {
        return error::fail(out, ErrorCode::InvalidState, false);
    }
    // SAFETY: the id field is never read concurrently without the
    // raw lock, which we've just confirmed is unlocked.
    unsafe {
        let ptr = NonNull::from(inner).as_ptr();
        (*ptr).id = -1;
    }
    error::ok(out, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_is_identity_on_lock_word() {
        static mut MEM: CritlockInner = CritlockInner {
            raw: RawCritlock::new(),
            id: -1,
        };
        let mem = unsafe { &mut *core::ptr::addr_of_mut!(MEM) };
        let h = create_critlock(mem);
        let mut err = ErrorCode::None;
        assert!(acquire_critlock(h, Duration::from_ticks(10), &mut err));
        assert_eq!(err, ErrorCode::None);
        assert!(h.validate().unwrap().raw.is_locked());
        assert!(release_critlock(h, &mut err));
        assert!(!h.validate().unwrap().raw.is_locked());
    }

    #[test]
    fn destroy_forbidden_while_locked() {
        static mut MEM: CritlockInner = CritlockInner {
            raw: RawCritlock::new(),
            id: -1,
        };
        let mem = unsafe { &mut *core::ptr::addr_of_mut!(MEM) };
        let h = create_critlock(mem);
        let mut err = ErrorCode::None;
        acquire_critlock(h, Duration::ZERO, &mut err);
        assert!(!destroy_critlock(h, &mut err));
        assert_eq!(err, ErrorCode::InvalidState);
        release_critlock(h, &mut err);
        assert!(destroy_critlock(h, &mut err));
        assert!(!h.is_valid());
    }
}
