//! The generic per-primitive edit-lock (§3, §4.7): a bare CAS-spin field
//! with no identity and no critical-section entry of its own.
//!
//! This is [`crate::sync::critlock::RawCritlock`] with the
//! `enter_critical`/`exit_critical` calls removed — mutex/semaphore/queue/
//! future operations must not disable interrupts on the holder (§4.7: "not
//! a critlock"), only the public [`crate::sync::critlock::Critlock`]
//! primitive and the scheduler's own registry lock do that.

use crate::atomic::{AtomicWord, Ordering};
use crate::error::ErrorCode;
use crate::time::{self, Duration};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

pub(crate) struct EditLock {
    word: AtomicWord,
}

impl EditLock {
    pub(crate) const fn new() -> Self {
        EditLock {
            word: AtomicWord::new(UNLOCKED),
        }
    }

    /// Attempts to acquire, retrying until `timeout` ticks have elapsed,
    /// calling `backoff` between attempts. Timeout `0` still attempts once.
    pub(crate) fn acquire(&self, timeout: Duration, mut backoff: impl FnMut()) -> Result<(), ErrorCode> {
        let start = time::now();
        loop {
            let mut expected = UNLOCKED;
            if self
                .word
                .compare_exchange(&mut expected, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            {
                return Ok(());
            }
            if expected != UNLOCKED && expected != LOCKED {
                return Err(ErrorCode::Internal);
            }
            if start.has_elapsed(timeout) {
                return Err(ErrorCode::Timeout);
            }
            backoff();
        }
    }

    pub(crate) fn release(&self) -> Result<(), ErrorCode> {
        let mut expected = LOCKED;
        if self
            .word
            .compare_exchange(&mut expected, UNLOCKED, Ordering::Release, Ordering::Relaxed)
        {
            Ok(())
        } else {
            Err(ErrorCode::InvalidState)
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) == LOCKED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_is_identity() {
        let lock = EditLock::new();
        assert!(lock.acquire(Duration::ZERO, || {}).is_ok());
        assert!(lock.is_locked());
        assert!(lock.release().is_ok());
        assert!(!lock.is_locked());
    }

    #[test]
    fn release_without_acquire_is_invalid_state() {
        let lock = EditLock::new();
        assert_eq!(lock.release(), Err(ErrorCode::InvalidState));
    }

    #[test]
    fn acquire_on_held_lock_times_out() {
        let lock = EditLock::new();
        lock.acquire(Duration::ZERO, || {}).unwrap();
        let mut attempts = 0;
        // `backoff` drives the tick counter forward so the bounded retry
        // loop has something to time out against.
        let result = lock.acquire(Duration::from_ticks(3), || {
            attempts += 1;
            time::tick();
        });
        assert_eq!(result, Err(ErrorCode::Timeout));
        assert!(attempts > 0);
    }
}
