//! Cross-core exclusive-section rendezvous (§4.4).
//!
//! Grounded on `riot-rs-threads::smp::rp2040`'s inter-core FIFO handshake
//! (`schedule_other_core`/`handle_fifo_token`) for the "signal the other
//! core, have it run a handler on receipt" shape, adapted from "wake the
//! other core's scheduler" to "rendezvous so only one core is inside at a
//! time". State is carried in [`crate::critical`]'s style (per-core atomic
//! counters, no allocation) and mutations are serialized by the same
//! [`crate::sync::edit_lock::EditLock`] the handle-validated primitives use,
//! per §4.4's "one shared edit-lock word".

use crate::atomic::{AtomicSignedWord, Ordering};
use crate::config;
use crate::core_state::current_core;
use crate::critical;
use crate::error::ErrorCode;
use crate::smp;
use crate::sync::edit_lock::EditLock;
use crate::time::{self, Duration};

const CORES: usize = 2;

/// Sentinel written to `this_x` while waiting on the other side (§4.4
/// steps 2-3): "I yield to you" on the entering side, "I acknowledge your
/// entry" on the receiving side.
const YIELDING: i32 = -1;

/// Per-core entry counters. Index 0 is this crate's [`crate::core_state::Core::Primary`],
/// index 1 [`crate::core_state::Core::Secondary`]; the "other" index is
/// always `1 - my index` since there are exactly two cores (§2).
static X_COUNT: [AtomicSignedWord; CORES] = [AtomicSignedWord::new(0), AtomicSignedWord::new(0)];

/// The single shared edit-lock word guarding reads/writes of [`X_COUNT`].
static LOCK: EditLock = EditLock::new();

fn lock_timeout() -> Duration {
    Duration::from_ticks(config::EXCL_SECTION_LOCK_TIMEOUT)
}

fn section_timeout() -> Duration {
    Duration::from_ticks(config::EXCL_SECTION_TIMEOUT)
}

fn ack_timeout() -> Duration {
    Duration::from_ticks(config::EXCL_SECTION_ACK_TIMEOUT)
}

fn other(core_idx: usize) -> usize {
    1 - core_idx
}

/// Hard-resets both counters to 0 (§4.4 "cancellation/recovery"): the
/// deliberate liveness-over-strict-exclusion policy taken whenever either
/// side of the handshake times out. Callers must already hold `LOCK`.
fn hard_reset_both() {
    #[cfg(feature = "defmt")]
    defmt::warn!("exclusive section handshake timed out, hard-resetting both cores");
    X_COUNT[0].store(0, Ordering::Release);
    X_COUNT[1].store(0, Ordering::Release);
}

/// RAII guard returned by [`enter`]; dropping it runs the exit protocol.
/// Not constructible outside this module.
#[must_use]
pub struct ExclusiveGuard {
    _private: (),
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        exit();
    }
}

/// `true` iff the calling core's entry counter is currently above zero
/// (i.e. it is INSIDE or re-entering). Used by [`crate::thread::suspend`]
/// to forbid self-suspension from inside an exclusive section (§4.5.5),
/// the same way [`crate::critical::is_critical`] is consulted.
#[must_use]
pub fn is_inside() -> bool {
    X_COUNT[current_core().index()].load(Ordering::Acquire) > 0
}

/// Forces the calling core's counter to zero. Used by [`crate::thread::exit`]
/// to reset a stopped thread's exclusive depth (§4.5.5), mirroring
/// [`crate::critical::reset_critical`]. Unlike the crash-recovery path this
/// only ever touches this core's own slot, never the other core's.
pub fn reset() {
    X_COUNT[current_core().index()].store(0, Ordering::Release);
}

/// Runs the entry protocol (§4.4 steps 1-4) and returns a guard that runs
/// the exit protocol on drop, or an error if either handshake phase timed
/// out or the lock could not be acquired.
pub fn enter() -> Result<ExclusiveGuard, ErrorCode> {
    let _critical = critical::CriticalGuard::enter();
    let core_idx = current_core().index();
    let alt_idx = other(core_idx);
    // On a single-core build there is no other core to rendezvous with;
    // steps 2-3 degenerate to "always already acknowledged" and are
    // skipped entirely rather than polling for a signal that can never
    // arrive.
    let single_core = smp::cores() < 2;

    // Step 1.
    if LOCK.acquire(lock_timeout(), || {}).is_err() {
        return Err(ErrorCode::Internal);
    }

    // Step 2: the other core is already inside, yield to it.
    if !single_core && X_COUNT[alt_idx].load(Ordering::Acquire) > 0 {
        X_COUNT[core_idx].store(YIELDING, Ordering::Release);
        let start = time::now();
        loop {
            LOCK.release().expect("exclusive edit-lock released by its own holder");
            if start.has_elapsed(section_timeout()) {
                // Crash-recovery: reacquire just long enough to reset.
                if LOCK.acquire(lock_timeout(), || {}).is_ok() {
                    hard_reset_both();
                    LOCK.release().expect("exclusive edit-lock released by its own holder");
                }
                return Err(ErrorCode::Timeout);
            }
            core::hint::spin_loop();
            if LOCK.acquire(lock_timeout(), || {}).is_err() {
                return Err(ErrorCode::Internal);
            }
            if X_COUNT[alt_idx].load(Ordering::Acquire) <= 0 {
                break;
            }
        }
    }

    // Step 3: claim entry and wait for the other core's acknowledgment.
    let mut cur = X_COUNT[core_idx].load(Ordering::Acquire);
    if cur == YIELDING {
        cur = 0;
    }
    X_COUNT[core_idx].store(cur + 1, Ordering::Release);
    LOCK.release().expect("exclusive edit-lock released by its own holder");

    if !single_core {
        smp::signal_other_core();

        let start = time::now();
        loop {
            if LOCK.acquire(lock_timeout(), || {}).is_err() {
                return Err(ErrorCode::Internal);
            }
            let acked = X_COUNT[alt_idx].load(Ordering::Acquire) == YIELDING;
            LOCK.release().expect("exclusive edit-lock released by its own holder");
            if acked {
                break;
            }
            if start.has_elapsed(ack_timeout()) {
                if LOCK.acquire(lock_timeout(), || {}).is_ok() {
                    hard_reset_both();
                    LOCK.release().expect("exclusive edit-lock released by its own holder");
                }
                return Err(ErrorCode::Timeout);
            }
            core::hint::spin_loop();
        }
    }

    // Step 4: `_critical` stays held for the caller's section; the guard's
    // own critical section was only needed for the handshake itself, so it
    // is released here and the section body runs outside it, matching
    // "exit critical" at the end of the entry protocol.
    drop(_critical);
    Ok(ExclusiveGuard { _private: () })
}

/// The exit protocol (§4.4): decrements `this_x`, which must be above
/// zero. Run automatically by [`ExclusiveGuard`]'s `Drop`.
fn exit() {
    let _critical = critical::CriticalGuard::enter();
    let core_idx = current_core().index();
    if LOCK.acquire(lock_timeout(), || {}).is_err() {
        return;
    }
    let cur = X_COUNT[core_idx].load(Ordering::Acquire);
    if cur > 0 {
        X_COUNT[core_idx].store(cur - 1, Ordering::Release);
    }
    LOCK.release().expect("exclusive edit-lock released by its own holder");
}

/// Runs on receipt of the other core's inter-core entry signal (§4.4 "the
/// receiving side runs an update handler"). Wired up by the concrete `smp`
/// backend's inter-core interrupt handler (out of scope here, §1, the same
/// way `riot-rs-threads`'s FIFO interrupt injects `handle_fifo_token`).
///
/// If this core is idle (`this_x == 0`) and the other core is entering
/// (`alt_x > 0`), acknowledges by writing the sentinel and then blocks
/// (bounded by the section timeout) until the other core has fully exited,
/// so this core cannot race into its own entry attempt mid-handshake.
pub fn update_handler() {
    let _critical = critical::CriticalGuard::enter();
    let core_idx = current_core().index();
    let alt_idx = other(core_idx);

    if LOCK.acquire(lock_timeout(), || {}).is_err() {
        return;
    }
    let should_ack = X_COUNT[core_idx].load(Ordering::Acquire) == 0 && X_COUNT[alt_idx].load(Ordering::Acquire) > 0;
    if !should_ack {
        LOCK.release().expect("exclusive edit-lock released by its own holder");
        return;
    }
    X_COUNT[core_idx].store(YIELDING, Ordering::Release);

    let start = time::now();
    loop {
        LOCK.release().expect("exclusive edit-lock released by its own holder");
        if X_COUNT[alt_idx].load(Ordering::Acquire) == 0 {
            break;
        }
        if start.has_elapsed(section_timeout()) {
            if LOCK.acquire(lock_timeout(), || {}).is_ok() {
                hard_reset_both();
                LOCK.release().expect("exclusive edit-lock released by its own holder");
            }
            return;
        }
        core::hint::spin_loop();
        if LOCK.acquire(lock_timeout(), || {}).is_err() {
            return;
        }
    }
    X_COUNT[core_idx].store(0, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Host builds only ever run `current_core() == Primary`, so these
    // tests exercise the single-core fast path (step 2/3's polling loops
    // never trigger since `X_COUNT[1]` stays 0) rather than a genuine
    // cross-core handshake.

    fn reset_all() {
        X_COUNT[0].store(0, Ordering::Release);
        X_COUNT[1].store(0, Ordering::Release);
    }

    #[test]
    fn enter_then_drop_returns_to_outside() {
        reset_all();
        assert!(!is_inside());
        let guard = enter().unwrap();
        assert!(is_inside());
        drop(guard);
        assert!(!is_inside());
    }

    #[test]
    fn reset_forces_zero() {
        reset_all();
        let guard = enter().unwrap();
        core::mem::forget(guard);
        assert!(is_inside());
        reset();
        assert!(!is_inside());
    }

    #[test]
    fn nested_entry_on_same_core_increments_and_unwinds() {
        reset_all();
        let outer = enter().unwrap();
        assert!(is_inside());
        let inner = enter().unwrap();
        assert_eq!(X_COUNT[0].load(Ordering::Acquire), 2);
        drop(inner);
        assert!(is_inside());
        drop(outer);
        assert!(!is_inside());
    }

    #[test]
    fn crash_recovery_hard_resets_both_counters() {
        reset_all();
        X_COUNT[0].store(3, Ordering::Release);
        X_COUNT[1].store(YIELDING, Ordering::Release);
        hard_reset_both();
        assert_eq!(X_COUNT[0].load(Ordering::Acquire), 0);
        assert_eq!(X_COUNT[1].load(Ordering::Acquire), 0);
    }
}
