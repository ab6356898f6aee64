//! Thread registry (§4.5.2) and weighted round-robin scheduler (§4.5.3),
//! plus the public thread operations (§4.5.5) and their failure semantics
//! (§4.5.6).
//!
//! Grounded on `riot-rs-threads::lib::Threads` for the general shape (a
//! single lock-protected aggregate holding the TCB table and a per-core
//! current-thread slot, reached through a small static), but the actual
//! scheduling policy is new: the teacher's `RunQueue` is a fixed-priority
//! CList/bitmap structure, while this spec's policy (§4.5.3) is weighted
//! round robin by cumulative `sched_count` credit, which has no equivalent
//! in `riot-rs-runqueue` and is implemented here as a fresh linear scan.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::arch::{self, Arch};
use crate::config;
use crate::core_state;
use crate::error::{self, ErrorCode};
use crate::handle::{Handle, Stamped};
use crate::sync::critlock::RawCritlock;
use crate::time::Duration;

use super::{Tcb, ThreadHandle, ThreadState};

const CORES: usize = 2;

struct Registry {
    slots: [Option<NonNull<Tcb>>; config::MAX_THREADS],
    current: [Option<NonNull<Tcb>>; CORES],
}

impl Registry {
    const fn new() -> Self {
        Registry {
            slots: [None; config::MAX_THREADS],
            current: [None; CORES],
        }
    }

    fn find_empty_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }
}

struct RegistryCell {
    lock: RawCritlock,
    inner: UnsafeCell<Registry>,
}

// SAFETY: every access to `inner` goes through `lock`.
unsafe impl Sync for RegistryCell {}

impl RegistryCell {
    /// Acquires the scheduler critlock (bounded, §4.5.2) and runs `f` with
    /// exclusive access to the registry. The internal retry loop between
    /// CAS attempts must not call back into the scheduler (it *is* the
    /// scheduler), so it busy-spins rather than yielding.
    fn with_locked<R>(&self, timeout: Duration, f: impl FnOnce(&mut Registry) -> R) -> Result<R, ErrorCode> {
        if let Err(code) = self.lock.acquire(timeout, || {}) {
            #[cfg(feature = "defmt")]
            defmt::error!("scheduler registry lock acquisition failed");
            return Err(code);
        }
        let result = f(unsafe { &mut *self.inner.get() });
        self.lock
            .release()
            .expect("scheduler registry lock released by its own holder");
        Ok(result)
    }
}

static REGISTRY: RegistryCell = RegistryCell {
    lock: RawCritlock::new(),
    inner: UnsafeCell::new(Registry::new()),
};

fn default_timeout() -> Duration {
    Duration::from_ticks(config::THREAD_TIMEOUT)
}

/// Creates a thread from caller-supplied memory (§4.5.5).
///
/// `mem` holds the guard word, stack, and TCB combined (§4.5.1); `entry`
/// is called with `arg` on first schedule.
pub fn create(
    mem: &'static mut [u8],
    entry: extern "C" fn(usize),
    arg: usize,
    priority: u8,
    out: &mut ErrorCode,
) -> ThreadHandle {
    let min_len = config::MIN_STACK_SIZE + core::mem::size_of::<Tcb>() + core::mem::size_of::<u32>();
    if mem.len() < min_len {
        return error::fail(out, ErrorCode::InvalidArg, ThreadHandle::invalid());
    }
    if priority < 1 || priority > config::MAX_THREAD_PRIORITY {
        return error::fail(out, ErrorCode::InvalidArg, ThreadHandle::invalid());
    }

    let result = REGISTRY.with_locked(default_timeout(), |reg| {
        let Some(slot) = reg.find_empty_slot() else {
            #[cfg(feature = "defmt")]
            defmt::warn!("thread registry exhausted, rejecting create()");
            return Err(ErrorCode::NoMem);
        };
        let id = crate::handle::next_id();
        // SAFETY: `mem` is `'static`, not aliased (taken by value), and at
        // least `min_len` bytes as checked above.
        let ptr = unsafe { Tcb::construct(mem, entry as usize, arg, priority, slot, id) };
        reg.slots[slot] = Some(ptr);
        // SAFETY: just stamped with `id` by `construct`.
        Ok(unsafe { Handle::new(id, ptr) })
    });

    match result {
        Ok(Ok(handle)) => error::ok(out, handle),
        Ok(Err(code)) => error::fail(out, code, ThreadHandle::invalid()),
        Err(code) => error::fail(out, code, ThreadHandle::invalid()),
    }
}

/// Destroys a STOPPED thread, removing it from the registry (§4.5.5).
pub fn destroy(handle: ThreadHandle, out: &mut ErrorCode) -> bool {
    let Some(tcb) = handle.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    let slot = tcb.slot();

    let result = REGISTRY.with_locked(default_timeout(), |reg| {
        // SAFETY: the slot is populated iff this handle validated above,
        // and nothing else touches `Tcb` fields without the registry lock.
        let tcb = unsafe { &mut *reg.slots[slot].expect("validated handle has a live slot").as_ptr() };
        if tcb.state() != ThreadState::Stopped {
            return Err(ErrorCode::InvalidState);
        }
        tcb.invalidate();
        reg.slots[slot] = None;
        Ok(())
    });

    match result {
        Ok(Ok(())) => error::ok(out, true),
        Ok(Err(code)) | Err(code) => error::fail(out, code, false),
    }
}

/// Suspends a READY or RUNNING thread (§4.5.5). Suspending the current
/// thread while it is inside a critical or exclusive region fails with
/// [`ErrorCode::InvalidState`], since the scheduler could not otherwise
/// run to honor the suspension.
pub fn suspend(handle: ThreadHandle, out: &mut ErrorCode) -> bool {
    let Some(tcb) = handle.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    let slot = tcb.slot();
    let is_self = current_thread_raw().map(|h| h.raw_id()) == Some(handle.raw_id());

    if is_self && (crate::critical::is_critical() || crate::exclusive::is_inside()) {
        return error::fail(out, ErrorCode::InvalidState, false);
    }

    let result = REGISTRY.with_locked(default_timeout(), |reg| {
        let tcb = unsafe { &mut *reg.slots[slot].expect("validated handle has a live slot").as_ptr() };
        match tcb.state() {
            ThreadState::Ready | ThreadState::Running => {
                tcb.set_state(ThreadState::Suspended);
                Ok(())
            }
            _ => Err(ErrorCode::InvalidState),
        }
    });

    match result {
        Ok(Ok(())) => {
            if is_self {
                arch::Cpu::schedule();
            }
            error::ok(out, true)
        }
        Ok(Err(code)) | Err(code) => error::fail(out, code, false),
    }
}

/// Resumes a SUSPENDED thread, making it READY (§4.5.5).
pub fn resume(handle: ThreadHandle, out: &mut ErrorCode) -> bool {
    let Some(tcb) = handle.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    let slot = tcb.slot();

    let result = REGISTRY.with_locked(default_timeout(), |reg| {
        let tcb = unsafe { &mut *reg.slots[slot].expect("validated handle has a live slot").as_ptr() };
        if tcb.state() != ThreadState::Suspended {
            return Err(ErrorCode::InvalidState);
        }
        tcb.set_state(ThreadState::Ready);
        Ok(())
    });

    match result {
        Ok(Ok(())) => error::ok(out, true),
        Ok(Err(code)) | Err(code) => error::fail(out, code, false),
    }
}

/// Sets a thread's priority (1..=`MAX_THREAD_PRIORITY`).
pub fn set_priority(handle: ThreadHandle, priority: u8, out: &mut ErrorCode) -> bool {
    if priority < 1 || priority > config::MAX_THREAD_PRIORITY {
        return error::fail(out, ErrorCode::InvalidArg, false);
    }
    let Some(tcb) = handle.validate() else {
        return error::fail(out, ErrorCode::InvalidArg, false);
    };
    let slot = tcb.slot();
    let result = REGISTRY.with_locked(default_timeout(), |reg| {
        let tcb = unsafe { &mut *reg.slots[slot].expect("validated handle has a live slot").as_ptr() };
        tcb.set_priority(priority);
    });
    match result {
        Ok(()) => error::ok(out, true),
        Err(code) => error::fail(out, code, false),
    }
}

/// Returns a thread's priority.
pub fn get_priority(handle: ThreadHandle, out: &mut ErrorCode) -> u8 {
    super::with_thread(handle, out, 0, |tcb| tcb.priority())
}

/// Returns a thread's lifecycle state.
pub fn get_state(handle: ThreadHandle, out: &mut ErrorCode) -> Option<ThreadState> {
    super::with_thread(handle, out, None, |tcb| Some(tcb.state()))
}

/// Returns a thread's total stack size in bytes.
pub fn get_stack_size(handle: ThreadHandle, out: &mut ErrorCode) -> usize {
    super::with_thread(handle, out, 0, |tcb| tcb.stack_size())
}

/// Returns a thread's high-water stack usage in bytes.
pub fn get_stack_usage(handle: ThreadHandle, out: &mut ErrorCode) -> usize {
    super::with_thread(handle, out, 0, |tcb| {
        tcb.note_stack_usage();
        tcb.stack_usage()
    })
}

/// `true` iff the thread's stack guard word has been clobbered.
pub fn is_thread_overflow(handle: ThreadHandle, out: &mut ErrorCode) -> bool {
    super::with_thread(handle, out, false, |tcb| tcb.is_overflowed())
}

/// A no-op from interrupts, critical, or exclusive sections; otherwise
/// triggers a reschedule (§4.5.5).
pub fn yield_now() {
    if core_state::in_interrupt() || crate::critical::is_critical() || crate::exclusive::is_inside() {
        return;
    }
    arch::Cpu::schedule();
}

/// Returns the current thread's handle, or [`ThreadHandle::invalid`] from
/// interrupt context (§4.5.5).
pub fn current_thread() -> ThreadHandle {
    if core_state::in_interrupt() {
        return ThreadHandle::invalid();
    }
    current_thread_raw().unwrap_or(ThreadHandle::invalid())
}

fn current_thread_raw() -> Option<ThreadHandle> {
    let core_idx = core_state::current_core().index();
    REGISTRY
        .with_locked(default_timeout(), |reg| {
            reg.current[core_idx].map(|ptr| {
                // SAFETY: a populated current-thread slot always points at
                // a live TCB.
                let tcb = unsafe { ptr.as_ref() };
                // `Handle::new` requires the id it's stamped with; reading
                // it here is safe since we hold the registry lock.
                unsafe { Handle::new(tcb.stamped_id(), ptr) }
            })
        })
        .ok()
        .flatten()
}

/// Resets the current thread's critical/exclusive nesting to zero, then
/// terminates it (§4.5.5).
///
/// From interrupt context this performs a direct return-to-thread-mode
/// without saving context (self-annihilation of the interrupted thread).
/// From thread context, marks self STOPPED and retries the reschedule in
/// a loop robust to transient scheduler-lock failures.
pub fn exit() -> ! {
    crate::critical::reset_critical();
    crate::exclusive::reset();

    if core_state::in_interrupt() {
        arch::Cpu::schedule();
        // SAFETY: `schedule()` just pended the reschedule exception; this
        // call is itself running in exception context, and never returns.
        unsafe { arch::return_to_thread_mode() }
    }

    if let Some(handle) = current_thread_raw() {
        if let Some(tcb) = handle.validate() {
            let slot = tcb.slot();
            loop {
                let result = REGISTRY.with_locked(default_timeout(), |reg| {
                    let tcb = unsafe {
                        &mut *reg.slots[slot]
                            .expect("validated handle has a live slot")
                            .as_ptr()
                    };
                    tcb.set_state(ThreadState::Stopped);
                    reg.current[core_state::current_core().index()] = None;
                });
                if result.is_ok() {
                    break;
                }
            }
        }
    }

    arch::Cpu::schedule();
    loop {
        arch::Cpu::wfi();
    }
}

/// Pure weighted round-robin decision for one core (§4.5.3), separated
/// from the arch-integration wrapper below so it is host-testable without
/// touching any real stack pointer.
fn reschedule_core(reg: &mut Registry, core_idx: usize, save_sp: impl FnOnce(&mut Tcb)) -> Option<usize> {
    if let Some(prev_ptr) = reg.current[core_idx] {
        // SAFETY: registry lock held.
        let prev = unsafe { &mut *prev_ptr.as_ptr() };
        save_sp(prev);
        if prev.state() == ThreadState::Running {
            prev.set_state(ThreadState::Ready);
        }
    }
    reg.current[core_idx] = None;

    let mut winner: Option<(usize, u32)> = None;
    for (idx, slot) in reg.slots.iter().enumerate() {
        let Some(ptr) = slot else { continue };
        // SAFETY: registry lock held.
        let tcb = unsafe { &mut *ptr.as_ptr() };
        if tcb.state() == ThreadState::Stopped {
            continue;
        }
        tcb.add_sched_credit();
        if tcb.is_overflowed() {
            #[cfg(feature = "defmt")]
            defmt::error!("thread stack overflow detected, stopping thread");
            tcb.set_state(ThreadState::Stopped);
            continue;
        }
        if tcb.state() == ThreadState::Ready {
            let credit = tcb.sched_count();
            let better = match winner {
                None => true,
                Some((_, best)) => credit > best,
            };
            if better {
                winner = Some((idx, credit));
            }
        }
    }

    let (idx, _) = winner?;
    // SAFETY: `idx` was just observed populated in the scan above, under
    // the same held lock.
    let ptr = reg.slots[idx].expect("winning slot is populated");
    let tcb = unsafe { &mut *ptr.as_ptr() };
    tcb.set_state(ThreadState::Running);
    tcb.clear_sched_credit();
    reg.current[core_idx] = Some(ptr);
    Some(tcb.sp())
}

/// Called from the architecture's reschedule-exception handler. Returns
/// the next thread's saved stack pointer, or `0` when the handler should
/// leave the current stack untouched — either because the same thread won
/// again, or because no thread is READY (in which case the architecture
/// backend is responsible for entering its idle behavior).
///
/// # Safety
/// Must only be called from the reschedule exception with interrupts
/// effectively masked by exception entry, and `read_psp` must read the
/// outgoing thread's genuine saved process stack pointer.
pub(crate) unsafe fn reschedule_on_exception(read_psp: fn() -> usize) -> usize {
    let core_idx = core_state::current_core().index();
    let prev_same_as_next = REGISTRY.with_locked(Duration::ZERO, |reg| {
        let prev = reg.current[core_idx];
        let next_sp = reschedule_core(reg, core_idx, |tcb| tcb.set_sp(read_psp()));
        match next_sp {
            None => {
                arch::set_sleep_on_exit();
                0
            }
            Some(sp) => {
                arch::clear_sleep_on_exit();
                let next_ptr = reg.current[core_idx];
                if prev.is_some() && prev == next_ptr {
                    0
                } else {
                    sp
                }
            }
        }
    });
    prev_same_as_next.unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Constructs a TCB in leaked (`'static`) memory, as every real TCB is
    /// backed by caller-supplied storage that outlives it.
    fn fresh_tcb(id: i32, priority: u8, state: ThreadState) -> NonNull<Tcb> {
        let mem: &'static mut [u8] = Box::leak(vec![0u8; 512].into_boxed_slice());
        let mut ptr = unsafe { Tcb::construct(mem, 0, 0, priority, 0, id) };
        unsafe { ptr.as_mut() }.set_state(state);
        ptr
    }

    #[test]
    fn equal_priority_threads_share_turns_fairly() {
        let a = fresh_tcb(1, 1, ThreadState::Ready);
        let b = fresh_tcb(2, 1, ThreadState::Ready);
        let mut reg = Registry::new();
        reg.slots[0] = Some(a);
        reg.slots[1] = Some(b);

        let mut wins = [0u32; 2];
        for _ in 0..20 {
            let sp = reschedule_core(&mut reg, 0, |_| {});
            assert!(sp.is_some());
            let current = reg.current[0].unwrap();
            if current == a {
                wins[0] += 1;
            } else {
                wins[1] += 1;
            }
        }
        assert!(wins[0] >= 9 && wins[1] >= 9, "wins = {wins:?}");
    }

    #[test]
    fn higher_priority_wins_more_often() {
        let a = fresh_tcb(1, 1, ThreadState::Ready);
        let b = fresh_tcb(2, 3, ThreadState::Ready);
        let mut reg = Registry::new();
        reg.slots[0] = Some(a);
        reg.slots[1] = Some(b);

        let mut wins = [0u32; 2];
        for _ in 0..40 {
            reschedule_core(&mut reg, 0, |_| {});
            let current = reg.current[0].unwrap();
            if current == a {
                wins[0] += 1;
            } else {
                wins[1] += 1;
            }
        }
        let ratio = f64::from(wins[1]) / f64::from(wins[0]);
        assert!((2.0..4.5).contains(&ratio), "ratio = {ratio}");
    }

    #[test]
    fn stack_overflow_forces_stopped_on_next_reschedule() {
        let mem: &'static mut [u8] = Box::leak(vec![0u8; 512].into_boxed_slice());
        let base = mem.as_mut_ptr();
        let mut a = unsafe { Tcb::construct(mem, 0, 0, 1, 0, 1) };
        unsafe { a.as_mut() }.set_state(ThreadState::Ready);
        // Clobber the guard word.
        unsafe {
            (base as *mut u32).write_volatile(0);
        }
        let mut reg = Registry::new();
        reg.slots[0] = Some(a);
        let sp = reschedule_core(&mut reg, 0, |_| {});
        assert!(sp.is_none());
        assert_eq!(unsafe { a.as_ref() }.state(), ThreadState::Stopped);
    }
}
