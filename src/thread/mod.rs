//! Thread control block (§4.5.1) and its states.
//!
//! A `Tcb` is constructed in place at the top of caller-supplied memory: the
//! lowest address holds the stack-guard sentinel, then the thread's stack
//! grows downward from the top of the region, then the `Tcb` fields sit at
//! the very top. This differs from `riot-rs-threads`, which keeps its TCBs
//! in a static `[Thread; THREADS_NUMOF]` array and only the stack bytes are
//! caller-supplied — the spec requires the TCB itself to live in
//! caller-supplied memory (§4.5.1, §3 "Caller supplies all backing
//! storage"), so construction here does the placement with raw pointer
//! writes instead of indexing a static array.

pub mod scheduler;

use core::ptr::NonNull;

use crate::arch::Arch;
use crate::atomic::{AtomicSignedWord, AtomicWord, Ordering};
use crate::config;
use crate::error::ErrorCode;
use crate::handle::{Handle, Stamped};

pub use scheduler::{
    create, current_thread, destroy, exit, get_stack_size, get_stack_usage, get_state,
    get_priority, is_thread_overflow, resume, set_priority, suspend, yield_now,
};

/// A thread's lifecycle state (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    Ready,
    Running,
    Suspended,
    Stopped,
}

/// Opaque handle to a thread.
pub type ThreadHandle = Handle<Tcb>;

/// Thread control block, laid out at the top of the caller-supplied memory
/// region backing the thread (§4.5.1).
#[repr(C)]
pub struct Tcb {
    /// Saved stack pointer. Valid only while the thread is not RUNNING on
    /// this core; while running, the live value lives in the CPU's PSP.
    pub(crate) sp: usize,
    /// Base address of the caller-supplied memory region (guard word +
    /// stack), used to locate the guard word for overflow checking.
    stack_base: usize,
    /// Size in bytes of the stack portion of the region (excludes the
    /// guard word and the `Tcb` itself).
    stack_size: usize,
    /// High-water mark of stack usage, in bytes from `stack_base`,
    /// updated lazily alongside overflow checks.
    stack_used_high_water: AtomicWord,
    priority: u8,
    state: ThreadState,
    /// Weighted round-robin credit (§4.5.3).
    sched_count: u32,
    /// This thread's own registry slot index, fixed at construction.
    slot: usize,
    /// `id` is the one field read lock-free for handle validation (§4.5.2),
    /// so unlike every other field it must be a genuine atomic rather than
    /// a plain word serialized entirely by the registry lock.
    id: AtomicSignedWord,
}

// SAFETY: every field but `id` is only ever read or written while holding
// the scheduler registry lock; `id` is itself atomic.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl Stamped for Tcb {
    fn stamped_id(&self) -> i32 {
        self.id.load(Ordering::Acquire)
    }
}

impl Tcb {
    /// Constructs a `Tcb` at the top of `mem`, in the layout described at
    /// module level, filling in the initial context frame via the
    /// architecture backend.
    ///
    /// # Safety
    /// `mem` must be valid for `'static`, not aliased by any other live
    /// reference, and large enough (`MIN_STACK_SIZE` + `size_of::<Tcb>()` +
    /// guard word) for the combined guard/stack/TCB layout.
    pub(crate) unsafe fn construct(
        mem: &'static mut [u8],
        entry: usize,
        arg: usize,
        priority: u8,
        slot: usize,
        id: i32,
    ) -> NonNull<Tcb> {
        let base = mem.as_mut_ptr();
        let total_len = mem.len();
        let tcb_size = core::mem::size_of::<Tcb>();
        let stack_size = total_len - tcb_size - core::mem::size_of::<u32>();

        // Guard word at the lowest address.
        (base as *mut u32).write_volatile(config::STACK_GUARD_PATTERN);

        let stack_start = base.add(core::mem::size_of::<u32>());
        let tcb_ptr = base.add(total_len - tcb_size).cast::<Tcb>();

        tcb_ptr.write(Tcb {
            sp: 0,
            stack_base: base as usize,
            stack_size,
            stack_used_high_water: AtomicWord::new(0),
            priority,
            state: ThreadState::Ready,
            sched_count: 0,
            slot,
            id: AtomicSignedWord::new(id),
        });

        let stack_slice = core::slice::from_raw_parts_mut(stack_start, stack_size);
        let tcb_ref = &mut *tcb_ptr.as_ptr();
        crate::arch::Cpu::setup_stack(tcb_ref, stack_slice, entry, arg);

        NonNull::new_unchecked(tcb_ptr.as_ptr())
    }

    /// `true` iff the guard word no longer reads the sentinel pattern.
    pub(crate) fn is_overflowed(&self) -> bool {
        // SAFETY: `stack_base` always points at the guard word written in
        // `construct`, which outlives this `Tcb` by construction.
        unsafe { (self.stack_base as *const u32).read_volatile() != config::STACK_GUARD_PATTERN }
    }

    pub(crate) fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub(crate) fn stack_usage(&self) -> usize {
        self.stack_used_high_water.load(Ordering::Relaxed) as usize
    }

    pub(crate) fn state(&self) -> ThreadState {
        self.state
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub(crate) fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub(crate) fn sched_count(&self) -> u32 {
        self.sched_count
    }

    pub(crate) fn add_sched_credit(&mut self) {
        self.sched_count = self.sched_count.saturating_add(u32::from(self.priority));
    }

    pub(crate) fn clear_sched_credit(&mut self) {
        self.sched_count = 0;
    }

    pub(crate) fn sp(&self) -> usize {
        self.sp
    }

    pub(crate) fn set_sp(&mut self, sp: usize) {
        self.sp = sp;
    }

    pub(crate) fn note_stack_usage(&self) {
        // SAFETY: `stack_base` is the guard word address; the stack region
        // immediately follows it and is scanned to find the deepest
        // written word, the same "lazy, on reschedule" high-water
        // measurement the overflow check itself uses.
        let guard_end = self.stack_base + core::mem::size_of::<u32>();
        let stack_top = guard_end + self.stack_size;
        let mut used = self.stack_used_high_water.load(Ordering::Relaxed) as usize;
        let mut addr = guard_end;
        while addr < stack_top {
            // SAFETY: within the caller-supplied stack region.
            if unsafe { (addr as *const u32).read_volatile() } != 0 {
                let candidate = stack_top - addr;
                if candidate > used {
                    used = candidate;
                }
                break;
            }
            addr += core::mem::size_of::<u32>();
        }
        self.stack_used_high_water
            .store(used as u32, Ordering::Relaxed);
    }

    /// Marks this TCB destroyed: invalidates every outstanding handle.
    pub(crate) fn invalidate(&self) {
        self.id.store(-1, Ordering::Release);
    }
}

/// Validates `handle` and invokes `f` with a reference to its `Tcb`, or
/// reports [`ErrorCode::InvalidArg`] and returns `invalid` if the handle
/// does not currently resolve.
pub(crate) fn with_thread<R>(
    handle: ThreadHandle,
    out: &mut ErrorCode,
    invalid: R,
    f: impl FnOnce(&Tcb) -> R,
) -> R {
    match handle.validate() {
        Some(tcb) => crate::error::ok(out, f(tcb)),
        None => crate::error::fail(out, ErrorCode::InvalidArg, invalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcb_construct_lays_out_guard_and_fields() {
        let mem: &'static mut [u8] = Box::leak(vec![0u8; 512].into_boxed_slice());
        let ptr = unsafe { Tcb::construct(mem, 0, 0, 5, 0, 1) };
        let tcb = unsafe { ptr.as_ref() };
        assert!(!tcb.is_overflowed());
        assert_eq!(tcb.priority(), 5);
        assert_eq!(tcb.state(), ThreadState::Ready);
    }
}
