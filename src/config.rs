//! Compile-time configuration constants.
//!
//! These mirror how `riot-rs-threads` exposes `SCHED_PRIO_LEVELS` /
//! `THREADS_NUMOF` as plain top-level `pub const`s rather than through a
//! runtime configuration struct: there is no dynamic allocation anywhere in
//! this crate, so there is nothing a runtime config object would buy over a
//! `const`.

/// Fixed registry capacity: the maximum number of threads that can exist
/// at once. Default 16.
pub const MAX_THREADS: usize = 16;

/// Upper bound of the thread priority range; priorities are `1..=MAX_THREAD_PRIORITY`.
/// Default 32.
pub const MAX_THREAD_PRIORITY: u8 = 32;

/// Minimum valid thread stack size, in bytes. Must be large enough to hold
/// the guard word, the initial exception frame, and the TCB itself.
/// Default 256.
pub const MIN_STACK_SIZE: usize = 256;

/// Default timeout (in ticks) for acquiring the scheduler critlock.
pub const THREAD_TIMEOUT: u32 = 1_000;

/// Timeout (in ticks) for the section-mutual-exclusion poll loop in the
/// exclusive-section entry protocol (step 2 of §4.4).
pub const EXCL_SECTION_TIMEOUT: u32 = 2_000;

/// Timeout (in ticks) for the cross-core acknowledgment poll loop in the
/// exclusive-section entry protocol (step 3 of §4.4).
pub const EXCL_SECTION_ACK_TIMEOUT: u32 = 500;

/// Timeout (in ticks) for acquiring the exclusive-section shared edit-lock.
pub const EXCL_SECTION_LOCK_TIMEOUT: u32 = 200;

/// Sentinel pattern written at a thread's stack guard word. Chosen to be
/// unlikely to occur as an accidental stack value.
pub const STACK_GUARD_PATTERN: u32 = 0xDEAD_BEEF;
