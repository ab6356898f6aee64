//! Architecture back-end seam (§4.5.4).
//!
//! `Arch` collects the small set of operations the scheduler needs from the
//! concrete CPU: building the initial stack frame for a new thread, pending
//! the reschedule exception, and idling. This mirrors
//! `riot-rs-threads::arch::Arch` exactly; the free functions below
//! (`disable_interrupts`/`enable_interrupts`/`isb`/`ipsr`/`core_id_register`)
//! are the lower-level primitives [`crate::critical`] and
//! [`crate::core_state`] build on, factored out so the `cortex_m` backend is
//! the only module that touches raw CPU state.

use crate::thread::Tcb;

pub mod cortex_m;

/// Per-thread register-save area and context-switch hooks supplied by the
/// concrete architecture backend.
pub trait Arch {
    /// Callee-saved register storage, embedded in the TCB.
    type ThreadData: Copy;

    const DEFAULT_THREAD_DATA: Self::ThreadData;

    /// Builds the initial exception frame at the top of `stack` so that the
    /// first context-restore enters `entry(arg)` with a return address
    /// pointing at the thread-exit trampoline (§4.5.1).
    ///
    /// # Safety
    /// `stack` must be at least [`crate::config::MIN_STACK_SIZE`] bytes and
    /// correctly aligned for the target's stacked-frame requirements.
    unsafe fn setup_stack(tcb: &mut Tcb, stack: &mut [u8], entry: usize, arg: usize);

    /// Pends the reschedule exception on the calling core.
    fn schedule();

    /// Enters thread mode and runs the first scheduled thread. Never
    /// returns.
    fn start_threading() -> !;

    /// Waits for the next interrupt (idle).
    fn wfi();
}

cfg_if::cfg_if! {
    if #[cfg(context = "cortex-m")] {
        pub use cortex_m::Cpu;

        pub(crate) use self::cortex_m::{
            core_id_register, disable_interrupts, enable_interrupts, isb, ipsr, read_psp,
            set_sleep_on_exit, clear_sleep_on_exit, return_to_thread_mode,
        };
    } else {
        pub use host::Cpu;

        pub(crate) fn disable_interrupts() {}
        pub(crate) fn enable_interrupts() {}
        pub(crate) fn isb() {}
        pub(crate) fn ipsr() -> u32 {
            0
        }
        pub(crate) fn core_id_register() -> u32 {
            0
        }
        pub(crate) fn read_psp() -> usize {
            0
        }
        pub(crate) fn set_sleep_on_exit() {}
        pub(crate) fn clear_sleep_on_exit() {}

        /// Host stand-in: there is no real exception return to perform, so
        /// this just parks the calling (simulated-interrupt) context.
        pub(crate) fn return_to_thread_mode() -> ! {
            loop {
                core::hint::spin_loop();
            }
        }

        /// Host stand-in for the architecture backend, used only by host
        /// unit tests of the pure scheduling/synchronization logic; it never
        /// actually context-switches.
        mod host {
            use super::Arch;
            use crate::thread::Tcb;

            pub struct Cpu;

            impl Arch for Cpu {
                type ThreadData = [usize; 8];
                const DEFAULT_THREAD_DATA: Self::ThreadData = [0; 8];

                unsafe fn setup_stack(_tcb: &mut Tcb, _stack: &mut [u8], _entry: usize, _arg: usize) {}

                fn schedule() {}

                fn start_threading() -> ! {
                    loop {
                        core::hint::spin_loop();
                    }
                }

                fn wfi() {}
            }
        }
    }
}
