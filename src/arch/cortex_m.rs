//! Cortex-M context switch (§4.5.1, §4.5.4).
//!
//! Grounded on `riot-rs-threads::arch::cortex_m`: the PendSV naked-asm shape
//! (stack the callee-saved registers onto the process stack, call a plain
//! Rust function to pick the next thread, restore) is carried over as-is.
//! Two things differ from the teacher to match this spec:
//! - the FPU lazy-stacking bit of the exception-return value is checked so
//!   the FPU save area is only pushed/popped when a thread actually used
//!   it (§4.5.4 step 1), which the teacher's integer-only target didn't
//!   need;
//! - on no thread being ready, this backend sets the processor's
//!   sleep-on-exit bit rather than looping `wfi` inside the handler, so the
//!   idle behavior is "returned from cleanly, hardware naps until the next
//!   interrupt" (§4.5.4 step 4) instead of spinning inside the exception;
//! - [`return_to_thread_mode`] is new: the teacher never self-terminates a
//!   thread from interrupt context, but §4.5.5 requires it here, so this
//!   backend adds a direct-exception-return primitive built the same way
//!   `PendSV`'s own tail returns (write the thread-mode/PSP `EXC_RETURN`
//!   value to `lr`, `bx lr`).
//!
//! `PendSV` also keeps the teacher's `cmp r0, #0 / beq` guard around the
//! register-push (both variants): the very first reschedule after
//! [`Cpu::start_threading`] fires with `psp == 0`, and without the guard
//! the push would compute a frame address at `0 - 32` instead of skipping
//! straight to `sched()`.

use core::arch::asm;
use core::ptr::write_volatile;

use cortex_m::peripheral::{scb::SystemHandler, SCB};

use crate::config;
use crate::thread::Tcb;

use super::Arch;

#[cfg(not(any(armv6m, armv7m, armv8m)))]
compile_error!("no supported ARM variant selected");

/// Bit 4 of `EXC_RETURN`: clear iff the exception stacked an FPU frame.
const EXC_RETURN_FTYPE: u32 = 1 << 4;

/// Size in bytes of the hardware-stacked exception frame (R0-R3, R12, LR,
/// PC, xPSR): the `32` baked into `setup_stack`'s `stack_pos` arithmetic.
const HW_FRAME_BYTES: usize = 8 * core::mem::size_of::<usize>();

const _: () = assert!(
    HW_FRAME_BYTES == 32,
    "hardware frame size assumption in `setup_stack` no longer holds on this target"
);

const _: () = assert!(
    config::MIN_STACK_SIZE >= HW_FRAME_BYTES,
    "MIN_STACK_SIZE must be large enough to hold the initial hardware exception frame"
);

pub struct Cpu;

impl Arch for Cpu {
    type ThreadData = [usize; 8];

    const DEFAULT_THREAD_DATA: Self::ThreadData = [0; 8];

    /// Cortex-M pushes the hardware frame on exception entry in the order:
    ///
    /// ```text
    /// +------+ <- sp (highest address first)
    /// | PSR  |
    /// | PC   |
    /// | LR   |
    /// | R12  |
    /// | R3   |
    /// | R2   |
    /// | R1   |
    /// | R0   |
    /// +------+ <- sp after the frame (lowest address)
    /// ```
    ///
    /// so the thread's first entry into `entry(arg)` is set up by writing
    /// that frame by hand at the top of the stack, with R0 seeded with
    /// `arg`, PC seeded with `entry`, and LR seeded with the exit
    /// trampoline so a normal `return` from `entry` lands there.
    unsafe fn setup_stack(tcb: &mut Tcb, stack: &mut [u8], entry: usize, arg: usize) {
        let stack_start = stack.as_ptr() as usize;
        // Room for the 8-word hardware frame; SP must end up 8-byte aligned.
        let stack_pos = ((stack_start + stack.len() - HW_FRAME_BYTES) & !0x7) as *mut usize;

        write_volatile(stack_pos.add(0), arg); // R0
        write_volatile(stack_pos.add(1), 1); // R1
        write_volatile(stack_pos.add(2), 2); // R2
        write_volatile(stack_pos.add(3), 3); // R3
        write_volatile(stack_pos.add(4), 12); // R12
        write_volatile(stack_pos.add(5), thread_exit_trampoline as usize); // LR
        write_volatile(stack_pos.add(6), entry); // PC
        write_volatile(stack_pos.add(7), 0x0100_0000); // xPSR (Thumb bit set)

        tcb.set_sp(stack_pos as usize);
    }

    #[inline(always)]
    fn schedule() {
        SCB::set_pendsv();
        cortex_m::asm::isb();
    }

    #[inline(always)]
    fn start_threading() -> ! {
        unsafe {
            let mut p = cortex_m::Peripherals::steal();
            p.SCB.set_priority(SystemHandler::PendSV, 0xFF);
            cortex_m::register::psp::write(0);
        }
        Self::schedule();
        loop {
            cortex_m::asm::wfi();
        }
    }

    fn wfi() {
        cortex_m::asm::wfi();
        #[cfg(context = "stm32")]
        cortex_m::asm::isb();
    }
}

/// Forces an immediate exception return to thread mode, bypassing the
/// normal call/return chain. Used by [`crate::thread::scheduler::exit`]'s
/// in-interrupt path (§4.5.5): a thread that self-terminates while the
/// interrupted context is mid-ISR has no context worth saving, so rather
/// than returning normally through the ISR's own call stack (which would
/// resume execution that no longer has a live thread under it) this writes
/// the thread-mode/PSP `EXC_RETURN` value straight into `lr` and branches,
/// the same magic value [`PendSV`]'s own tail uses to return.
///
/// # Safety
/// Must only be called from exception context, with `PendSV` already
/// pended, and never returns.
#[cfg(any(armv7m, armv8m))]
#[naked]
pub(crate) unsafe extern "C" fn return_to_thread_mode() -> ! {
    unsafe {
        asm!(
            "
            movw lr, #0xFFFd
            movt lr, #0xFFFF
            bx lr
            ",
            options(noreturn)
        )
    }
}

#[cfg(armv6m)]
#[naked]
pub(crate) unsafe extern "C" fn return_to_thread_mode() -> ! {
    unsafe {
        asm!(
            "
            ldr r0, 999f
            mov lr, r0
            bx lr

            .align 4
            999:
            .word 0xFFFFFFFD
            ",
            options(noreturn)
        )
    }
}

/// Thread-exit trampoline: the return address seeded into every new
/// thread's initial frame (§4.5.1). If `entry` ever returns instead of
/// calling `exit()` itself, execution lands here and performs the same
/// exit protocol.
extern "C" fn thread_exit_trampoline() -> ! {
    crate::thread::exit();
    unreachable!("exit() never returns to thread context");
}

pub(crate) fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

pub(crate) fn enable_interrupts() {
    unsafe {
        cortex_m::interrupt::enable();
    }
}

pub(crate) fn isb() {
    cortex_m::asm::isb();
}

/// Reads IPSR: `0` in thread mode, the active exception number otherwise.
pub(crate) fn ipsr() -> u32 {
    cortex_m::register::ipsr::read()
}

/// Reads the CPU-identification register used to tell the two cores apart.
/// On a real dual-core target this reads a vendor MPIDR-equivalent; the
/// concrete register is supplied by the `smp` backend (out of scope here,
/// §1), so this delegates to it.
pub(crate) fn core_id_register() -> u32 {
    crate::smp::dual_cortex_m::core_id_register()
}

pub(crate) fn read_psp() -> usize {
    cortex_m::register::psp::read() as usize
}

pub(crate) fn set_sleep_on_exit() {
    unsafe {
        cortex_m::Peripherals::steal().SCB.scr.modify(|v| v | (1 << 1));
    }
}

pub(crate) fn clear_sleep_on_exit() {
    unsafe {
        cortex_m::Peripherals::steal().SCB.scr.modify(|v| v & !(1 << 1));
    }
}

#[cfg(any(armv7m, armv8m))]
#[naked]
#[no_mangle]
#[allow(non_snake_case)]
unsafe extern "C" fn PendSV() {
    unsafe {
        asm!(
            "
            mrs.n r0, psp

            cmp r0, #0
            beq 95f

            mov r1, lr
            tst r1, #0x10
            it eq
            vstmdbeq r0!, {{d8-d15}}

            stmfd r0!, {{r4-r11}}
            msr.n psp, r0

            95:
            bl {sched}

            cmp r0, #0
            beq 99f

            ldmfd r0!, {{r4-r11}}

            mov r1, lr
            tst r1, #0x10
            it eq
            vldmiaeq r0!, {{d8-d15}}

            msr.n psp, r0

            99:
            movw lr, #0xFFFd
            movt lr, #0xFFFF
            bx lr
            ",
            sched = sym sched,
            options(noreturn)
        )
    };
}

#[cfg(armv6m)]
#[naked]
#[no_mangle]
#[allow(non_snake_case)]
unsafe extern "C" fn PendSV() {
    unsafe {
        asm!(
            "
            mrs.n r0, psp

            cmp r0, #0
            beq 95f

            subs r0, r0, 32
            msr.n psp, r0

            stmea r0!, {{r4-r7}}
            mov r4, r8
            mov r5, r9
            mov r6, r10
            mov r7, r11
            stmea r0!, {{r4-r7}}

            95:
            bl sched

            cmp r0, #0
            beq 99f

            ldmfd r0!, {{r4-r7}}
            mov r8, r4
            mov r9, r5
            mov r10, r6
            mov r11, r7
            ldmfd r0!, {{r4-r7}}

            msr.n psp, r0

            99:
            ldr r0, 999f
            mov lr, r0
            bx lr

            .align 4
            999:
            .word 0xFFFFFFFD
            ",
            options(noreturn)
        )
    };
}

/// Runs one reschedule pass for the calling core (§4.5.3) and returns the
/// next thread's saved stack pointer, or `0` if the PendSV handler should
/// leave the current stack untouched (no switch, or idle — in the idle
/// case [`set_sleep_on_exit`] has already been set so the processor naps
/// immediately after exception return).
///
/// Called from `PendSV` with interrupts already effectively masked by
/// exception entry.
#[no_mangle]
unsafe extern "C" fn sched() -> usize {
    crate::thread::scheduler::reschedule_on_exception(read_psp)
}
