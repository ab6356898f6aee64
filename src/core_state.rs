//! Core-state oracle (§4.2): `current_core()` / `in_interrupt()`.
//!
//! Both are constant-time, side-effect-free, and callable from any context
//! including interrupts — they read a CPU-identification register rather
//! than touching any lock, the same contract `riot-rs-threads::smp::Chip::core_id`
//! has for reading `SIO.cpuid()` on rp2040.

use crate::smp::CoreId;

/// The two physical cores this kernel targets (§1 "asymmetric two-core").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Core {
    /// The Cortex-M7, running the higher-priority workload.
    Primary,
    /// The Cortex-M4, running the lower-priority workload.
    Secondary,
}

impl Core {
    #[must_use]
    pub(crate) fn to_core_id(self) -> CoreId {
        match self {
            Core::Primary => CoreId::new(0),
            Core::Secondary => CoreId::new(1),
        }
    }

    /// Index into the per-core arrays used by [`crate::critical`] and the
    /// thread registry.
    #[must_use]
    pub(crate) fn index(self) -> usize {
        match self {
            Core::Primary => 0,
            Core::Secondary => 1,
        }
    }
}

/// Identifies the executing core by reading the CPU-identification register.
///
/// On a real target this reads a hardware MPIDR-equivalent (out of scope,
/// §1); on host builds (`cfg(test)`, `multi-core` disabled) it always
/// reports [`Core::Primary`] since there is only one logical core to test
/// scheduling policy against.
#[must_use]
pub fn current_core() -> Core {
    cfg_if::cfg_if! {
        if #[cfg(all(feature = "multi-core", context = "cortex-m"))] {
            if crate::arch::cortex_m::core_id_register() == 0 {
                Core::Primary
            } else {
                Core::Secondary
            }
        } else {
            Core::Primary
        }
    }
}

/// `true` iff execution is currently inside any interrupt/exception.
///
/// On Cortex-M this reads the active exception number out of IPSR: zero
/// means thread mode, anything else means some handler is active.
#[must_use]
pub fn in_interrupt() -> bool {
    cfg_if::cfg_if! {
        if #[cfg(context = "cortex-m")] {
            crate::arch::cortex_m::ipsr() != 0
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_build_is_always_primary_outside_interrupt() {
        assert_eq!(current_core(), Core::Primary);
        assert!(!in_interrupt());
    }
}
