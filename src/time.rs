//! Monotonic tick source (§4.1).
//!
//! `Instant`/`Duration` are a thin idiomatic wrapper around the raw
//! tick count, grounded on `perlindgren-rtfm4`'s `Instant`/`Duration` pair
//! (wrapping-subtraction comparisons, no allocation, `Copy` value types).
//! The actual tick increment is driven from outside this crate: the timer
//! peripheral that pends a periodic interrupt is out of scope (§1), so
//! [`tick()`] exists as the hook such external driver calls into.

use portable_atomic::{AtomicI64, Ordering};

static TICKS: AtomicI64 = AtomicI64::new(0);

/// A point in time, measured in ticks since boot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Instant(i64);

impl Instant {
    /// Returns the current time.
    #[must_use]
    pub fn now() -> Self {
        Instant(TICKS.load(Ordering::Relaxed))
    }

    /// Ticks elapsed since `self`, saturating at zero for times that
    /// (due to wraparound) would appear to be in the past.
    #[must_use]
    pub fn elapsed(self) -> Duration {
        Duration(Instant::now().0.wrapping_sub(self.0).max(0) as u64)
    }

    /// `true` iff at least `timeout` ticks have elapsed since `self`.
    #[must_use]
    pub fn has_elapsed(self, timeout: Duration) -> bool {
        self.elapsed().0 >= timeout.0
    }

    pub(crate) const fn raw(self) -> i64 {
        self.0
    }
}

/// A span of time, measured in ticks. Always non-negative.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Duration(u64);

impl Duration {
    /// A zero-length duration: "attempt once, never block".
    pub const ZERO: Duration = Duration(0);

    /// Constructs a duration from a raw, non-negative tick count.
    #[must_use]
    pub const fn from_ticks(ticks: u32) -> Self {
        Duration(ticks as u64)
    }

    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }
}

/// Returns the current tick count.
///
/// Callable from any context, including interrupts (§4.2/§5).
#[must_use]
pub fn now() -> Instant {
    Instant::now()
}

/// Advances the tick counter by one.
///
/// Called by the (out-of-scope) periodic timer interrupt handler. Not part
/// of the handle API: this is the boundary hook a timer driver uses to
/// drive the kernel's notion of time.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Runs `attempt` at least once, then keeps retrying (calling `backoff`
/// between attempts) until it succeeds or `timeout` ticks have elapsed
/// since `start`.
///
/// This captures the "timeout `0` still attempts at least once" rule that
/// every blocking operation in §4/§5 shares, so it only needs to be
/// written once.
pub(crate) fn poll_until<T>(
    start: Instant,
    timeout: Duration,
    mut attempt: impl FnMut() -> Option<T>,
    mut backoff: impl FnMut(),
) -> Option<T> {
    loop {
        if let Some(v) = attempt() {
            return Some(v);
        }
        if start.has_elapsed(timeout) {
            return None;
        }
        backoff();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances_monotonically() {
        let before = now();
        tick();
        tick();
        let after = now();
        assert!(after.elapsed().ticks() <= before.elapsed().ticks());
        assert!(before.has_elapsed(Duration::from_ticks(1)));
    }

    #[test]
    fn zero_timeout_attempts_once() {
        let start = now();
        let mut calls = 0;
        let result = poll_until(
            start,
            Duration::ZERO,
            || {
                calls += 1;
                None::<()>
            },
            || panic!("must not back off on a zero timeout after the first failed attempt"),
        );
        assert_eq!(calls, 1);
        assert!(result.is_none());
    }

    #[test]
    fn poll_until_succeeds_before_timeout() {
        let start = now();
        let mut calls = 0;
        let result = poll_until(
            start,
            Duration::from_ticks(100),
            || {
                calls += 1;
                (calls == 3).then_some(calls)
            },
            || {},
        );
        assert_eq!(result, Some(3));
    }
}
