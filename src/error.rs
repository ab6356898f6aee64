//! The closed error taxonomy shared by every entry point in the crate.
//!
//! Every operation here is an ABI-shaped handle operation: it takes an
//! out-parameter for the error code and returns a sentinel value (an
//! invalid handle, `-1`, or `false`) on failure. [`ErrorCode::NONE`] is
//! written first by every entry point, then overwritten on failure.

/// Closed set of error codes reported by the core.
///
/// `INTERNAL` and `HOST` are the only codes after which observable state
/// may be left indeterminate; every other failure preserves the
/// pre-call state (see crate-level docs).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// Success sentinel.
    None,
    /// Unclassified failure; should not normally be observed.
    Unknown,
    /// A nested subcall unexpectedly failed. Never swallowed.
    Internal,
    /// A handle is invalid, a pointer is null, or a numeric argument is
    /// out of its declared domain.
    InvalidArg,
    /// The operation is forbidden in the calling context (e.g. a blocking
    /// call from an interrupt).
    InvalidOp,
    /// The target is in the wrong state for this operation.
    InvalidState,
    /// No empty slot in a fixed-capacity registry.
    NoMem,
    /// A bounded-wait operation did not succeed in time.
    Timeout,
    /// The requested feature is compiled out.
    Unsupported,
    /// An external transport (e.g. semihosting) reported failure.
    Host,
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::None
    }
}

impl ErrorCode {
    /// `true` iff this is the success sentinel.
    #[inline]
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, ErrorCode::None)
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ErrorCode::None => "none",
            ErrorCode::Unknown => "unknown",
            ErrorCode::Internal => "internal",
            ErrorCode::InvalidArg => "invalid argument",
            ErrorCode::InvalidOp => "invalid operation",
            ErrorCode::InvalidState => "invalid state",
            ErrorCode::NoMem => "no memory",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::Host => "host transport error",
        };
        f.write_str(s)
    }
}

/// Writes `code` into `out` and returns `ret`.
///
/// Small helper used by every handle-API entry point to keep the
/// "write `NONE` first, overwrite on failure" discipline in one place
/// instead of repeated at every call site.
#[inline]
pub(crate) fn fail<T>(out: &mut ErrorCode, code: ErrorCode, ret: T) -> T {
    *out = code;
    ret
}

#[inline]
pub(crate) fn ok<T>(out: &mut ErrorCode, ret: T) -> T {
    *out = ErrorCode::None;
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_none() {
        assert_eq!(ErrorCode::default(), ErrorCode::None);
        assert!(ErrorCode::None.is_ok());
    }

    #[test]
    fn non_none_is_not_ok() {
        assert!(!ErrorCode::Timeout.is_ok());
        assert!(!ErrorCode::Internal.is_ok());
    }
}
