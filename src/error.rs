//! SDK Error Types
//!
//! Every fallible operation in the crate reports one of the error kinds
//! below. Platform hook failures are surfaced as `Storage`; they are never
//! retried internally.

use core::fmt;

/// Result alias used across the SDK.
pub type Result<T> = core::result::Result<T, Error>;

/// Error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An argument was out of range or otherwise unusable. The call had no
    /// side effects.
    InvalidInput,
    /// The component has not been booted yet (or was booted with a bad
    /// region and is permanently disabled).
    NotBooted,
    /// A second in-flight read or write was attempted where only one is
    /// allowed.
    Busy,
    /// Drain signal: there is nothing left to read.
    NoMoreData,
    /// A platform storage driver reported failure. The current operation
    /// was aborted.
    Storage,
    /// A CRC or magic check failed on persisted data. The object is
    /// treated as absent; there is no partial recovery.
    Integrity,
    /// A coredump larger than the backing storage was captured. The stored
    /// artifact is valid but incomplete.
    Truncated,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput => write!(f, "invalid input"),
            Error::NotBooted => write!(f, "component not booted"),
            Error::Busy => write!(f, "operation already in flight"),
            Error::NoMoreData => write!(f, "no more data"),
            Error::Storage => write!(f, "storage driver failure"),
            Error::Integrity => write!(f, "integrity check failed"),
            Error::Truncated => write!(f, "artifact truncated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Error::NotBooted), "component not booted");
        assert_eq!(format!("{}", Error::Storage), "storage driver failure");
    }
}
