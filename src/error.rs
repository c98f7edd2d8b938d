//! Error types for pool and handle operations.

use thiserror::Error;

use crate::utils::{signature, Callsite};

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Outcome of a validated free.
///
/// The non-`Ok` discriminants reuse the corresponding signature byte,
/// so a status can be compared directly against poisoned memory in a
/// crash dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FreeStatus {
    /// The block was valid and has been returned to the free list.
    Ok = 0,
    /// The address was inside a page but not on a block boundary.
    BadAlignment = signature::ALIGN,
    /// The block was already on the free list.
    AlreadyFreed = signature::FREED,
    /// A pad canary around the block was overwritten.
    PadCorrupted = signature::PAD,
}

impl FreeStatus {
    /// Raw status byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for the success status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, FreeStatus::Ok)
    }
}

/// Errors raised by pools, handles, and pool pointers.
///
/// In lenient mode these conditions are reported to the pool's log sink
/// and execution continues; with [`strict`](crate::pool::PoolConfig::strict)
/// enabled they are returned as `Err` and the pool's state is left
/// unchanged for the failed operation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Free called with an address that is not on a block boundary.
    #[error("invalid alignment on free from {callsite}")]
    InvalidAlignment {
        /// Where the offending free happened.
        callsite: Callsite,
    },

    /// Free called on a block that is already free, or on a pool
    /// pointer whose storage was already released.
    #[error("attempt to free already freed memory from {callsite}")]
    DoubleFree {
        /// Where the offending free happened.
        callsite: Callsite,
    },

    /// A pad canary around the block was overwritten.
    #[error("pad bytes invalidated for object allocated at {allocated_at}")]
    PadViolation {
        /// Where the damaged block was originally allocated.
        allocated_at: Callsite,
    },

    /// Dereference of a pool pointer whose storage has been freed.
    #[error("attempt to access freed memory allocated at {allocated_at}")]
    DanglingAccess {
        /// Where the handle was originally allocated.
        allocated_at: Callsite,
    },

    /// A remove-ref drove a handle's reference count below zero.
    #[error("negative refcount detected from remove at {callsite}, handle allocated at {allocated_at}")]
    NegativeRefCount {
        /// Where the offending remove-ref happened.
        callsite: Callsite,
        /// Where the handle was originally allocated.
        allocated_at: Callsite,
    },

    /// A handle's reference count reached zero while its storage was
    /// still live: the payload must be freed before the last reference
    /// drops.
    #[error("dangling reference: all references removed before memory was freed, handle allocated at {allocated_at}")]
    DanglingReference {
        /// Where the last reference was removed.
        callsite: Callsite,
        /// Where the handle was originally allocated.
        allocated_at: Callsite,
    },

    /// The pool reported a non-OK status for a pointer-initiated free.
    #[error("invalid free attempt failed at {callsite} with status {status:?}")]
    InvalidFree {
        /// Where the offending free happened.
        callsite: Callsite,
        /// Status the pool returned.
        status: FreeStatus,
    },

    /// Rejected pool configuration.
    #[error("invalid pool configuration: {reason}")]
    InvalidConfig {
        /// Which constraint was violated.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bytes_reuse_signatures() {
        assert_eq!(FreeStatus::Ok.as_byte(), 0);
        assert_eq!(FreeStatus::BadAlignment.as_byte(), 0xEE);
        assert_eq!(FreeStatus::AlreadyFreed.as_byte(), 0xBB);
        assert_eq!(FreeStatus::PadCorrupted.as_byte(), 0xDD);
        assert!(FreeStatus::Ok.is_ok());
        assert!(!FreeStatus::PadCorrupted.is_ok());
    }

    #[test]
    fn error_display_names_the_callsite() {
        let err = PoolError::DoubleFree {
            callsite: Callsite::new("game.rs", 42),
        };
        assert_eq!(
            err.to_string(),
            "attempt to free already freed memory from game.rs #42"
        );
    }
}
