//! # objpool
//!
//! Fast, predictable allocation for many short-lived homogeneous
//! objects (game entities, event records, graph nodes) without
//! general-purpose heap overhead or fragmentation.
//!
//! The crate provides:
//! - [`PoolAllocator`] - a typed free-list allocator that carves pages
//!   into fixed blocks, with an optional debug layer of per-block
//!   headers, poison signatures, pad canaries, and statistics that
//!   catches double-frees, misaligned frees, buffer overruns, and
//!   leaks at teardown
//! - [`Handle`] - a ref-counted indirection node, self-hosted in a
//!   dedicated handle pool
//! - [`PoolPtr`] - a smart pointer owning one handle reference, whose
//!   dereference traps when the payload was freed while references
//!   remain
//!
//! ## Quick start
//!
//! ```rust
//! use objpool::{PoolAllocator, PoolConfig, PoolPtr};
//!
//! # fn main() -> objpool::PoolResult<()> {
//! let pool = PoolAllocator::<u64>::new(PoolConfig::debug())?;
//!
//! let mut counter = PoolPtr::new_in(41, &pool);
//! *counter.get_mut().unwrap() += 1;
//! assert_eq!(*counter, 42);
//!
//! // Payloads are freed explicitly; the last reference dropping first
//! // would be reported as a dangling reference.
//! counter.free()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Debug layout
//!
//! With [`PoolConfig::debug`] every block sits inside a chunk carrying
//! a header (allocation flag plus callsite), pad canaries, and
//! alignment filler, and every byte of a page is covered by a known
//! signature. Frees are validated in order: page residency, block
//! alignment, double-free, pad canaries. Diagnostics go to an optional
//! per-pool log sink; with `strict` they are also raised as
//! [`PoolError`] values.
//!
//! The pools are single-threaded by design: no operation blocks, and
//! the handle pool is thread-confined state. Reference cycles among
//! pool pointers leak their handles; no cycle collector is provided.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod handle;
pub mod pool;
pub mod sink;
pub mod utils;

pub use error::{FreeStatus, PoolError, PoolResult};
pub use handle::{allocated_handles, CastsTo, Handle, PoolPtr};
pub use pool::{DebugHeader, PoolAllocator, PoolConfig, PoolStats};
pub use sink::SharedSink;
pub use utils::Callsite;

/// Convenient re-exports of the commonly used types.
pub mod prelude {
    pub use crate::error::{FreeStatus, PoolError, PoolResult};
    pub use crate::handle::{CastsTo, Handle, PoolPtr};
    pub use crate::pool::{PoolAllocator, PoolConfig, PoolStats};
    pub use crate::sink::SharedSink;
    pub use crate::utils::Callsite;
}
