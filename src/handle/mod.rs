//! Reference-counted handles and the pool pointer built on them.
//!
//! ## Modules
//! - `handle` - the indirection node and the self-hosted handle pool
//! - `ptr` - [`PoolPtr`], the user-facing smart pointer

pub mod handle;
pub mod ptr;

pub use handle::{
    allocated_handles, handle_pool_stats, set_handle_log_sink, set_handle_strict, Handle,
};
pub use ptr::{CastsTo, PoolPtr};
