//! Reference-counted indirection handles.
//!
//! A [`Handle`] names one pool block: it carries the block's address,
//! a dispatch record recovering the owning pool's free operation, and
//! a signed reference count. Handles are themselves allocated from a
//! dedicated process-wide `PoolAllocator<Handle>`, so the allocator is
//! self-hosted.
//!
//! ## Invariants
//!
//! - A handle reachable from any pool pointer has `ref_count > 0`.
//! - When the count reaches zero the storage must already be empty;
//!   the violated path emits the dangling-reference diagnostic.
//! - The null sentinel holds a permanent reference and is never
//!   returned to the pool.

use core::cell::Cell;
use core::fmt;
use core::ptr::{self, NonNull};

use tracing::debug;

use crate::error::{FreeStatus, PoolError, PoolResult};
use crate::pool::{PoolAllocator, PoolConfig, PoolStats};
use crate::sink::SharedSink;
use crate::utils::Callsite;

thread_local! {
    /// The self-hosted handle pool. Single-threaded by contract, so
    /// process-wide state is thread-confined state.
    static HANDLE_POOL: PoolAllocator<Handle> = new_handle_pool();

    /// Shared sentinel backing every null pool pointer. Its initial
    /// reference is held for the lifetime of the thread, so no pointer
    /// ever observes a zero count on it.
    static NULL_HANDLE: Handle = Handle::null_sentinel();
}

fn new_handle_pool() -> PoolAllocator<Handle> {
    debug!("initializing handle pool");
    match PoolAllocator::new(PoolConfig::debug()) {
        Ok(pool) => pool,
        Err(_) => unreachable!("the debug preset is a valid configuration"),
    }
}

/// Number of handles currently allocated from the handle pool.
#[must_use]
pub fn allocated_handles() -> usize {
    HANDLE_POOL.with(|pool| pool.stats().blocks_in_use)
}

/// Statistics of the handle pool.
#[must_use]
pub fn handle_pool_stats() -> PoolStats {
    HANDLE_POOL.with(PoolAllocator::stats)
}

/// Installs the sink that receives handle diagnostics and the handle
/// pool's leak dump.
pub fn set_handle_log_sink(sink: SharedSink) {
    HANDLE_POOL.with(|pool| pool.set_log_sink(sink));
}

/// Toggles whether handle diagnostics are raised as errors.
pub fn set_handle_strict(strict: bool) {
    HANDLE_POOL.with(|pool| pool.set_strict(strict));
}

fn handle_strict() -> bool {
    HANDLE_POOL.with(PoolAllocator::strict)
}

fn log_handle_event(args: fmt::Arguments<'_>) {
    HANDLE_POOL.with(|pool| {
        if let Some(sink) = pool.log_sink() {
            let _ = writeln!(sink.borrow_mut(), "{args}");
        }
    });
}

/// Dispatch record recovering the owning pool's free operation from an
/// opaque pool reference. Built by [`Handle::create`] for the concrete
/// pool type, which is erased here.
#[derive(Clone, Copy)]
struct PoolDispatch {
    pool: *const (),
    free_fn: unsafe fn(*const (), *mut u8, Callsite) -> PoolResult<FreeStatus>,
}

/// Monomorphic free trampoline stored in the dispatch record.
///
/// # Safety
///
/// `pool` must point at a live `PoolAllocator<T>` and `storage` at a
/// block allocated from it.
unsafe fn free_in_pool<T>(
    pool: *const (),
    storage: *mut u8,
    callsite: Callsite,
) -> PoolResult<FreeStatus> {
    // SAFETY: forwarded caller contract; the dispatch record was built
    // from a `&PoolAllocator<T>` for this exact `T`.
    unsafe {
        let pool = &*pool.cast::<PoolAllocator<T>>();
        pool.free_with(NonNull::new_unchecked(storage.cast::<T>()), callsite)
    }
}

/// Ref-counted indirection node naming one pool block.
///
/// Created through [`PoolPtr`](crate::handle::PoolPtr); the pointer
/// layer owns the references. When the count reaches zero the handle
/// returns itself to the handle pool.
pub struct Handle {
    storage: Cell<*mut u8>,
    dispatch: Cell<Option<PoolDispatch>>,
    ref_count: Cell<i32>,
}

impl Handle {
    fn null_sentinel() -> Self {
        Self {
            storage: Cell::new(ptr::null_mut()),
            dispatch: Cell::new(None),
            ref_count: Cell::new(1),
        }
    }

    /// The shared null sentinel.
    pub(crate) fn null() -> NonNull<Handle> {
        NULL_HANDLE.with(|sentinel| NonNull::from(sentinel))
    }

    /// Allocates a handle for `storage` from the handle pool.
    ///
    /// The handle starts with a zero count; the wrapping pool pointer
    /// takes the first reference.
    pub(crate) fn create<T>(
        pool: &PoolAllocator<T>,
        storage: NonNull<T>,
        callsite: Callsite,
    ) -> NonNull<Handle> {
        let handle = Handle {
            storage: Cell::new(storage.as_ptr().cast()),
            dispatch: Cell::new(Some(PoolDispatch {
                pool: (pool as *const PoolAllocator<T>).cast(),
                free_fn: free_in_pool::<T>,
            })),
            ref_count: Cell::new(0),
        };
        HANDLE_POOL.with(|handles| handles.insert_with(handle, callsite))
    }

    /// Adds a reference.
    pub fn add_ref(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    /// Removes a reference, returning the handle to the pool when the
    /// count reaches zero.
    ///
    /// A negative count and a zero count with live storage are
    /// reported (and raised in strict mode); the handle is reclaimed
    /// regardless, so `self` must not be used after this returns with
    /// a non-positive count.
    #[track_caller]
    pub fn remove_ref(&self) -> PoolResult<()> {
        self.remove_ref_with(Callsite::caller())
    }

    /// [`remove_ref`](Self::remove_ref) with an explicit callsite.
    pub fn remove_ref_with(&self, callsite: Callsite) -> PoolResult<()> {
        let count = self.ref_count.get() - 1;
        self.ref_count.set(count);

        let mut result = Ok(());

        if count < 0 {
            let allocated_at = self.own_callsite();
            log_handle_event(format_args!(
                "[Handle]: Negative RefCount detected from remove at: {} #{}Memory allocated at: {} #{}",
                callsite.file(),
                callsite.line(),
                allocated_at.file(),
                allocated_at.line()
            ));
            if handle_strict() {
                result = Err(PoolError::NegativeRefCount {
                    callsite,
                    allocated_at,
                });
            }
        }

        if count <= 0 {
            if !self.storage.get().is_null() {
                let allocated_at = self.own_callsite();
                log_handle_event(format_args!(
                    "[Handle]: Dangling reference: all references removed before memory was freed. Memory allocated at: {} #{}",
                    allocated_at.file(),
                    allocated_at.line()
                ));
                if handle_strict() && result.is_ok() {
                    result = Err(PoolError::DanglingReference {
                        callsite,
                        allocated_at,
                    });
                }
            }

            if self.dispatch.get().is_some() {
                let this = NonNull::from(self);
                // SAFETY: pool-backed handles were allocated from the
                // handle pool and are reclaimed exactly once, here.
                // Nothing touches `self` after this call.
                let _ = HANDLE_POOL.with(|handles| unsafe { handles.free_with(this, callsite) });
            }
            // The null sentinel stays out of the pool.
        }

        result
    }

    /// Current reference count.
    #[must_use]
    pub fn ref_count(&self) -> i32 {
        self.ref_count.get()
    }

    /// Whether the handle's storage is empty.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.storage.get().is_null()
    }

    /// The raw storage address, null once the payload was freed.
    #[must_use]
    pub fn raw_storage(&self) -> *mut u8 {
        self.storage.get()
    }

    /// Storage address, or the dangling-access diagnostic when the
    /// payload has already been freed.
    pub(crate) fn checked_storage(&self) -> PoolResult<NonNull<u8>> {
        match NonNull::new(self.storage.get()) {
            Some(storage) => Ok(storage),
            None => {
                let allocated_at = self.own_callsite();
                log_handle_event(format_args!(
                    "[Handle]: Attempt to access freed memory. Memory allocated at {} #{}",
                    allocated_at.file(),
                    allocated_at.line()
                ));
                Err(PoolError::DanglingAccess { allocated_at })
            }
        }
    }

    /// Returns the payload to its owning pool and empties the storage.
    ///
    /// Reference counts are untouched; the caller pairs this with
    /// [`remove_ref`](Self::remove_ref).
    pub(crate) fn free_payload_with(&self, callsite: Callsite) -> PoolResult<()> {
        let storage = self.storage.get();
        if storage.is_null() {
            let allocated_at = self.own_callsite();
            log_handle_event(format_args!(
                "[Handle]: Attempt to free freed memory. Free attempt at: {} #{}Memory allocated at: {} #{}",
                callsite.file(),
                callsite.line(),
                allocated_at.file(),
                allocated_at.line()
            ));
            if handle_strict() {
                return Err(PoolError::DoubleFree { callsite });
            }
            return Ok(());
        }

        let Some(dispatch) = self.dispatch.get() else {
            // The sentinel never carries storage; nothing to free.
            return Ok(());
        };

        // SAFETY: the dispatch record was built for the pool that owns
        // `storage`, and that pool outlives its pointers by contract.
        let outcome = unsafe { (dispatch.free_fn)(dispatch.pool, storage, callsite) };
        if !matches!(outcome, Ok(FreeStatus::Ok)) {
            let allocated_at = self.own_callsite();
            log_handle_event(format_args!(
                "[Handle]: Invalid free attempt failed at: {} #{}Memory allocated at: {} #{}",
                callsite.file(),
                callsite.line(),
                allocated_at.file(),
                allocated_at.line()
            ));
        }
        // The storage empties even when the pool rejected the free;
        // the block itself stays allocated and shows up in the leak
        // dump with its original callsite.
        self.storage.set(ptr::null_mut());

        match outcome {
            Ok(FreeStatus::Ok) => Ok(()),
            Ok(status) if handle_strict() => Err(PoolError::InvalidFree { callsite, status }),
            Ok(_) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Callsite that allocated this handle, from the handle pool's
    /// debug header. The sentinel has no header.
    fn own_callsite(&self) -> Callsite {
        if self.dispatch.get().is_none() {
            return Callsite::default();
        }
        HANDLE_POOL.with(|handles| {
            // SAFETY: pool-backed handles live inside the handle
            // pool's pages.
            unsafe { handles.debug_header(NonNull::from(self)) }
                .and_then(|header| header.callsite())
                .unwrap_or_default()
        })
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("storage", &self.storage.get())
            .field("ref_count", &self.ref_count.get())
            .field("pool_backed", &self.dispatch.get().is_some())
            .finish()
    }
}
